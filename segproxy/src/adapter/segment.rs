use crate::dispatch::{Segmentation, Strategy};
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

pub enum ChunkSizes {
    /// Forward whatever is available in one write.
    Whole,
    Fixed(usize),
    Random {
        min: usize,
        max: usize,
        rng: Box<dyn RngCore + Send>,
    },
}

/// Write plan for the client -> upstream direction of one tunnel.
pub struct SegmentPlan {
    sizes: ChunkSizes,
    delay: Duration,
    last_write: Option<Instant>,
}

impl SegmentPlan {
    pub fn new(segmentation: &Segmentation) -> Self {
        Self::with_rng(segmentation, Box::new(SmallRng::from_entropy()))
    }

    /// `rng` is only consulted by the random strategy.
    pub fn with_rng(segmentation: &Segmentation, rng: Box<dyn RngCore + Send>) -> Self {
        let seg = segmentation.effective();
        let sizes = match seg.strategy {
            Strategy::None => ChunkSizes::Whole,
            Strategy::Fixed { chunk } => ChunkSizes::Fixed(chunk.max(1)),
            Strategy::Random { min, max } => ChunkSizes::Random {
                min: min.max(1),
                max: max.max(min).max(1),
                rng,
            },
        };
        Self {
            sizes,
            delay: seg.delay,
            last_write: None,
        }
    }

    pub fn passthrough() -> Self {
        Self {
            sizes: ChunkSizes::Whole,
            delay: Duration::ZERO,
            last_write: None,
        }
    }

    #[cfg(test)]
    pub fn is_passthrough(&self) -> bool {
        matches!(self.sizes, ChunkSizes::Whole) && self.delay.is_zero()
    }

    /// Size of the next chunk, never more than `remaining`.
    pub fn next_chunk(&mut self, remaining: usize) -> usize {
        let size = match &mut self.sizes {
            ChunkSizes::Whole => remaining,
            ChunkSizes::Fixed(chunk) => *chunk,
            ChunkSizes::Random { min, max, rng } => rng.gen_range(*min..=*max),
        };
        size.min(remaining)
    }

    /// Writes `data` chunk by chunk, flushing each one. Consecutive chunks are at
    /// least `delay` apart, counted from the previous write, also across calls.
    pub async fn write<W>(&mut self, writer: &mut W, mut data: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while !data.is_empty() {
            let size = self.next_chunk(data.len());
            if let Some(last) = self.last_write {
                if !self.delay.is_zero() {
                    tokio::time::sleep_until(last + self.delay).await;
                }
            }
            writer.write_all(&data[..size]).await?;
            writer.flush().await?;
            self.last_write = Some(Instant::now());
            data = &data[size..];
        }
        Ok(())
    }
}
