use crate::adapter::SegmentPlan;
use crate::proxy::error::RelayError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

const BUF_SIZE: usize = 16 * 1024;

#[derive(Debug)]
pub struct RelayStats {
    /// client -> upstream bytes, prefix included
    pub up: u64,
    pub down: u64,
    pub result: Result<(), RelayError>,
}

/// Tracks the last time any byte moved, in ms since `start`.
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let ms = self.start.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }

    async fn idle(&self, timeout: Duration) {
        loop {
            let Some(deadline) = self.last().checked_add(timeout) else {
                return std::future::pending().await;
            };
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Moves bytes both ways until both directions finish, an error occurs, or
/// nothing moves for `idle_timeout`. `prefix` goes to upstream first, through `plan`.
/// With `client_eof` the client already half-closed, so upstream is shut for
/// writing right after the prefix.
pub async fn relay<C, U>(
    client: C,
    upstream: U,
    prefix: Vec<u8>,
    mut plan: SegmentPlan,
    idle_timeout: Duration,
    client_eof: bool,
) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    U: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
    let up_bytes = AtomicU64::new(0);
    let down_bytes = AtomicU64::new(0);
    let activity = Activity::new();

    let up = async {
        if !prefix.is_empty() {
            plan.write(&mut upstream_write, &prefix).await?;
            up_bytes.fetch_add(prefix.len() as u64, Ordering::Relaxed);
            activity.touch();
        }
        if client_eof {
            upstream_write.shutdown().await?;
            return Ok::<(), RelayError>(());
        }
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let n = client_read.read(&mut buf).await?;
            if n == 0 {
                upstream_write.shutdown().await?;
                return Ok::<(), RelayError>(());
            }
            activity.touch();
            plan.write(&mut upstream_write, &buf[..n]).await?;
            up_bytes.fetch_add(n as u64, Ordering::Relaxed);
            activity.touch();
        }
    };
    let down = async {
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let n = upstream_read.read(&mut buf).await?;
            if n == 0 {
                client_write.shutdown().await?;
                return Ok::<(), RelayError>(());
            }
            activity.touch();
            client_write.write_all(&buf[..n]).await?;
            down_bytes.fetch_add(n as u64, Ordering::Relaxed);
            activity.touch();
        }
    };

    let result = async {
        tokio::pin!(up, down);
        let mut up_done = false;
        let mut down_done = false;
        while !(up_done && down_done) {
            tokio::select! {
                r = &mut up, if !up_done => {
                    r?;
                    up_done = true;
                }
                r = &mut down, if !down_done => {
                    r?;
                    down_done = true;
                }
                _ = activity.idle(idle_timeout) => {
                    tracing::debug!("Tunnel idle for {:?}, closing", idle_timeout);
                    return Err(RelayError::IdleTimeout);
                }
            }
        }
        Ok(())
    }
    .await;

    RelayStats {
        up: up_bytes.load(Ordering::Relaxed),
        down: down_bytes.load(Ordering::Relaxed),
        result,
    }
}
