use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct IdGenerator(AtomicU64);

impl Default for IdGenerator {
    fn default() -> Self {
        // connection ids are 1-based in logs
        Self(AtomicU64::new(1))
    }
}

impl IdGenerator {
    pub fn get(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Short random hex id correlating the log lines of one request.
pub fn request_id() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

#[test]
fn test_id_gen() {
    let ids = IdGenerator::default();
    assert_eq!(ids.get(), 1);
    assert_eq!(ids.get(), 2);
    let rid = request_id();
    assert_eq!(rid.len(), 8);
    assert!(rid.chars().all(|c| c.is_ascii_hexdigit()));
}
