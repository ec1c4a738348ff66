use linked_hash_map::LinkedHashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const MIN_TTL: Duration = Duration::from_secs(5);
pub const MAX_TTL: Duration = Duration::from_secs(3600);

struct CacheEntry {
    addrs: Vec<IpAddr>,
    expires_at: Instant,
}

/// Bounded hostname -> addresses cache, evicting the oldest insertion first.
pub struct DnsCache {
    capacity: usize,
    entries: Mutex<LinkedHashMap<String, CacheEntry>>,
}

impl DnsCache {
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            tracing::debug!("DNS cache disabled (size=0)");
        }
        Self {
            capacity,
            entries: Mutex::new(LinkedHashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.capacity > 0
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    // a panicking holder cannot leave the map half-updated
    fn entries(&self) -> MutexGuard<'_, LinkedHashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Live entry for `host`; an expired one is dropped on the way.
    pub fn get(&self, host: &str) -> Option<Vec<IpAddr>> {
        if !self.enabled() {
            return None;
        }
        let mut entries = self.entries();
        match entries.get(host) {
            None => return None,
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.addrs.clone()),
            Some(_) => {}
        }
        entries.remove(host);
        tracing::debug!("DNS cache expired host={}", host);
        None
    }

    /// Stores an answer; the ttl is clamped to [MIN_TTL, MAX_TTL] and zero is not cached.
    pub fn insert(&self, host: &str, addrs: Vec<IpAddr>, ttl: Duration) {
        if !self.enabled() || ttl.is_zero() || addrs.is_empty() {
            return;
        }
        let ttl = ttl.clamp(MIN_TTL, MAX_TTL);
        let mut entries = self.entries();
        // refresh goes to the tail
        entries.remove(host);
        while entries.len() >= self.capacity {
            match entries.pop_front() {
                Some((evicted, _)) => tracing::debug!("DNS cache evict host={}", evicted),
                None => break,
            }
        }
        entries.insert(
            host.to_string(),
            CacheEntry {
                addrs,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let cache = DnsCache::new(4);
        cache.insert("a.com", vec![ip("1.1.1.1")], Duration::from_secs(10));
        assert_eq!(cache.get("a.com"), Some(vec![ip("1.1.1.1")]));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(cache.get("a.com").is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("a.com").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_clamp() {
        let cache = DnsCache::new(4);
        cache.insert("short.com", vec![ip("1.1.1.1")], Duration::from_secs(1));
        cache.insert("long.com", vec![ip("2.2.2.2")], Duration::from_secs(86400));
        cache.insert("zero.com", vec![ip("3.3.3.3")], Duration::ZERO);
        assert!(cache.get("zero.com").is_none());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(cache.get("short.com").is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("short.com").is_none());
        tokio::time::advance(Duration::from_secs(3590)).await;
        assert!(cache.get("long.com").is_none());
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = DnsCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.insert("a.com", vec![ip("1.1.1.1")], ttl);
        cache.insert("b.com", vec![ip("2.2.2.2")], ttl);
        // lookups do not change eviction order
        assert!(cache.get("a.com").is_some());
        cache.insert("c.com", vec![ip("3.3.3.3")], ttl);
        assert!(cache.get("a.com").is_none());
        assert!(cache.get("b.com").is_some());
        assert!(cache.get("c.com").is_some());

        // a refresh moves the entry to the tail
        cache.insert("b.com", vec![ip("2.2.2.3")], ttl);
        cache.insert("d.com", vec![ip("4.4.4.4")], ttl);
        assert!(cache.get("c.com").is_none());
        assert_eq!(cache.get("b.com"), Some(vec![ip("2.2.2.3")]));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_poisoned_lock_keeps_cache_working() {
        let cache = std::sync::Arc::new(DnsCache::new(2));
        let holder = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.entries.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(cache.entries.is_poisoned());
        cache.insert("a.com", vec![ip("1.1.1.1")], Duration::from_secs(60));
        assert_eq!(cache.get("a.com"), Some(vec![ip("1.1.1.1")]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled() {
        let cache = DnsCache::new(0);
        cache.insert("a.com", vec![ip("1.1.1.1")], Duration::from_secs(60));
        assert!(cache.get("a.com").is_none());
        assert_eq!(cache.len(), 0);
    }
}
