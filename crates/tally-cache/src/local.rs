//! Bounded in-process cache tier.
//!
//! [`LocalCache`] holds at most `capacity` entries. Expired entries are
//! evicted lazily when read; when a new key would exceed the capacity the
//! oldest-inserted entry is evicted first. Expiry uses [`tokio::time::Instant`]
//! so tests can drive it with a paused clock.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct LocalEntry {
    value: serde_json::Value,
    expires_at: Instant,
    /// Insertion sequence, matched against `order` to skip stale slots.
    seq: u64,
}

#[derive(Debug, Default)]
struct LocalInner {
    entries: HashMap<String, LocalEntry>,
    /// Insertion order. Overwritten or deleted keys leave stale slots behind
    /// that are skipped on eviction and dropped on compaction.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl LocalInner {
    fn evict_oldest(&mut self) -> bool {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.entries.get(&key).is_some_and(|e| e.seq == seq) {
                self.entries.remove(&key);
                return true;
            }
        }
        false
    }

    fn compact(&mut self) {
        let mut live: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.seq))
            .collect();
        live.sort_by_key(|(_, seq)| *seq);
        self.order = live.into();
    }
}

/// Bounded TTL map with oldest-inserted-first eviction.
#[derive(Debug)]
pub struct LocalCache {
    inner: Mutex<LocalInner>,
    capacity: usize,
}

impl LocalCache {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LocalInner::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries, expired-but-unread ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a live value, evicting it if it has expired.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        None
    }

    /// Insert or replace a value. Replacing a key moves it to the back of
    /// the eviction order.
    pub fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(key) {
            while inner.entries.len() >= self.capacity {
                if !inner.evict_oldest() {
                    break;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: Instant::now() + ttl,
                seq,
            },
        );
        inner.order.push_back((key.to_string(), seq));

        if inner.order.len() > self.capacity.saturating_mul(2) {
            inner.compact();
        }
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn value_expires_after_ttl() {
        let cache = LocalCache::new(10);
        cache.set("quote:AAPL", json!(189.5), Duration::from_secs(1));
        assert_eq!(cache.get("quote:AAPL"), Some(json!(189.5)));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(cache.get("quote:AAPL"), None);
        assert!(cache.is_empty(), "expired entry is evicted on read");
    }

    #[test]
    fn evicts_oldest_inserted_when_full() {
        let cache = LocalCache::new(2);
        cache.set("a", json!(1), TTL);
        cache.set("b", json!(2), TTL);
        cache.set("c", json!(3), TTL);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(json!(2)));
        assert_eq!(cache.get("c"), Some(json!(3)));
    }

    #[test]
    fn overwrite_refreshes_position_without_growing() {
        let cache = LocalCache::new(2);
        cache.set("a", json!(1), TTL);
        cache.set("b", json!(2), TTL);
        cache.set("a", json!(10), TTL);
        assert_eq!(cache.len(), 2);

        cache.set("c", json!(3), TTL);
        assert_eq!(cache.get("b"), None, "b is now the oldest insertion");
        assert_eq!(cache.get("a"), Some(json!(10)));
    }

    #[test]
    fn repeated_overwrites_stay_bounded() {
        let cache = LocalCache::new(3);
        for i in 0..1000 {
            cache.set("hot", json!(i), TTL);
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.inner.lock().order.len() <= 6);
        assert_eq!(cache.get("hot"), Some(json!(999)));
    }

    #[test]
    fn delete_then_evict_skips_stale_slot() {
        let cache = LocalCache::new(2);
        cache.set("a", json!(1), TTL);
        cache.set("b", json!(2), TTL);
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));

        cache.set("c", json!(3), TTL);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = LocalCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.set("a", json!(1), TTL);
        cache.set("b", json!(2), TTL);
        assert_eq!(cache.len(), 1);
    }
}
