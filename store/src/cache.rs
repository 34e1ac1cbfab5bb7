//! TTL-bounded read cache in front of the durable store.

use std::time::Duration;

use dashmap::DashMap;
use satchel_engine::Record;

use crate::time::SharedClock;

#[derive(Debug, Clone)]
struct CachedRecord {
    record: Record,
    cached_at: u64,
}

/// Short-lived read cache keyed by `(collection, record id)`.
///
/// Entries expire after the configured TTL; a periodic sweep evicts what
/// reads have not already purged.
pub struct ReadCache {
    entries: DashMap<(String, String), CachedRecord>,
    ttl_ms: u64,
    clock: SharedClock,
}

impl ReadCache {
    /// Create a cache with the given entry lifetime.
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms: ttl.as_millis() as u64,
            clock,
        }
    }

    /// A fresh cached record, or `None` if absent or expired.
    pub fn get(&self, collection: &str, record_id: &str) -> Option<Record> {
        let key = (collection.to_string(), record_id.to_string());
        let now = self.clock.now_millis();

        if let Some(cached) = self.entries.get(&key) {
            if now.saturating_sub(cached.cached_at) < self.ttl_ms {
                return Some(cached.record.clone());
            }
        }

        // Expired entries are purged on the read that notices them.
        self.entries.remove(&key);
        None
    }

    /// Insert or refresh a record.
    pub fn insert(&self, record: Record) {
        let key = (record.collection.clone(), record.id.clone());
        self.entries.insert(
            key,
            CachedRecord {
                record,
                cached_at: self.clock.now_millis(),
            },
        );
    }

    /// Drop a record from the cache.
    pub fn invalidate(&self, collection: &str, record_id: &str) {
        self.entries
            .remove(&(collection.to_string(), record_id.to_string()));
    }

    /// Evict every expired entry; returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries
            .retain(|_, cached| now.saturating_sub(cached.cached_at) < self.ttl_ms);
        before - self.entries.len()
    }

    /// Number of live entries (expired ones included until evicted).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    fn record(id: &str) -> Record {
        Record::new_local(id, "orders", json!({"n": 1}), "device-a", 1000)
    }

    #[test]
    fn hit_within_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ReadCache::new(Duration::from_secs(60), clock.clone());

        cache.insert(record("o-1"));
        clock.advance(59_999);
        assert!(cache.get("orders", "o-1").is_some());
    }

    #[test]
    fn miss_after_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ReadCache::new(Duration::from_secs(60), clock.clone());

        cache.insert(record("o-1"));
        clock.advance(60_000);
        assert!(cache.get("orders", "o-1").is_none());
        // The expired read also purged the entry.
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_removes_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ReadCache::new(Duration::from_secs(60), clock);

        cache.insert(record("o-1"));
        cache.invalidate("orders", "o-1");
        assert!(cache.get("orders", "o-1").is_none());
    }

    #[test]
    fn sweep_evicts_only_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ReadCache::new(Duration::from_secs(60), clock.clone());

        cache.insert(record("o-1"));
        clock.advance(30_000);
        cache.insert(record("o-2"));
        clock.advance(30_000);

        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.get("orders", "o-2").is_some());
    }
}
