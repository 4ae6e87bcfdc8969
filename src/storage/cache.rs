//! TTL + LRU cache for loaded records.
//!
//! Entries carry their insertion time; anything older than the TTL is
//! treated as absent (and removed on the next touch or cleanup pass), never
//! returned stale. The cache is bounded: an insert that would exceed
//! capacity evicts the least-recently-used entry first.
//!
//! The structure is not internally synchronized; the store wraps it in its
//! own mutex.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    /// Recency stamp; the matching key lives in `recency` under this stamp.
    stamp: u64,
}

/// Bounded TTL cache with least-recently-used eviction.
pub struct TtlCache<V> {
    ttl: Duration,
    capacity: usize,
    entries: FxHashMap<String, CacheEntry<V>>,
    /// Recency order: lowest stamp = least recently used.
    recency: BTreeMap<u64, String>,
    clock: u64,
}

impl<V: Clone> TtlCache<V> {
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: FxHashMap::default(),
            recency: BTreeMap::new(),
            clock: 0,
        }
    }

    /// Look up a key, refreshing its recency. Expired entries are removed
    /// and reported as a miss.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| e.inserted_at.elapsed() >= self.ttl);
        if expired {
            self.remove(key);
            return None;
        }

        let stamp = self.next_stamp();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.stamp);
        entry.stamp = stamp;
        self.recency.insert(stamp, key.to_string());
        Some(entry.value.clone())
    }

    /// Insert or replace a key, evicting the LRU entry when full.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if let Some(old) = self.entries.remove(&key) {
            self.recency.remove(&old.stamp);
        } else if self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        let stamp = self.next_stamp();
        self.recency.insert(stamp, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                stamp,
            },
        );
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.stamp);
        }
    }

    /// Drop every expired entry.
    pub fn purge_expired(&mut self) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_lru(&mut self) {
        if let Some((&stamp, _)) = self.recency.iter().next() {
            if let Some(key) = self.recency.remove(&stamp) {
                self.entries.remove(&key);
            }
        }
    }

    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entry_is_a_miss_and_removed() {
        let mut cache = TtlCache::new(Duration::from_millis(0), 8);
        cache.insert("k", 1u32);
        // TTL of zero: the entry is expired the moment it lands.
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_entry_is_evicted_at_capacity() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1u32);
        cache.insert("b", 2u32);
        // Touch "a" so "b" becomes least recently used.
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c", 3u32);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn reinsert_replaces_without_eviction() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1u32);
        cache.insert("b", 2u32);
        cache.insert("a", 10u32);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn purge_drops_only_expired() {
        let mut cache = TtlCache::new(Duration::from_secs(60), 8);
        cache.insert("fresh", 1u32);
        cache.purge_expired();
        assert_eq!(cache.len(), 1);
    }
}
