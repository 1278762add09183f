//! Tier-1: the in-process LRU map.
//!
//! Guarded by a single [`parking_lot::Mutex`] rather than `std::sync::Mutex`,
//! matching `fraiseql-core`'s uncontended-fast-path preference throughout,
//! since tier-1 operations never suspend and so never need an async-aware
//! lock.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::entry::CacheEntry;

/// In-process LRU map plus its sibling hit-count map (same locking
/// domain, per spec §5).
pub struct Tier1 {
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Lifetime hit counter per key, independent of `CacheEntry::access_count`
    /// (which resets whenever a key is overwritten by `set`). This is what
    /// the TTL policy's "hit count > 5" rule consults (spec §4.4), so a
    /// key that is written, evicted by TTL, and re-fetched still
    /// remembers it was popular.
    hit_counts: Mutex<HashMap<String, u64>>,
    capacity: usize,
    /// Per-entry in-memory age bound, independent of (and usually shorter
    /// than) whatever TTL tier `set` was called with — tier-2 may hold a
    /// key for 24h, but tier-1 never does (spec §3 "Cache Entry" per-entry
    /// TTL 300s).
    memory_cache_ttl: Duration,
}

impl Tier1 {
    /// Build an empty tier-1 map bounded at `capacity` entries, with
    /// `memory_cache_ttl` as the hard per-entry in-memory age cap.
    #[must_use]
    pub fn new(capacity: usize, memory_cache_ttl: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), hit_counts: Mutex::new(HashMap::new()), capacity, memory_cache_ttl }
    }

    /// Non-blocking, branch-free-on-the-hot-path lookup: one map lookup
    /// plus a TTL compare. Expired entries are removed lazily on access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live_within(self.memory_cache_ttl) => {
                entry.access_count += 1;
                let value = entry.value.clone();
                drop(entries);
                *self.hit_counts.lock().entry(key.to_owned()).or_insert(0) += 1;
                Some(value)
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or overwrite `key`, evicting the lowest-LRU-score entry
    /// first if the map is already at capacity.
    pub fn set(&self, key: String, entry: CacheEntry) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            self.evict_one(&mut entries);
        }
        entries.insert(key, entry);
    }

    fn evict_one(&self, entries: &mut HashMap<String, CacheEntry>) {
        if let Some(victim) = entries.iter().min_by_key(|(_, e)| e.lru_score()).map(|(k, _)| k.clone()) {
            entries.remove(&victim);
        }
    }

    /// Remove `key` from tier-1, if present.
    pub fn del(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Remove every tier-1 entry whose TTL has elapsed. Called
    /// opportunistically; not required for correctness since `get` also
    /// lazily evicts, but keeps the map's `len()` (used by the eviction
    /// threshold) honest under low-traffic keys that are never re-read.
    pub fn sweep_expired(&self) {
        self.entries.lock().retain(|_, e| e.is_live_within(self.memory_cache_ttl));
    }

    /// Lifetime hit count for `key` (spec §4.4 TTL policy rule 1).
    #[must_use]
    pub fn hit_count(&self, key: &str) -> u64 {
        self.hit_counts.lock().get(key).copied().unwrap_or(0)
    }

    /// Current number of live tier-1 entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether tier-1 holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn get_miss_on_empty_map() {
        let t = Tier1::new(10, Duration::from_secs(300));
        assert_eq!(t.get("k"), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let t = Tier1::new(10, Duration::from_secs(300));
        t.set("k".into(), CacheEntry::new("v".into(), Duration::from_secs(60), false));
        assert_eq!(t.get("k"), Some("v".to_owned()));
    }

    #[test]
    fn expired_entry_is_evicted_lazily_on_access() {
        let t = Tier1::new(10, Duration::from_secs(300));
        t.set("k".into(), CacheEntry::new("v".into(), Duration::from_millis(0), false));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(t.get("k"), None);
        assert!(t.is_empty());
    }

    #[test]
    fn del_removes_entry() {
        let t = Tier1::new(10, Duration::from_secs(300));
        t.set("k".into(), CacheEntry::new("v".into(), Duration::from_secs(60), false));
        t.del("k");
        assert_eq!(t.get("k"), None);
    }

    #[test]
    fn hit_count_accumulates_across_gets() {
        let t = Tier1::new(10, Duration::from_secs(300));
        t.set("k".into(), CacheEntry::new("v".into(), Duration::from_secs(60), false));
        for _ in 0..6 {
            t.get("k");
        }
        assert_eq!(t.hit_count("k"), 6);
    }

    #[test]
    fn eviction_at_capacity_prefers_cold_entries() {
        let t = Tier1::new(2, Duration::from_secs(300));
        t.set("hot".into(), CacheEntry::new("v".into(), Duration::from_secs(60), false));
        for _ in 0..20 {
            t.get("hot");
        }
        t.set("cold".into(), CacheEntry::new("v".into(), Duration::from_secs(60), false));
        // Capacity reached: inserting a third key must evict the lowest-score entry.
        t.set("newcomer".into(), CacheEntry::new("v".into(), Duration::from_secs(60), false));
        assert_eq!(t.get("hot"), Some("v".to_owned()), "frequently accessed entry should survive eviction");
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn memory_cache_ttl_evicts_a_historical_entry_long_before_its_own_ttl() {
        let t = Tier1::new(10, Duration::from_millis(0));
        t.set("k".into(), CacheEntry::new("v".into(), Duration::from_secs(86_400), false));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(t.get("k"), None, "tier-1 must honor memory_cache_ttl regardless of the entry's own ttl");
    }
}
