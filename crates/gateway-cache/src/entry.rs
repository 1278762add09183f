//! The tier-1 cache entry (spec §3 "Cache Entry").

use std::time::{Duration, Instant};

/// A single tier-1 cache slot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached, already-serialized payload (a JSON-encoded [`Connection`](gateway_error)
    /// page, in practice — opaque to this crate).
    pub value: String,
    /// Wall-clock moment this entry was inserted (or last overwritten by [`set`](crate::TwoTierCache::set)).
    pub inserted_at: Instant,
    /// Time-to-live selected for this entry by the TTL policy at insert time.
    pub ttl: Duration,
    /// Number of times this entry has been read via `getSync`/`getAsync`
    /// since it was inserted; feeds the LRU eviction score.
    pub access_count: u64,
    /// Whether this key's name encodes `"date"` or `"recent"` — carried so
    /// a future narrowing of the broad invalidation rule (spec §9 Open
    /// Question) is a one-line change rather than a re-derivation.
    pub recent_marker: bool,
}

impl CacheEntry {
    /// Build a fresh entry, access count zero.
    #[must_use]
    pub fn new(value: String, ttl: Duration, recent_marker: bool) -> Self {
        Self { value, inserted_at: Instant::now(), ttl, access_count: 0, recent_marker }
    }

    /// Whether this entry is still within its TTL.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }

    /// Whether this entry is still live, additionally capped at `memory_cap`
    /// regardless of its own (possibly much longer) `ttl`. Tier-1 holds
    /// entries only up to the per-entry in-memory bound even when the
    /// TTL-tier policy granted a longer tier-2 lifetime (spec §3 "Cache
    /// Entry" per-entry TTL 300s).
    #[must_use]
    pub fn is_live_within(&self, memory_cap: Duration) -> bool {
        self.inserted_at.elapsed() < self.ttl.min(memory_cap)
    }

    /// Age in milliseconds, used by the LRU eviction score.
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        u64::try_from(self.inserted_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// `accessCount * 10^6 + age_ms` (spec §3 "LRU Score"). The lowest
    /// score across tier-1 is evicted first when the cache is full.
    #[must_use]
    pub fn lru_score(&self) -> u64 {
        self.access_count.saturating_mul(1_000_000).saturating_add(self.age_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn fresh_entry_is_live() {
        let entry = CacheEntry::new("v".into(), Duration::from_secs(60), false);
        assert!(entry.is_live());
    }

    #[test]
    fn expired_entry_is_not_live() {
        let entry = CacheEntry::new("v".into(), Duration::from_millis(0), false);
        sleep(Duration::from_millis(5));
        assert!(!entry.is_live());
    }

    #[test]
    fn a_long_ttl_entry_still_expires_at_the_memory_cap() {
        let entry = CacheEntry::new("v".into(), Duration::from_secs(86_400), false);
        sleep(Duration::from_millis(5));
        assert!(!entry.is_live_within(Duration::from_millis(0)));
    }

    #[test]
    fn a_short_ttl_entry_is_unaffected_by_a_generous_memory_cap() {
        let entry = CacheEntry::new("v".into(), Duration::from_secs(60), false);
        assert!(entry.is_live_within(Duration::from_secs(300)));
    }

    #[test]
    fn higher_access_count_dominates_lru_score() {
        let mut hot = CacheEntry::new("v".into(), Duration::from_secs(60), false);
        hot.access_count = 10;
        let cold = CacheEntry::new("v".into(), Duration::from_secs(60), false);
        assert!(hot.lru_score() > cold.lru_score());
    }
}
