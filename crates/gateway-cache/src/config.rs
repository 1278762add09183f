//! Two-tier cache configuration (spec §4.4, §6).
//!
//! Mirrors `fraiseql_core::cache::CacheConfig`'s own shape: a `Default`
//! impl carrying the numeric defaults, and doc comments calling out which
//! knob matters for which deployment shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tier-1 (in-process LRU) and TTL-policy configuration.
///
/// # Recommended settings
///
/// - **Single-node / development**: the defaults are fine; tier-2 can be
///   an [`gateway_store::InProcessStore`](gateway_store::InProcessStore).
/// - **Multi-node production**: raise `max_entries` only if per-instance
///   memory allows it (tier-1 is not shared across instances; tier-2,
///   typically Redis, is); leave the TTL tiers alone unless query patterns
///   show the historical tier is too aggressive for your retention needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of tier-1 entries before LRU eviction kicks in.
    ///
    /// Default: 5,000 (spec §3 "LRU Score" capacity).
    pub max_entries: usize,
    /// Per-entry max age regardless of TTL tier, enforced on tier-1.
    ///
    /// Default: 300s (spec §3 "Cache Entry" TTL).
    pub memory_cache_ttl: Duration,
    /// TTL granted once a key's hit counter exceeds 5 within its lifetime.
    ///
    /// Default: 3600s.
    pub hot_ttl: Duration,
    /// TTL granted to aggregation queries (when hot-query doesn't already apply).
    ///
    /// Default: 1800s.
    pub aggregation_ttl: Duration,
    /// TTL granted when the request's date range ends within the last 24h.
    ///
    /// Default: 300s.
    pub recent_ttl: Duration,
    /// TTL granted to everything else.
    ///
    /// Default: 86400s.
    pub historical_ttl: Duration,
    /// Interval between background freshness-invalidation sweeps.
    ///
    /// Default: 60s.
    pub invalidation_interval: Duration,
    /// Hit count above which a key is promoted to the hot-query TTL tier.
    ///
    /// Default: 5 (spec §4.4 TTL policy rule 1).
    pub hot_hit_threshold: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 5_000,
            memory_cache_ttl: Duration::from_secs(300),
            hot_ttl: Duration::from_secs(3_600),
            aggregation_ttl: Duration::from_secs(1_800),
            recent_ttl: Duration::from_secs(300),
            historical_ttl: Duration::from_secs(86_400),
            invalidation_interval: Duration::from_secs(60),
            hot_hit_threshold: 5,
        }
    }
}

impl CacheConfig {
    /// Validate the eagerly-checkable invariants (spec §1.1 SUPPLEMENT:
    /// "config hot bounds validation at startup").
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("cache.max_entries must be greater than zero".to_owned());
        }
        if self.hot_hit_threshold == 0 {
            return Err("cache.hot_hit_threshold must be greater than zero".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_specification() {
        let c = CacheConfig::default();
        assert_eq!(c.max_entries, 5_000);
        assert_eq!(c.memory_cache_ttl, Duration::from_secs(300));
        assert_eq!(c.hot_ttl, Duration::from_secs(3_600));
        assert_eq!(c.aggregation_ttl, Duration::from_secs(1_800));
        assert_eq!(c.recent_ttl, Duration::from_secs(300));
        assert_eq!(c.historical_ttl, Duration::from_secs(86_400));
        assert_eq!(c.hot_hit_threshold, 5);
    }

    #[test]
    fn rejects_zero_capacity() {
        let c = CacheConfig { max_entries: 0, ..CacheConfig::default() };
        assert!(c.validate().is_err());
    }
}
