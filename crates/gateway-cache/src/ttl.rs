//! TTL policy (spec §4.4 `getCacheTTL`).
//!
//! First match wins: hot-query hit count, then aggregation, then
//! recent-data, then historical. These rules are order-sensitive rather
//! than "take the minimum/maximum TTL" — see §8, "TTL monotonicity ...
//! is *not* required".

use std::time::Duration;

use chrono::NaiveDate;

use crate::config::CacheConfig;

/// Which rule of the TTL policy fired, for logging/testing visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlTier {
    /// Rule 1: hit count exceeded the hot threshold.
    Hot,
    /// Rule 2: the request is an aggregation.
    Aggregation,
    /// Rule 3: the request's date range ends within the last 24h.
    Recent,
    /// Rule 4: none of the above.
    Historical,
}

/// Select the TTL tier for a freshly-computed result.
///
/// `hit_count` is the key's lifetime hit counter (spec §4.4: "the cache
/// maintains a per-key hit counter"); `date_range_end` is the request's
/// `dateRange.end`, if any, as a calendar date.
#[must_use]
pub fn get_cache_ttl(
    config: &CacheConfig,
    hit_count: u64,
    is_aggregation: bool,
    date_range_end: Option<NaiveDate>,
    now: NaiveDate,
) -> (Duration, TtlTier) {
    if hit_count > config.hot_hit_threshold {
        return (config.hot_ttl, TtlTier::Hot);
    }
    if is_aggregation {
        return (config.aggregation_ttl, TtlTier::Aggregation);
    }
    if let Some(end) = date_range_end {
        if (now - end).num_days() < 1 {
            return (config.recent_ttl, TtlTier::Recent);
        }
    }
    (config.historical_ttl, TtlTier::Historical)
}

/// Whether a tier-2 key name should be swept by the broad background
/// invalidation rule (spec §4.4 "Background invalidation": any key whose
/// name encodes `"date"` or `"recent"`).
#[must_use]
pub fn is_freshness_sensitive_key(key: &str) -> bool {
    key.contains("date") || key.contains("recent")
}
