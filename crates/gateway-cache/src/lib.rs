//! Two-Tier Cache (C4): in-process LRU fronting a shared TTL store.
//!
//! [`TwoTierCache`] is the single entry point the orchestrator (C8) talks
//! to: [`TwoTierCache::get_sync`] (tier-1 only, never suspends),
//! [`TwoTierCache::get_async`] (tier-1 then tier-2, promoting hits back),
//! [`TwoTierCache::set`] (tier-1 synchronous, tier-2 fire-and-forget),
//! [`TwoTierCache::del`], and [`TwoTierCache::generate_key`].

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod tier1;
pub mod ttl;
mod writer;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use gateway_store::SharedStore;
use gateway_wire::WarehousePool;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use invalidation::MaxBlockTime;
pub use key::generate_key;
pub use ttl::{TtlTier, get_cache_ttl};

use tier1::Tier1;
use writer::WriteQueue;

/// Wire shape written to tier-2: everything [`TwoTierCache::get_async`]
/// needs to reconstruct a [`CacheEntry`] with the correct *remaining*
/// TTL after a promotion from tier-2 back into tier-1.
#[derive(Debug, Serialize, Deserialize)]
struct Tier2Envelope {
    value: String,
    ttl_secs: u64,
    inserted_at_epoch_ms: u64,
    recent_marker: bool,
}

fn now_epoch_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// The two-tier result cache.
pub struct TwoTierCache {
    tier1: Arc<Tier1>,
    tier2: Arc<dyn SharedStore>,
    config: CacheConfig,
    write_queue: WriteQueue,
    max_block_time: Arc<MaxBlockTime>,
    invalidation_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TwoTierCache {
    /// Build a cache over `tier2`, with `write_worker_count` background
    /// workers draining the fire-and-forget tier-2 write queue
    /// (`write_channel_capacity` entries deep).
    #[must_use]
    pub fn new(
        config: CacheConfig,
        tier2: Arc<dyn SharedStore>,
        write_worker_count: usize,
        write_channel_capacity: usize,
    ) -> Self {
        let tier1 = Arc::new(Tier1::new(config.max_entries, config.memory_cache_ttl));
        let write_queue = WriteQueue::spawn(Arc::clone(&tier2), write_worker_count, write_channel_capacity);
        Self {
            tier1,
            tier2,
            config,
            write_queue,
            max_block_time: Arc::new(MaxBlockTime::new()),
            invalidation_handle: std::sync::Mutex::new(None),
        }
    }

    /// Start the background freshness-invalidation ticker against `pool`.
    ///
    /// Idempotent: a second call aborts the previous ticker before
    /// spawning a new one, so reconfiguring the interval at runtime never
    /// leaks a task.
    pub fn start_invalidation_ticker(self: &Arc<Self>, pool: Arc<WarehousePool>) {
        let handle = invalidation::spawn(
            pool,
            Arc::clone(&self.tier2),
            Arc::clone(&self.tier1),
            Arc::clone(&self.max_block_time),
            self.config.invalidation_interval,
        );
        let mut slot = self.invalidation_handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background invalidation ticker, if running (part of the
    /// gateway's graceful shutdown sequence, SPEC_FULL §1.1).
    pub fn stop_invalidation_ticker(&self) {
        let mut slot = self.invalidation_handle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }

    /// Stable canonical cache key: `"cache:" + prefix + ":" + hash(sorted_params)`.
    #[must_use]
    pub fn generate_key(prefix: &str, params: &serde_json::Value) -> String {
        key::generate_key(prefix, params)
    }

    /// Tier-1-only lookup. Non-blocking, never suspends: a single map
    /// lookup plus a TTL compare (spec §4.4 `getSync`).
    #[must_use]
    pub fn get_sync(&self, key: &str) -> Option<String> {
        self.tier1.get(key)
    }

    /// Tier-1 first; on miss, consult tier-2 and promote a hit back into
    /// tier-1 (spec §4.4 `getAsync`).
    ///
    /// Any tier-2 failure is swallowed and counted as a miss — it never
    /// propagates to the caller (spec §4.4 "Failure semantics").
    pub async fn get_async(&self, key: &str) -> Option<String> {
        if let Some(hit) = self.tier1.get(key) {
            return Some(hit);
        }

        let raw = match self.tier2.get(key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%key, error = %e, "tier-2 read failed, treating as cache miss");
                return None;
            }
        };
        let raw = raw?;
        let Ok(envelope) = serde_json::from_str::<Tier2Envelope>(&raw) else {
            warn!(%key, "malformed tier-2 cache envelope, treating as cache miss");
            return None;
        };

        let elapsed_ms = now_epoch_ms().saturating_sub(envelope.inserted_at_epoch_ms);
        let ttl_ms = envelope.ttl_secs.saturating_mul(1000);
        if elapsed_ms >= ttl_ms {
            return None;
        }
        let remaining = Duration::from_millis(ttl_ms - elapsed_ms);

        let entry = CacheEntry::new(envelope.value.clone(), remaining, envelope.recent_marker);
        self.tier1.set(key.to_owned(), entry);
        Some(envelope.value)
    }

    /// Insert `value` under `key`. Tier-1 is updated synchronously; the
    /// tier-2 write is posted to the fire-and-forget queue and never
    /// delays the caller (spec §4.4 `set`, §4.8 latency budget).
    ///
    /// `ttl` is selected by the caller via [`get_cache_ttl`] (which needs
    /// this key's lifetime hit count from [`Self::hit_count`]); `is_aggregation`
    /// and `date_range_end` only affect the caller's own TTL selection and
    /// are accepted here for symmetry with `getCacheTTL`'s own signature,
    /// not re-derived.
    pub fn set(&self, key: String, value: String, ttl: Duration, is_aggregation: bool, date_range_end: Option<NaiveDate>) {
        let _ = (is_aggregation, date_range_end); // callers select ttl via get_cache_ttl before calling set
        let recent_marker = ttl::is_freshness_sensitive_key(&key);
        let entry = CacheEntry::new(value.clone(), ttl, recent_marker);
        self.tier1.set(key.clone(), entry);

        let envelope = Tier2Envelope {
            value,
            ttl_secs: ttl.as_secs(),
            inserted_at_epoch_ms: now_epoch_ms(),
            recent_marker,
        };
        match serde_json::to_string(&envelope) {
            Ok(payload) => self.write_queue.enqueue_set(key, payload, ttl.as_secs()),
            Err(e) => warn!(error = %e, "failed to serialize tier-2 cache envelope"),
        }
    }

    /// Remove `key`. Tier-1 is synchronous; tier-2 is best-effort (spec
    /// §4.4 `del`).
    pub fn del(&self, key: &str) {
        self.tier1.del(key);
        self.write_queue.enqueue_del(key.to_owned());
    }

    /// Lifetime hit count for `key`, consulted by the TTL policy's "hit
    /// count > 5" rule before a fresh `set`.
    #[must_use]
    pub fn hit_count(&self, key: &str) -> u64 {
        self.tier1.hit_count(key)
    }

    /// Number of tier-2 writes dropped due to a full fire-and-forget
    /// queue since construction (observability surface, not part of the
    /// spec's public contract).
    #[must_use]
    pub fn dropped_tier2_writes(&self) -> u64 {
        self.write_queue.dropped_count()
    }

    /// Current number of live tier-1 entries.
    #[must_use]
    pub fn tier1_len(&self) -> usize {
        self.tier1.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::InProcessStore;
    use std::time::Duration;

    fn cache() -> Arc<TwoTierCache> {
        let store: Arc<dyn SharedStore> = Arc::new(InProcessStore::new());
        Arc::new(TwoTierCache::new(CacheConfig::default(), store, 2, 64))
    }

    #[tokio::test]
    async fn set_then_get_sync_round_trips_without_suspending() {
        let cache = cache();
        cache.set("k".into(), "v".into(), Duration::from_secs(60), false, None);
        assert_eq!(cache.get_sync("k"), Some("v".to_owned()));
    }

    #[tokio::test]
    async fn get_async_promotes_tier2_hit_into_tier1() {
        let store: Arc<dyn SharedStore> = Arc::new(InProcessStore::new());
        let cache = TwoTierCache::new(CacheConfig::default(), Arc::clone(&store), 1, 16);

        // Simulate a value that only lives in tier-2 (e.g. written by a
        // different process instance) by writing the envelope directly.
        let envelope = Tier2Envelope {
            value: "from-tier2".into(),
            ttl_secs: 60,
            inserted_at_epoch_ms: now_epoch_ms(),
            recent_marker: false,
        };
        store.setex("k", &serde_json::to_string(&envelope).unwrap(), 60).await.unwrap();

        assert_eq!(cache.get_sync("k"), None, "must not be in tier-1 yet");
        assert_eq!(cache.get_async("k").await, Some("from-tier2".to_owned()));
        assert_eq!(cache.get_sync("k"), Some("from-tier2".to_owned()), "must be promoted into tier-1");
    }

    #[tokio::test]
    async fn del_removes_from_tier1_immediately() {
        let cache = cache();
        cache.set("k".into(), "v".into(), Duration::from_secs(60), false, None);
        cache.del("k");
        assert_eq!(cache.get_sync("k"), None);
    }

    #[tokio::test]
    async fn generate_key_is_stable_across_param_order() {
        let a = serde_json::json!({"first": 10, "protocols": ["pump_fun"]});
        let b = serde_json::json!({"protocols": ["pump_fun"], "first": 10});
        assert_eq!(TwoTierCache::generate_key("scan", &a), TwoTierCache::generate_key("scan", &b));
    }

    #[tokio::test]
    async fn missing_key_is_a_clean_miss_on_both_tiers() {
        let cache = cache();
        assert_eq!(cache.get_sync("missing"), None);
        assert_eq!(cache.get_async("missing").await, None);
    }
}
