//! Background freshness invalidation (spec §4.4 "Background invalidation").
//!
//! A single ticker periodically probes the warehouse's freshest
//! `block_time`. When it strictly advances past the last observed value,
//! every tier-2 key whose name encodes `"date"` or `"recent"` is deleted
//! (spec §9 Open Question: the broad literal rule ships, not the narrowed
//! marker-based variant — see [`crate::ttl::is_freshness_sensitive_key`]).
//!
//! Warehouse ingest is append-only, so only recently-bounded queries can
//! become stale; historical and signature-keyed results never need this
//! sweep.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use gateway_store::SharedStore;
use gateway_wire::WarehousePool;
use tracing::{info, warn};

use crate::ttl::is_freshness_sensitive_key;
use crate::tier1::Tier1;

/// Single-writer cached freshest `block_time` seen so far (spec §5: "single
/// atomic pointer read").
pub struct MaxBlockTime(AtomicI64);

impl MaxBlockTime {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicI64::new(i64::MIN))
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }
}

impl Default for MaxBlockTime {
    fn default() -> Self {
        Self::new()
    }
}

const PROBE_SQL: &str = "SELECT max(block_time) AS max_block_time FROM transactions";

/// Run one invalidation pass: probe, compare, and (if advanced) sweep.
///
/// Exposed standalone so tests can drive a single pass deterministically
/// instead of waiting on the ticker's interval.
pub async fn run_once(
    pool: &WarehousePool,
    tier2: &dyn SharedStore,
    tier1: &Tier1,
    max_block_time: &MaxBlockTime,
) {
    let rows = match pool.query_with_timeout(PROBE_SQL, std::time::Duration::from_secs(5)).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "invalidation probe query failed");
            return;
        }
    };

    let Some(observed) = rows.first().and_then(|r| r.get("max_block_time")).and_then(serde_json::Value::as_i64) else {
        return;
    };

    let previous = max_block_time.get();
    if observed <= previous {
        return;
    }
    max_block_time.set(observed);
    if previous == i64::MIN {
        // First observation after startup: nothing was cached under a
        // stale watermark yet, so there is nothing to sweep.
        return;
    }

    info!(previous, observed, "warehouse freshness advanced, sweeping freshness-sensitive cache keys");
    let keys = match tier2.keys("cache:*").await {
        Ok(keys) => keys,
        Err(e) => {
            warn!(error = %e, "failed to enumerate tier-2 keys during invalidation sweep");
            return;
        }
    };
    for key in keys.iter().filter(|k| is_freshness_sensitive_key(k)) {
        tier1.del(key);
        if let Err(e) = tier2.del(key).await {
            warn!(%key, error = %e, "failed to delete tier-2 key during invalidation sweep");
        }
    }
}

/// Spawn the invalidation ticker as a background task.
///
/// Runs until the returned [`tokio::task::JoinHandle`] is aborted (the
/// cache's graceful-shutdown sequence does this, SPEC_FULL §1.1).
pub fn spawn(
    pool: Arc<WarehousePool>,
    tier2: Arc<dyn SharedStore>,
    tier1: Arc<Tier1>,
    max_block_time: Arc<MaxBlockTime>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            run_once(&pool, tier2.as_ref(), tier1.as_ref(), max_block_time.as_ref()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_watermark_starts_below_any_real_block_time() {
        let m = MaxBlockTime::new();
        assert_eq!(m.get(), i64::MIN);
    }

    #[test]
    fn watermark_advances_monotonically() {
        let m = MaxBlockTime::new();
        m.set(100);
        assert_eq!(m.get(), 100);
        m.set(200);
        assert_eq!(m.get(), 200);
    }
}
