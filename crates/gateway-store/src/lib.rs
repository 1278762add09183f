//! Shared TTL key-value store (C3, "tier-2").
//!
//! Backs the cross-instance parts of the gateway: the cache's tier-2
//! layer (`gateway-cache`), the admission controller's sliding-window
//! counters (`gateway-admission`), and durable export job records
//! (`gateway-export`). A single [`SharedStore`] trait covers both
//! deployment shapes: [`RedisStore`] for a real multi-instance gateway,
//! and [`InProcessStore`] for single-instance or test deployments where
//! standing up Redis is unnecessary overhead.
//!
//! Every caller of this store must treat its unavailability as
//! survivable: callers needing "fail open" semantics (the cache) swallow
//! [`gateway_error::GatewayError::CacheTier2Fail`] and callers needing
//! correctness (the admission controller) propagate it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_error::{GatewayError, Result};
use tracing::warn;

/// Cross-instance key-value store with per-key expiry and atomic counters.
///
/// Keys and values are always UTF-8 strings; structured payloads are
/// JSON-encoded by the caller before `setex` and decoded after `get`.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set `key` to `value` with a time-to-live of `ttl_secs` seconds.
    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Atomically increment `key` (creating it at 0 first if absent) and
    /// (re)set its TTL to `ttl_secs`, returning the post-increment value.
    ///
    /// Used by the sliding-window rate limiter, where the TTL refresh on
    /// every increment keeps an idle dimension's counter from outliving
    /// its window.
    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64>;

    /// Remove `key`, if present.
    async fn del(&self, key: &str) -> Result<()>;

    /// List every key matching a `*`-glob `pattern`.
    ///
    /// Used for the cache's broad invalidation rule (`"recentTransactions*"`
    /// style prefix matches) rather than point lookups.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// A cheap liveness probe for the gateway's readiness endpoint.
    async fn health(&self) -> Result<()>;
}

/// Match a Redis-style glob pattern (only `*` is supported — sufficient
/// for the prefix- and substring-style invalidation rules this store
/// actually needs).
fn glob_match(pattern: &str, candidate: &str) -> bool {
    let mut parts = pattern.split('*').peekable();
    let Some(first) = parts.next() else { return candidate.is_empty() };

    if !candidate.starts_with(first) {
        return false;
    }
    let mut rest = &candidate[first.len()..];
    let has_wildcard = pattern.contains('*');
    if !has_wildcard {
        return rest.is_empty();
    }

    while let Some(part) = parts.next() {
        if part.is_empty() {
            continue;
        }
        let is_last = parts.peek().is_none();
        if is_last {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

struct InProcessEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl InProcessEntry {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|at| at > Instant::now())
    }
}

/// Single-process, in-memory [`SharedStore`] backed by a [`DashMap`].
///
/// Correct for a single gateway instance; does not coordinate across
/// processes, so a multi-instance deployment must use [`RedisStore`]
/// instead.
#[derive(Default)]
pub struct InProcessStore {
    entries: DashMap<String, InProcessEntry>,
}

impl InProcessStore {
    /// Build an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for InProcessStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entries.get(key) {
            Some(entry) if entry.is_live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.entries.insert(
            key.to_owned(),
            InProcessEntry { value: value.to_owned(), expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)) },
        );
        Ok(())
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        let mut entry = self.entries.entry(key.to_owned()).or_insert_with(|| InProcessEntry {
            value: "0".to_owned(),
            expires_at,
        });
        if !entry.is_live() {
            entry.value = "0".to_owned();
        }
        let next: i64 = entry.value.parse().unwrap_or(0) + 1;
        entry.value = next.to_string();
        entry.expires_at = expires_at;
        Ok(next)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.is_live() && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Redis-backed [`SharedStore`], correct across any number of gateway
/// instances sharing one Redis deployment.
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to `redis_url` and build a store backed by a
    /// [`redis::aio::ConnectionManager`], which transparently reconnects
    /// on connection loss.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::CacheTier2Fail`] if the initial connection
    /// fails.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| GatewayError::CacheTier2Fail { message: e.to_string() })?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| GatewayError::CacheTier2Fail { message: e.to_string() })?;
        Ok(Self { manager })
    }

    /// Wrap this store in an `Arc` for sharing across the cache,
    /// admission controller, and export queue.
    #[must_use]
    pub fn shared(self) -> Arc<dyn SharedStore> {
        Arc::new(self)
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::CacheTier2Fail { message: e.to_string() })
    }

    async fn setex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::CacheTier2Fail { message: e.to_string() })
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut conn = self.manager.clone();
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::CacheTier2Fail { message: e.to_string() })?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::CacheTier2Fail { message: e.to_string() })
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::CacheTier2Fail { message: e.to_string() })
    }

    async fn health(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| GatewayError::CacheTier2Fail { message: e.to_string() })?;
        if pong == "PONG" {
            Ok(())
        } else {
            warn!(response = %pong, "unexpected PING response from redis");
            Err(GatewayError::CacheTier2Fail { message: format!("unexpected PING response: {pong}") })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_match_supports_prefix_suffix_and_substring() {
        assert!(glob_match("recentTransactions*", "recentTransactionsSOL"));
        assert!(!glob_match("recentTransactions*", "otherKey"));
        assert!(glob_match("*:free", "ratelimit:apikey123:free"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactish"));
    }

    #[tokio::test]
    async fn in_process_store_round_trips_values() {
        let store = InProcessStore::new();
        store.setex("k", "v", 60).await.expect("setex succeeds");
        assert_eq!(store.get("k").await.expect("get succeeds"), Some("v".to_owned()));
    }

    #[tokio::test]
    async fn in_process_store_expires_entries() {
        let store = InProcessStore::new();
        store.setex("k", "v", 0).await.expect("setex succeeds");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get("k").await.expect("get succeeds"), None);
    }

    #[tokio::test]
    async fn in_process_store_incr_counts_up_from_zero() {
        let store = InProcessStore::new();
        assert_eq!(store.incr("counter", 60).await.expect("incr succeeds"), 1);
        assert_eq!(store.incr("counter", 60).await.expect("incr succeeds"), 2);
        assert_eq!(store.incr("counter", 60).await.expect("incr succeeds"), 3);
    }

    #[tokio::test]
    async fn in_process_store_keys_filters_by_glob() {
        let store = InProcessStore::new();
        store.setex("recentTransactionsSOL", "1", 60).await.expect("setex succeeds");
        store.setex("recentTransactionsUSDC", "1", 60).await.expect("setex succeeds");
        store.setex("other", "1", 60).await.expect("setex succeeds");

        let mut matched = store.keys("recentTransactions*").await.expect("keys succeeds");
        matched.sort();
        assert_eq!(matched, vec!["recentTransactionsSOL".to_owned(), "recentTransactionsUSDC".to_owned()]);
    }

    #[tokio::test]
    async fn in_process_store_del_removes_key() {
        let store = InProcessStore::new();
        store.setex("k", "v", 60).await.expect("setex succeeds");
        store.del("k").await.expect("del succeeds");
        assert_eq!(store.get("k").await.expect("get succeeds"), None);
    }
}
