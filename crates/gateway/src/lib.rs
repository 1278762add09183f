//! Solana transaction analytics gateway: the umbrella crate wiring every
//! component into one embeddable runtime.
//!
//! Re-exports the public API of each component crate (query security C1,
//! the warehouse pool C2, the shared TTL store C3, the two-tier cache C4,
//! the query compiler C5, the complexity estimator C6, the admission
//! controller C7, the request orchestrator C8, and the export job engine
//! C9) and adds the ambient operational surface a deployable system
//! carries beyond its individual components: [`GatewayConfig`]
//! aggregation with eager startup validation,
//! [`health`] probes, and [`shutdown`] coordination modeled on the
//! teacher's `fraiseql_runtime` lifecycle module.
//!
//! [`Gateway::start`] is the one entry point an embedder needs: it builds
//! the warehouse pool, the shared store, the two-tier cache (starting its
//! invalidation ticker), the orchestrator, and the export engine (starting
//! its reaper), all from one [`GatewayConfig`].

pub mod config;
pub mod health;
pub mod shutdown;

pub use config::GatewayConfig;
pub use health::{check as check_health, is_ready, DependencyHealth, HealthReport};
pub use shutdown::{Shutdown, ShutdownConfig};

// Re-export each component's public API under its own module path so an
// embedder depending only on `gateway` gets the whole surface.
pub use gateway_admission as admission;
pub use gateway_cache as cache;
pub use gateway_compiler as compiler;
pub use gateway_error as error;
pub use gateway_estimator as estimator;
pub use gateway_export as export;
pub use gateway_orchestrator as orchestrator;
pub use gateway_security as security;
pub use gateway_store as store;
pub use gateway_wire as wire;

use std::sync::Arc;
use std::time::Duration;

use gateway_cache::TwoTierCache;
use gateway_error::{GatewayError, Result};
use gateway_export::ExportEngine;
use gateway_orchestrator::Orchestrator;
use gateway_store::{InProcessStore, RedisStore, SharedStore};
use gateway_wire::WarehousePool;
use tracing::info;

/// Interval between the export engine's expiration sweeps (spec §4.9:
/// "runs hourly").
const REAPER_INTERVAL: Duration = Duration::from_secs(3600);
/// Write queue sizing for the two-tier cache's tier-2 fire-and-forget
/// writes: a small fixed worker pool over a deep channel.
const CACHE_WRITE_WORKERS: usize = 4;
const CACHE_WRITE_CHANNEL_CAPACITY: usize = 1_024;

/// Every live component the gateway wires from one [`GatewayConfig`].
pub struct Gateway {
    /// Warehouse HTTP client pool (C2).
    pub pool: Arc<WarehousePool>,
    /// Shared TTL store backing the cache's tier-2 and admission windows (C3).
    pub store: Arc<dyn SharedStore>,
    /// Two-tier result cache (C4).
    pub cache: Arc<TwoTierCache>,
    /// Request orchestrator (C5-C8 glue).
    pub orchestrator: Arc<Orchestrator>,
    /// Export job engine (C9).
    pub export: Arc<ExportEngine>,
    /// Graceful shutdown coordinator.
    pub shutdown: Arc<Shutdown>,
}

impl Gateway {
    /// Validate `config`, then construct every component and start their
    /// background tasks (the cache's invalidation ticker, the export
    /// engine's reaper).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if `config` fails validation or
    /// if the warehouse pool or Redis connection fails to build.
    pub async fn start(config: GatewayConfig) -> Result<Self> {
        config.validate().map_err(|message| GatewayError::Internal { message: format!("invalid gateway configuration: {message}") })?;

        let pool = Arc::new(WarehousePool::new(&config.warehouse)?);

        let store: Arc<dyn SharedStore> = match &config.redis_url {
            Some(url) => {
                info!("connecting shared TTL store to redis");
                RedisStore::connect(url).await?.shared()
            }
            None => {
                info!("no redis_url configured, falling back to the in-process shared store (single-instance only)");
                Arc::new(InProcessStore::new())
            }
        };

        let cache = Arc::new(TwoTierCache::new(config.cache, Arc::clone(&store), CACHE_WRITE_WORKERS, CACHE_WRITE_CHANNEL_CAPACITY));
        cache.start_invalidation_ticker(Arc::clone(&pool));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&pool),
            Arc::clone(&cache),
            Arc::clone(&store),
            config.cache,
            config.admission,
            config.orchestrator,
        ));

        let export = Arc::new(ExportEngine::new(config.export, Arc::clone(&store), Arc::clone(&pool)));
        gateway_export::spawn_reaper(Arc::clone(&export), REAPER_INTERVAL);

        let shutdown = Shutdown::new(ShutdownConfig::default());

        Ok(Self { pool, store, cache, orchestrator, export, shutdown })
    }

    /// Probe the warehouse pool and shared store.
    pub async fn health(&self) -> HealthReport {
        health::check(&self.pool, &self.store).await
    }

    /// Run the graceful shutdown sequence: stop admitting new work, drain
    /// what's in flight, flush the cache's tier-2 write queue, then stop
    /// the cache's invalidation ticker so nothing touches the pool after
    /// the caller drops it.
    pub async fn graceful_shutdown(&self) {
        self.shutdown.initiate().await;
        self.cache.stop_invalidation_ticker();
    }
}
