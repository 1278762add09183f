//! Graceful shutdown coordination, modeled on
//! `fraiseql_runtime::lifecycle::shutdown::ShutdownCoordinator`: an atomic
//! "shutting down" flag, a broadcast signal components subscribe to, and
//! an in-flight request counter drained with a bounded timeout.
//!
//! The sequence a [`Shutdown`] drives here fits this gateway rather than
//! an HTTP server's own: stop accepting new export job submissions, drain
//! in-flight OLAP queries up to their own existing deadline, then give
//! the cache's tier-2 write queue (`gateway_cache::TwoTierCache`, whose
//! doc notes "dropping every clone ... is how the queue shuts down") a
//! bounded grace period to flush before the caller drops the pool and
//! store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{info, warn};

/// Bounds the in-flight drain and the tier-2 flush grace period.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight OLAP queries and export jobs to
    /// finish before giving up and shutting down anyway.
    pub drain_timeout: Duration,
    /// Fixed grace period given to the cache's tier-2 write queue after
    /// the drain completes, since `WriteQueue` workers have no explicit
    /// join handle to await directly.
    pub tier2_flush_grace: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { drain_timeout: Duration::from_secs(30), tier2_flush_grace: Duration::from_millis(500) }
    }
}

/// Coordinates the gateway's graceful shutdown: new export submissions and
/// new requests stop being admitted immediately, in-flight work is given
/// `drain_timeout` to finish, then the tier-2 write queue gets
/// `tier2_flush_grace` before the caller tears down the pool and store.
pub struct Shutdown {
    shutting_down: AtomicBool,
    in_flight: AtomicU64,
    drain_complete: Notify,
    config: ShutdownConfig,
}

impl Shutdown {
    /// Build a shutdown coordinator. Nothing is shutting down yet.
    #[must_use]
    pub fn new(config: ShutdownConfig) -> Arc<Self> {
        Arc::new(Self { shutting_down: AtomicBool::new(false), in_flight: AtomicU64::new(0), drain_complete: Notify::new(), config })
    }

    /// True once [`Shutdown::initiate`] has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Register an in-flight unit of work (an admitted OLAP query or an
    /// export job submission). Returns `None` once shutdown has begun, so
    /// callers reject new work rather than race the drain.
    pub fn track(&self) -> Option<InFlightGuard<'_>> {
        if self.is_shutting_down() {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(InFlightGuard { shutdown: self })
    }

    /// Current count of admitted work the drain is waiting on.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn completed(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutting_down() {
            self.drain_complete.notify_waiters();
        }
    }

    /// Run the shutdown sequence: stop admitting new work, drain what's
    /// in flight (bounded by `drain_timeout`), then hold for
    /// `tier2_flush_grace` so the cache's fire-and-forget tier-2 writes
    /// have a chance to land before the caller drops the pool and store.
    ///
    /// Idempotent: a second call while shutdown is already underway
    /// returns immediately.
    pub async fn initiate(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("gateway shutdown initiated, no longer admitting new requests or export jobs");

        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if in_flight > 0 {
            info!(in_flight, "draining in-flight work");
            match timeout(self.config.drain_timeout, self.wait_for_drain()).await {
                Ok(()) => info!("in-flight work drained"),
                Err(_) => {
                    let remaining = self.in_flight.load(Ordering::SeqCst);
                    warn!(remaining, "shutdown drain timeout reached with work still in flight");
                }
            }
        }

        tokio::time::sleep(self.config.tier2_flush_grace).await;
        info!("gateway shutdown complete");
    }

    async fn wait_for_drain(&self) {
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            self.drain_complete.notified().await;
        }
    }
}

/// RAII guard decrementing the in-flight counter on drop.
pub struct InFlightGuard<'a> {
    shutdown: &'a Shutdown,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.shutdown.completed();
    }
}

/// Resolves once the process receives Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            std::future::pending::<()>().await;
            unreachable!()
        };
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
