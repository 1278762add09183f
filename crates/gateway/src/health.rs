//! Health and readiness probes.
//!
//! Deliberately a plain async function surface rather than an HTTP
//! endpoint: this gateway is a library sitting in front of the warehouse,
//! not a standalone service, so wiring an actual `/healthz` route is left
//! to the embedder (an axum or actix app can call [`check`] from its own
//! handler).

use std::sync::Arc;

use gateway_store::SharedStore;
use gateway_wire::WarehousePool;
use serde::Serialize;

/// Outcome of probing one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    /// Dependency name (`"warehouse"` or `"shared_store"`).
    pub name: &'static str,
    /// `true` if the probe succeeded.
    pub healthy: bool,
    /// Error description if `healthy` is `false`.
    pub detail: Option<String>,
}

/// Aggregate health report: the warehouse pool and the shared TTL store.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Per-dependency results.
    pub dependencies: Vec<DependencyHealth>,
}

impl HealthReport {
    /// `true` only if every dependency reported healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.dependencies.iter().all(|d| d.healthy)
    }
}

/// Probe every dependency the gateway needs to serve a request:
/// at least one warehouse connection and the shared TTL store.
pub async fn check(pool: &Arc<WarehousePool>, store: &Arc<dyn SharedStore>) -> HealthReport {
    let warehouse = match pool.health().await {
        Ok(()) => DependencyHealth { name: "warehouse", healthy: true, detail: None },
        Err(e) => DependencyHealth { name: "warehouse", healthy: false, detail: Some(e.to_string()) },
    };
    let shared_store = match store.health().await {
        Ok(()) => DependencyHealth { name: "shared_store", healthy: true, detail: None },
        Err(e) => DependencyHealth { name: "shared_store", healthy: false, detail: Some(e.to_string()) },
    };
    HealthReport { dependencies: vec![warehouse, shared_store] }
}

/// Readiness is a stricter subset of liveness for this gateway: there is
/// no separate "alive but not ready" state, so readiness is just whether
/// every dependency currently answers.
#[must_use]
pub fn is_ready(report: &HealthReport) -> bool {
    report.is_healthy()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_healthy_only_when_every_dependency_is() {
        let healthy = HealthReport {
            dependencies: vec![
                DependencyHealth { name: "warehouse", healthy: true, detail: None },
                DependencyHealth { name: "shared_store", healthy: true, detail: None },
            ],
        };
        assert!(healthy.is_healthy());
        assert!(is_ready(&healthy));

        let degraded = HealthReport {
            dependencies: vec![
                DependencyHealth { name: "warehouse", healthy: false, detail: Some("timeout".to_owned()) },
                DependencyHealth { name: "shared_store", healthy: true, detail: None },
            ],
        };
        assert!(!degraded.is_healthy());
        assert!(!is_ready(&degraded));
    }
}
