//! Aggregate gateway configuration (SPEC_FULL §1.1 SUPPLEMENT: "config hot
//! bounds validation at startup").
//!
//! Mirrors the per-component `Default` + `validate()` style used
//! throughout the workspace (see `gateway_cache::CacheConfig`,
//! `gateway_admission::AdmissionConfig`, `gateway_export::ExportConfig`),
//! rolled up into the one struct an embedder loads from TOML and passes to
//! [`crate::Gateway::start`]. Invalid bounds — `pool.min_connections >
//! pool.max_connections`, a zero cache capacity, a zero admission window —
//! are rejected eagerly here rather than surfacing as a confusing failure
//! on the first request.

use serde::{Deserialize, Serialize};

use gateway_admission::AdmissionConfig;
use gateway_cache::CacheConfig;
use gateway_export::ExportConfig;
use gateway_orchestrator::OrchestratorConfig;
use gateway_wire::WarehouseConfig;

/// Every component's configuration, wired together under one TOML
/// document. Field names follow the per-component config structs; see
/// their own docs for defaults and meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Warehouse HTTP client pool (C2).
    pub warehouse: WarehouseConfig,
    /// Two-tier cache (C4).
    pub cache: CacheConfig,
    /// Admission controller (C7).
    pub admission: AdmissionConfig,
    /// Orchestrator shape-rejection thresholds (C8).
    pub orchestrator: OrchestratorConfig,
    /// Export job engine (C9).
    pub export: ExportConfig,
    /// Redis URL for the shared TTL store (C3). `None` runs the
    /// in-process fallback, which only makes sense for a single
    /// instance / local development (spec §4.3 Non-goals).
    pub redis_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            warehouse: WarehouseConfig::default(),
            cache: CacheConfig::default(),
            admission: AdmissionConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            export: ExportConfig::default(),
            redis_url: None,
        }
    }
}

impl GatewayConfig {
    /// Parse a `GatewayConfig` from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns the `toml` parse error's description.
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Validate every component's own eager bounds plus the cross-cutting
    /// invariants that don't belong to any one component (the warehouse
    /// pool's `min <= max`).
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant found, in
    /// component order: warehouse, cache, admission, orchestrator, export.
    pub fn validate(&self) -> Result<(), String> {
        if self.warehouse.urls.is_empty() {
            return Err("warehouse.urls must not be empty".to_owned());
        }
        if self.warehouse.min_connections > self.warehouse.max_connections {
            return Err("warehouse.min_connections must not exceed warehouse.max_connections".to_owned());
        }
        if self.warehouse.max_connections == 0 {
            return Err("warehouse.max_connections must be greater than zero".to_owned());
        }
        self.cache.validate()?;
        self.admission.validate()?;
        self.orchestrator.validate()?;
        self.export.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let mut config = GatewayConfig::default();
        config.warehouse.min_connections = 50;
        config.warehouse.max_connections = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_warehouse_urls() {
        let mut config = GatewayConfig::default();
        config.warehouse.urls.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn propagates_component_validation_errors() {
        let mut config = GatewayConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = GatewayConfig::from_toml(
            r#"
            redis_url = "redis://localhost:6379"

            [warehouse]
            urls = ["http://ch1:8123", "http://ch2:8123"]
            min_connections = 20
            max_connections = 200
            connect_timeout = { secs = 5, nanos = 0 }
            idle_timeout = { secs = 60, nanos = 0 }
            compression = true

            [cache]
            max_entries = 5000
            memory_cache_ttl = { secs = 300, nanos = 0 }
            hot_ttl = { secs = 3600, nanos = 0 }
            aggregation_ttl = { secs = 1800, nanos = 0 }
            recent_ttl = { secs = 300, nanos = 0 }
            historical_ttl = { secs = 86400, nanos = 0 }
            invalidation_interval = { secs = 60, nanos = 0 }
            hot_hit_threshold = 5

            [admission]
            enabled = true
            window = { secs = 60, nanos = 0 }
            plan_free = 100
            plan_x402 = 500
            plan_enterprise = 2000
            cost_50 = 50.0
            cost_100 = 100.0
            cost_200 = 200.0
            cost_500 = 500.0
            cost_1000 = 1000.0

            [orchestrator]
            complexity_ceiling = 1000.0
            pagination_required_threshold = 10000
            group_blowup_threshold = 10000

            [export]
            dir = "./exports"
            expiration_hours = 24
            min_free_space_gb = 20
            max_total_size_gb = 100
            max_file_size_gb = 5
            worker_count = 2
            chunk_size = 50000
            chunk_timeout = { secs = 600, nanos = 0 }
            backoff_base = { secs = 2, nanos = 0 }
            max_attempts = 3
            failed_retention = { secs = 604800, nanos = 0 }
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(config.warehouse.urls.len(), 2);
        assert!(config.validate().is_ok());
    }
}
