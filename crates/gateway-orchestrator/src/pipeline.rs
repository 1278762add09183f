//! Request Orchestrator (C8): glues the compiler, estimator, admission
//! controller, cache and warehouse pool into the single typed-query
//! pipeline a request walks through end to end.
//!
//! `RECEIVED -> VALIDATED -> ESTIMATED -> ADMITTED -> CACHED_HIT? ->
//! COMPILED -> EXECUTED -> PAGED -> CACHED -> RESPONDED`. `VALIDATED` and
//! `COMPILED` share one [`gateway_compiler::compile`] call up front — it is
//! pure and IO-free, so compiling once and reusing the result on a cache
//! miss costs nothing extra and avoids a second pass over the same spec.

use std::sync::Arc;
use std::time::Duration;

use gateway_admission::{AdmissionConfig, CostTier, PlanTier, check_cost, check_plan};
use gateway_cache::{CacheConfig, TwoTierCache, get_cache_ttl};
use gateway_compiler::RequestSpec;
use gateway_error::{GatewayError, Result};
use gateway_store::SharedStore;
use gateway_wire::WarehousePool;
use tracing::warn;

use crate::config::OrchestratorConfig;
use crate::connection::{Connection, build_connection};

/// Bound placed on a sanitized free-text passthrough query, distinct from
/// the typed pipeline's complexity-derived timeout tiers.
const PASSTHROUGH_TIMEOUT: Duration = Duration::from_secs(30);

/// Which admission limiter flavor a caller's plan maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionProfile {
    /// Plan-based: a flat request count per window.
    Plan(PlanTier),
    /// Cost-based: a cumulative complexity-score budget per window.
    Cost(CostTier),
}

/// Everything the orchestrator needs to carry a request from spec to
/// response: the warehouse pool, the two-tier cache, the shared store
/// backing both the cache's tier-2 and the admission controller, and the
/// configs each component owns.
pub struct Orchestrator {
    /// Round-robin warehouse connection pool.
    pub pool: Arc<WarehousePool>,
    /// Two-tier result cache.
    pub cache: Arc<TwoTierCache>,
    /// Shared TTL store backing admission windows (and the cache's tier-2,
    /// already wired into `cache`).
    pub store: Arc<dyn SharedStore>,
    /// TTL policy tunables, needed here only to compute a fresh result's TTL.
    pub cache_config: CacheConfig,
    /// Admission limiter tunables.
    pub admission_config: AdmissionConfig,
    /// Orchestrator-owned thresholds (complexity ceiling, pagination/group-blowup).
    pub config: OrchestratorConfig,
}

impl Orchestrator {
    /// Assemble an orchestrator from its already-constructed components.
    #[must_use]
    pub fn new(
        pool: Arc<WarehousePool>,
        cache: Arc<TwoTierCache>,
        store: Arc<dyn SharedStore>,
        cache_config: CacheConfig,
        admission_config: AdmissionConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self { pool, cache, store, cache_config, admission_config, config }
    }
}

fn cache_key_for(spec: &RequestSpec) -> Result<String> {
    let prefix = format!("{}:{}", spec.table.as_str(), if spec.is_aggregation() { "aggregate" } else { "scan" });
    let params = serde_json::to_value(spec).map_err(|e| GatewayError::Internal { message: format!("failed to serialize request spec for cache key: {e}") })?;
    Ok(TwoTierCache::generate_key(&prefix, &params))
}

fn date_range_end(spec: &RequestSpec) -> Option<chrono::NaiveDate> {
    spec.filters.date_range.as_ref().and_then(|range| chrono::NaiveDate::parse_from_str(&range.end, "%Y-%m-%d").ok())
}

/// Run one typed request through the full pipeline and return its page.
///
/// # Errors
///
/// Returns [`GatewayError::Validation`]/compiler errors for a malformed
/// spec, [`GatewayError::QueryComplexityTooHigh`]/[`GatewayError::PaginationRequired`]/
/// [`GatewayError::TooManyGroups`] for the three shape-based rejection
/// rules, [`GatewayError::RateLimitExceeded`] on admission denial,
/// [`GatewayError::QuerySecurity`] if a bound parameter trips the
/// injection heuristics, and [`GatewayError::QueryExecutionError`] if the
/// warehouse round trip fails.
pub async fn orchestrate(orchestrator: &Orchestrator, identity: &str, admission: AdmissionProfile, spec: RequestSpec) -> Result<Connection> {
    // VALIDATED + (provisionally) COMPILED
    let compiled = gateway_compiler::compile(&spec)?;

    // ESTIMATED
    let complexity = gateway_estimator::calculate(&orchestrator.pool, spec.table, &spec.filters, &spec.group_by, &spec.metrics).await?;

    if complexity.score > orchestrator.config.complexity_ceiling {
        return Err(GatewayError::QueryComplexityTooHigh { score: complexity.score, ceiling: orchestrator.config.complexity_ceiling, recommendations: complexity.recommendations.clone() });
    }

    if !spec.is_aggregation() && complexity.estimated_rows > orchestrator.config.pagination_required_threshold && !spec.pagination.is_explicit() {
        return Err(GatewayError::PaginationRequired { estimated_rows: complexity.estimated_rows });
    }

    // Group blow-up: kept exactly as documented — see `OrchestratorConfig::group_blowup_threshold`.
    if spec.is_aggregation() && complexity.estimated_rows.min(orchestrator.config.group_blowup_threshold) > orchestrator.config.group_blowup_threshold {
        return Err(GatewayError::TooManyGroups { estimated_groups: complexity.estimated_rows });
    }

    // ADMITTED
    match admission {
        AdmissionProfile::Plan(plan) => {
            check_plan(&orchestrator.store, &orchestrator.admission_config, identity, plan).await?;
        }
        AdmissionProfile::Cost(tier) => {
            check_cost(&orchestrator.store, &orchestrator.admission_config, identity, tier, complexity.score).await?;
        }
    }

    // CACHED_HIT?
    let cache_key = cache_key_for(&spec)?;
    if let Some(cached) = orchestrator.cache.get_async(&cache_key).await {
        match serde_json::from_str::<Connection>(&cached) {
            Ok(connection) => return Ok(connection),
            Err(e) => warn!(error = %e, %cache_key, "cached payload failed to deserialize, recomputing"),
        }
    }

    // Every bound parameter is checked here, regardless of path — the
    // compiler never runs this itself, so this is the one place a typed
    // request's values meet the injection heuristics before reaching the
    // warehouse.
    let params_map: serde_json::Map<String, serde_json::Value> =
        compiled.params.iter().map(|(name, value)| (name.clone(), serde_json::to_value(value).unwrap_or(serde_json::Value::Null))).collect();
    if let Err((field, validation)) = gateway_security::validate_params(&params_map) {
        return Err(GatewayError::QuerySecurity { reason: format!("parameter '{field}' rejected: {}", validation.reason.unwrap_or_default()) });
    }

    // EXECUTED
    let rendered_params: Vec<(String, serde_json::Value)> =
        compiled.params.iter().map(|(name, value)| (name.clone(), serde_json::to_value(value).unwrap_or(serde_json::Value::Null))).collect();
    let rows = orchestrator.pool.query_with_params(&compiled.sql, &rendered_params, complexity.score).await?;

    // PAGED
    let connection = build_connection(&spec, rows, compiled.limit);

    // CACHED: tier-1 write is synchronous inside `cache.set`, tier-2 is
    // fire-and-forget. Never let a serialization hiccup fail the response.
    match serde_json::to_string(&connection) {
        Ok(payload) => {
            let hit_count = orchestrator.cache.hit_count(&cache_key);
            let (ttl, _tier) = get_cache_ttl(&orchestrator.cache_config, hit_count, spec.is_aggregation(), date_range_end(&spec), chrono::Utc::now().date_naive());
            orchestrator.cache.set(cache_key, payload, ttl, spec.is_aggregation(), date_range_end(&spec));
        }
        Err(e) => warn!(error = %e, "failed to serialize connection for cache write"),
    }

    // RESPONDED
    Ok(connection)
}

/// Execute a sanitized, read-only free-text SQL passthrough, bypassing
/// the compiler, estimator, admission and cache entirely.
///
/// # Errors
///
/// Returns [`GatewayError::QuerySecurity`] if `sql` fails the read-only
/// validation rules (write keyword, stacked statements, missing/oversized
/// `LIMIT`, ...). Propagates [`GatewayError::QueryExecutionError`] on
/// warehouse failure.
pub async fn execute_passthrough_sql(pool: &WarehousePool, sql: &str) -> Result<Vec<serde_json::Value>> {
    let validation = gateway_security::validate_read_only(sql);
    if !validation.valid {
        return Err(GatewayError::QuerySecurity { reason: validation.reason.unwrap_or_else(|| "rejected".to_owned()) });
    }
    let sanitized = gateway_security::sanitize(sql);
    pool.query_with_timeout(&sanitized, PASSTHROUGH_TIMEOUT).await
}
