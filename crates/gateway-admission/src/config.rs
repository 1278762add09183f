//! Admission controller configuration (spec §4.7, §6).
//!
//! Mirrors `gateway-cache::config::CacheConfig`'s style: a `Default` impl
//! carrying the numeric defaults, plus an eager `validate` the embedding
//! gateway runs at startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Plan-based and cost-based rate-limit tiers plus the shared sliding
/// window length (spec §4.7: "Both use a counter key in the shared TTL
/// store with the window's TTL").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Whether admission control is active at all. When `false`, every
    /// request passes through regardless of plan or cost (spec §4.7:
    /// "If rate limiting is disabled by config, pass through").
    pub enabled: bool,
    /// Sliding window length, shared by both limiter flavors.
    ///
    /// Default: 60s.
    pub window: Duration,
    /// Requests/minute for the `free` plan tier.
    ///
    /// Default: 100.
    pub plan_free: u32,
    /// Requests/minute for the `x402` plan tier.
    ///
    /// Default: 500.
    pub plan_x402: u32,
    /// Requests/minute for the `enterprise` plan tier.
    ///
    /// Default: 2,000.
    pub plan_enterprise: u32,
    /// Cumulative complexity-score budget/minute for the `cost50` tier.
    pub cost_50: f64,
    /// Cumulative complexity-score budget/minute for the `cost100` tier.
    pub cost_100: f64,
    /// Cumulative complexity-score budget/minute for the `cost200` tier.
    pub cost_200: f64,
    /// Cumulative complexity-score budget/minute for the `cost500` tier.
    pub cost_500: f64,
    /// Cumulative complexity-score budget/minute for the `cost1000` tier.
    pub cost_1000: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(60),
            plan_free: 100,
            plan_x402: 500,
            plan_enterprise: 2_000,
            cost_50: 50.0,
            cost_100: 100.0,
            cost_200: 200.0,
            cost_500: 500.0,
            cost_1000: 1_000.0,
        }
    }
}

impl AdmissionConfig {
    /// Validate the eagerly-checkable invariants (SPEC_FULL §1.1: "config
    /// hot bounds validation at startup").
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.window.is_zero() {
            return Err("admission.window must be greater than zero".to_owned());
        }
        if self.plan_free == 0 || self.plan_x402 == 0 || self.plan_enterprise == 0 {
            return Err("admission plan tiers must be greater than zero".to_owned());
        }
        Ok(())
    }
}
