//! The two flavors of admission dimension (spec §4.7).
//!
//! "Identity" here is deliberately a plain string the embedding transport
//! supplies — an API key hash, a plan name, or a client address — this
//! crate never looks up who a caller is (identity lookup is an external
//! collaborator, spec §1).

use serde::{Deserialize, Serialize};

use crate::config::AdmissionConfig;

/// Plan-based request-count tier (spec §4.7 "Plan-based request limiter").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    /// Free tier.
    Free,
    /// Paid-per-request (x402) tier.
    X402,
    /// Enterprise tier.
    Enterprise,
}

impl PlanTier {
    /// Stable tier name used in cache keys and the response payload.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::X402 => "x402",
            Self::Enterprise => "enterprise",
        }
    }

    /// Requests/minute limit for this tier, from `config`.
    #[must_use]
    pub fn limit(self, config: &AdmissionConfig) -> u32 {
        match self {
            Self::Free => config.plan_free,
            Self::X402 => config.plan_x402,
            Self::Enterprise => config.plan_enterprise,
        }
    }
}

/// Cost-based cumulative-complexity tier (spec §4.7 "Cost-based limiter
/// (alternative profile)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostTier {
    /// `cost50` tier.
    Cost50,
    /// `cost100` tier.
    Cost100,
    /// `cost200` tier.
    Cost200,
    /// `cost500` tier.
    Cost500,
    /// `cost1000` tier.
    Cost1000,
}

impl CostTier {
    /// Stable tier name used in cache keys and the response payload.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cost50 => "cost50",
            Self::Cost100 => "cost100",
            Self::Cost200 => "cost200",
            Self::Cost500 => "cost500",
            Self::Cost1000 => "cost1000",
        }
    }

    /// Cumulative complexity-score budget/minute for this tier, from `config`.
    #[must_use]
    pub fn limit(self, config: &AdmissionConfig) -> f64 {
        match self {
            Self::Cost50 => config.cost_50,
            Self::Cost100 => config.cost_100,
            Self::Cost200 => config.cost_200,
            Self::Cost500 => config.cost_500,
            Self::Cost1000 => config.cost_1000,
        }
    }
}
