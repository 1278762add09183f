//! Orchestrator-level tunables, distinct from the per-component configs it
//! wires together (`gateway_cache::CacheConfig`, `gateway_admission::AdmissionConfig`).

use serde::{Deserialize, Serialize};

/// Thresholds governing the three shape-based rejection rules the
/// orchestrator applies between estimation and admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Complexity score above which a request is denied outright
    /// (`graphql.maxComplexity`, default 1000).
    pub complexity_ceiling: f64,
    /// Row-estimate threshold above which a non-aggregation scan must
    /// paginate explicitly rather than fetch the whole result.
    pub pagination_required_threshold: u64,
    /// Row-estimate threshold an aggregation's group count is checked
    /// against. Carried over verbatim from the documented rule
    /// `min(estimatedRows, 10_000) > 10_000`, which can never be true for
    /// any `u64` value — see `DESIGN.md` for why this is kept as written
    /// rather than silently replaced with a formula that fires.
    pub group_blowup_threshold: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { complexity_ceiling: 1000.0, pagination_required_threshold: 10_000, group_blowup_threshold: 10_000 }
    }
}

impl OrchestratorConfig {
    /// Reject configurations that would make every request either always
    /// pass or always fail a rule.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.complexity_ceiling > 0.0) {
            return Err("complexity_ceiling must be positive".to_owned());
        }
        if self.pagination_required_threshold == 0 {
            return Err("pagination_required_threshold must be positive".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_ceiling_rejected() {
        let config = OrchestratorConfig { complexity_ceiling: 0.0, ..OrchestratorConfig::default() };
        assert!(config.validate().is_err());
    }
}
