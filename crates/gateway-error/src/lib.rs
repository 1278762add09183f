//! Unified error taxonomy for the analytics gateway.
//!
//! Every error that can reach a caller of the core pipeline (C1-C9) is a
//! variant of [`GatewayError`]. The taxonomy mirrors the table in the
//! specification's error handling design: each variant carries a stable
//! [`GatewayError::error_code`] and an [`GatewayError::http_status_hint`] so
//! that an external transport (HTTP, GraphQL, JSON-RPC) can map it without
//! this crate depending on any transport framework.
//!
//! # Propagation policy
//!
//! Typed business errors (validation, complexity, pagination, rate limit,
//! security) are never retried inside the orchestrator. Tier-2 cache
//! failures are always swallowed by the caching layer and never surface as
//! a [`GatewayError`] — see `gateway-cache`. Transient OLAP errors during
//! export chunking are retried by the export queue's own backoff, not by
//! the orchestrator.

use serde::Serialize;

/// Result type alias used throughout the gateway crates.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// The gateway's error taxonomy.
///
/// Variant order matches the pipeline stage each one is raised from:
/// validation, estimation, admission, cache, execution, export.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed request spec, unknown enum value, or a filter/table
    /// combination that isn't legal (e.g. `errorPattern` on `transactions`).
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description of what failed.
        message: String,
        /// Dotted path to the offending field, if known.
        field: Option<String>,
    },

    /// The complexity estimator's score exceeded the configured ceiling.
    #[error("query complexity too high: score {score} exceeds ceiling {ceiling}")]
    QueryComplexityTooHigh {
        /// The computed complexity score.
        score: f64,
        /// The configured ceiling that was exceeded.
        ceiling: f64,
        /// Suggestions for narrowing the request.
        recommendations: Vec<String>,
    },

    /// A scan would return more than 10,000 estimated rows and the caller
    /// did not supply `first`/`last` pagination.
    #[error("pagination is required: estimated {estimated_rows} rows")]
    PaginationRequired {
        /// The estimator's row estimate that triggered this error.
        estimated_rows: u64,
    },

    /// An aggregation would produce more than 10,000 groups.
    #[error("too many groups: estimated {estimated_groups} groups")]
    TooManyGroups {
        /// The estimator's group-count estimate that triggered this error.
        estimated_groups: u64,
    },

    /// The admission controller denied the request.
    #[error("rate limit exceeded for {identity}: {used}/{limit} in window")]
    RateLimitExceeded {
        /// The identity (API key plan, or client address) that was limited.
        identity: String,
        /// The tier name in effect (e.g. `"free"`, `"cost100"`).
        tier: String,
        /// Units consumed so far in the current window.
        used: f64,
        /// The limit for the active tier.
        limit: f64,
        /// Seconds until the caller should retry.
        retry_after_secs: u64,
    },

    /// The OLAP engine returned an error, or the per-query deadline expired.
    #[error("query execution error: {message}")]
    QueryExecutionError {
        /// Message from the OLAP engine or a timeout description.
        message: String,
        /// Whether the failure was a deadline expiry rather than an engine error.
        timed_out: bool,
    },

    /// The query-security validator rejected free-text SQL or a derived
    /// parameter value. Always logged; never masked by another error kind.
    #[error("query rejected by security validator: {reason}")]
    QuerySecurity {
        /// The specific rule that rejected the query.
        reason: String,
    },

    /// The shared TTL store (tier-2) was unavailable. Callers of
    /// `gateway-cache` never see this directly — it is swallowed and
    /// counted as a cache miss — but it is exposed here for the store's
    /// own health probe and for structured logging.
    #[error("cache tier-2 unavailable: {message}")]
    CacheTier2Fail {
        /// Description of the underlying failure.
        message: String,
    },

    /// Submitting an export job failed (e.g. insufficient disk space).
    #[error("export job creation error: {message}")]
    ExportJobCreationError {
        /// Description of why the job could not be created.
        message: String,
    },

    /// Processing an already-accepted export job failed.
    #[error("export processing error for job {job_id}: {message}")]
    ExportProcessingError {
        /// The job that failed.
        job_id: String,
        /// Description of the failure.
        message: String,
    },

    /// Anything else. Never includes sensitive details in its message.
    #[error("internal error: {message}")]
    Internal {
        /// A sanitized description safe to return to a caller.
        message: String,
    },
}

impl GatewayError {
    /// Stable machine-readable error code, one per taxonomy row.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::QueryComplexityTooHigh { .. } => "QUERY_COMPLEXITY_TOO_HIGH",
            Self::PaginationRequired { .. } => "PAGINATION_REQUIRED",
            Self::TooManyGroups { .. } => "TOO_MANY_GROUPS",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::QueryExecutionError { .. } => "QUERY_EXECUTION_ERROR",
            Self::QuerySecurity { .. } => "QUERY_SECURITY",
            Self::CacheTier2Fail { .. } => "CACHE_TIER2_FAIL",
            Self::ExportJobCreationError { .. } => "EXPORT_JOB_CREATION_ERROR",
            Self::ExportProcessingError { .. } => "EXPORT_PROCESSING_ERROR",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Suggested HTTP status an external transport may use, without this
    /// crate depending on an HTTP framework.
    #[must_use]
    pub fn http_status_hint(&self) -> u16 {
        match self {
            Self::Validation { .. }
            | Self::QueryComplexityTooHigh { .. }
            | Self::PaginationRequired { .. }
            | Self::TooManyGroups { .. }
            | Self::QuerySecurity { .. } => 400,
            Self::RateLimitExceeded { .. } => 429,
            Self::QueryExecutionError { .. }
            | Self::ExportJobCreationError { .. }
            | Self::ExportProcessingError { .. }
            | Self::Internal { .. } => 500,
            Self::CacheTier2Fail { .. } => 500,
        }
    }

    /// `Retry-After` seconds, when applicable.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimitExceeded { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Whether this error kind should ever be retried by its caller.
    ///
    /// Per the propagation policy, typed business errors are never retried
    /// inside the orchestrator. Only transient OLAP errors encountered
    /// while chunking an export are retried, and that retry lives in
    /// `gateway-export`'s own backoff loop, not here.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueryExecutionError { timed_out: false, .. })
    }
}

/// JSON-serializable error envelope, matching the wire shape in the
/// specification: `{error, message, extensions?}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    /// The stable error code (see [`GatewayError::error_code`]).
    pub error: &'static str,
    /// Human-readable message.
    pub message: String,
    /// Additional structured context (recommendations, tier, retry_after, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl From<&GatewayError> for ErrorEnvelope {
    fn from(err: &GatewayError) -> Self {
        let extensions = match err {
            GatewayError::QueryComplexityTooHigh { score, ceiling, recommendations } => {
                Some(serde_json::json!({
                    "score": score,
                    "ceiling": ceiling,
                    "recommendations": recommendations,
                }))
            }
            GatewayError::PaginationRequired { estimated_rows } => {
                Some(serde_json::json!({ "estimatedRows": estimated_rows }))
            }
            GatewayError::TooManyGroups { estimated_groups } => {
                Some(serde_json::json!({ "estimatedGroups": estimated_groups }))
            }
            GatewayError::RateLimitExceeded { tier, used, limit, retry_after_secs, .. } => {
                Some(serde_json::json!({
                    "tier": tier,
                    "used": used,
                    "limit": limit,
                    "retryAfter": retry_after_secs,
                }))
            }
            _ => None,
        };
        Self { error: err.error_code(), message: err.to_string(), extensions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_hints_match_taxonomy() {
        assert_eq!(
            GatewayError::Validation { message: "x".into(), field: None }.http_status_hint(),
            400
        );
        assert_eq!(
            GatewayError::RateLimitExceeded {
                identity: "free:abc".into(),
                tier: "free".into(),
                used: 100.0,
                limit: 100.0,
                retry_after_secs: 30,
            }
            .http_status_hint(),
            429
        );
        assert_eq!(
            GatewayError::Internal { message: "boom".into() }.http_status_hint(),
            500
        );
    }

    #[test]
    fn retry_after_only_present_on_rate_limit() {
        let err = GatewayError::RateLimitExceeded {
            identity: "x".into(),
            tier: "free".into(),
            used: 1.0,
            limit: 1.0,
            retry_after_secs: 12,
        };
        assert_eq!(err.retry_after_secs(), Some(12));

        let other = GatewayError::Internal { message: "x".into() };
        assert_eq!(other.retry_after_secs(), None);
    }

    #[test]
    fn only_transient_execution_errors_are_retryable() {
        let timeout_err = GatewayError::QueryExecutionError { message: "deadline".into(), timed_out: true };
        assert!(!timeout_err.is_retryable());

        let transient_err = GatewayError::QueryExecutionError { message: "connection reset".into(), timed_out: false };
        assert!(transient_err.is_retryable());

        let security_err = GatewayError::QuerySecurity { reason: "destructive keyword".into() };
        assert!(!security_err.is_retryable());
    }

    #[test]
    fn envelope_carries_complexity_recommendations() {
        let err = GatewayError::QueryComplexityTooHigh {
            score: 1234.5,
            ceiling: 1000.0,
            recommendations: vec!["use export".into()],
        };
        let envelope: ErrorEnvelope = (&err).into();
        assert_eq!(envelope.error, "QUERY_COMPLEXITY_TOO_HIGH");
        assert!(envelope.extensions.is_some());
    }
}
