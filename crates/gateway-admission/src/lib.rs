//! Sliding-window admission control (C7).
//!
//! The orchestrator calls one of [`check_plan`] or [`check_cost`] right
//! after complexity estimation, before the request touches the cache or
//! warehouse (spec §1, §4.7). Both flavors share one sliding-window
//! primitive over a [`gateway_store::SharedStore`] counter keyed by
//! `identity` and tier, and both surface a denial as
//! [`gateway_error::GatewayError::RateLimitExceeded`] carrying the
//! [`Decision`] fields an HTTP transport turns into `X-RateLimit-*` and
//! `Retry-After` headers.
//!
//! Which flavor a deployment runs is a deployment choice (spec §4.7:
//! "Plan-based" vs "Cost-based (alternative profile)"), not something
//! this crate decides — the embedding gateway picks one per identity.

pub mod config;
pub mod decision;
pub mod identity;
pub mod limiter;

pub use config::AdmissionConfig;
pub use decision::Decision;
pub use identity::{CostTier, PlanTier};
pub use limiter::{check_cost, check_plan};
