//! Sliding-window limiter checks against a shared TTL store (spec §4.7).
//!
//! Both flavors key their window counter as `ratelimit:{identity}:{tier}`
//! and lean on the store's own TTL to expire the window — there is no
//! separate sweep. The plan-based flavor increments by exactly one
//! request, which `SharedStore::incr` supports atomically. The cost-based
//! flavor needs to add an arbitrary `f64` score per request, which
//! `incr` cannot express (it only ever adds one); that flavor instead
//! does a best-effort `get` + `setex` read-modify-write. The window is
//! approximate under concurrent writers for that path — an accepted
//! tradeoff ("Race on get+set: acceptable — the window is approximate").

use std::sync::Arc;

use gateway_error::{GatewayError, Result};
use gateway_store::SharedStore;
use tracing::debug;

use crate::config::AdmissionConfig;
use crate::decision::Decision;
use crate::identity::{CostTier, PlanTier};

/// Check and record one request against the plan-based request-count
/// limiter for `identity`.
///
/// # Errors
///
/// Returns [`GatewayError::RateLimitExceeded`] once `identity`'s plan
/// tier has used its full window budget. Propagates
/// [`GatewayError::CacheTier2Fail`] if the shared store is unreachable —
/// unlike the cache's tier-2 writes, admission correctness requires the
/// store to be up, so this is never swallowed.
pub async fn check_plan(
    store: &Arc<dyn SharedStore>,
    config: &AdmissionConfig,
    identity: &str,
    plan: PlanTier,
) -> Result<Decision> {
    if !config.enabled {
        return Ok(Decision { allowed: true, tier: plan.name(), used: 0.0, limit: f64::from(plan.limit(config)), retry_after_secs: 0 });
    }

    let limit = plan.limit(config);
    let window_secs = config.window.as_secs().max(1);
    let key = format!("ratelimit:{identity}:{}", plan.name());
    let used = store.incr(&key, window_secs).await?;
    let allowed = u64::try_from(used).unwrap_or(u64::MAX) <= u64::from(limit);

    debug!(identity, tier = plan.name(), used, limit, allowed, "plan-based admission check");

    let decision = Decision {
        allowed,
        tier: plan.name(),
        used: used as f64,
        limit: f64::from(limit),
        retry_after_secs: window_secs,
    };

    if decision.allowed {
        Ok(decision)
    } else {
        Err(GatewayError::RateLimitExceeded {
            identity: identity.to_owned(),
            tier: decision.tier.to_owned(),
            used: decision.used,
            limit: decision.limit,
            retry_after_secs: decision.retry_after_secs,
        })
    }
}

/// Check and record one request's `request_cost` against the cost-based
/// cumulative-complexity limiter for `identity`.
///
/// # Errors
///
/// Returns [`GatewayError::RateLimitExceeded`] if adding `request_cost`
/// would push `identity`'s cost tier over budget for the current window.
/// Propagates [`GatewayError::CacheTier2Fail`] if the shared store is
/// unreachable.
pub async fn check_cost(
    store: &Arc<dyn SharedStore>,
    config: &AdmissionConfig,
    identity: &str,
    tier: CostTier,
    request_cost: f64,
) -> Result<Decision> {
    if !config.enabled {
        return Ok(Decision { allowed: true, tier: tier.name(), used: 0.0, limit: tier.limit(config), retry_after_secs: 0 });
    }

    let limit = tier.limit(config);
    let window_secs = config.window.as_secs().max(1);
    let key = format!("ratelimit:{identity}:{}", tier.name());

    let previous: f64 = store.get(&key).await?.and_then(|s| s.parse().ok()).unwrap_or(0.0);
    let used = previous + request_cost;
    let allowed = used <= limit;

    // Only record the attempt (and thus consume budget) when it is
    // admitted; a denied request should not further starve the window.
    if allowed {
        store.setex(&key, &used.to_string(), window_secs).await?;
    }

    debug!(identity, tier = tier.name(), used, limit, allowed, "cost-based admission check");

    let decision =
        Decision { allowed, tier: tier.name(), used, limit, retry_after_secs: window_secs };

    if decision.allowed {
        Ok(decision)
    } else {
        Err(GatewayError::RateLimitExceeded {
            identity: identity.to_owned(),
            tier: decision.tier.to_owned(),
            used: decision.used,
            limit: decision.limit,
            retry_after_secs: decision.retry_after_secs,
        })
    }
}
