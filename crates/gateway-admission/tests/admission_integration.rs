//! Black-box integration tests for the sliding-window admission
//! controller, driven through [`check_plan`]/[`check_cost`] against an
//! in-process shared store — the orchestrator never talks to the
//! limiter internals directly either.
//!
//! To run:
//!   cargo test -p gateway-admission --test admission_integration

use std::sync::Arc;

use gateway_admission::{check_cost, check_plan, AdmissionConfig, CostTier, PlanTier};
use gateway_error::GatewayError;
use gateway_store::{InProcessStore, SharedStore};

fn store() -> Arc<dyn SharedStore> {
    Arc::new(InProcessStore::new())
}

fn tight_plan_config() -> AdmissionConfig {
    AdmissionConfig { plan_free: 3, ..AdmissionConfig::default() }
}

fn tight_cost_config() -> AdmissionConfig {
    AdmissionConfig { cost_50: 10.0, ..AdmissionConfig::default() }
}

#[tokio::test]
async fn plan_based_limiter_admits_up_to_the_tier_limit_then_denies() {
    let store = store();
    let config = tight_plan_config();

    for _ in 0..3 {
        let decision = check_plan(&store, &config, "caller-a", PlanTier::Free).await.expect("within-budget requests are admitted");
        assert!(decision.allowed);
    }

    let err = check_plan(&store, &config, "caller-a", PlanTier::Free).await.unwrap_err();
    assert!(matches!(err, GatewayError::RateLimitExceeded { .. }), "the request past the free-tier limit must be denied");
}

#[tokio::test]
async fn plan_based_limiter_tracks_each_identity_independently() {
    let store = store();
    let config = tight_plan_config();

    for _ in 0..3 {
        check_plan(&store, &config, "caller-a", PlanTier::Free).await.expect("caller-a stays under budget");
    }
    check_plan(&store, &config, "caller-a", PlanTier::Free).await.unwrap_err();

    let decision = check_plan(&store, &config, "caller-b", PlanTier::Free).await.expect("a distinct identity has its own window");
    assert!(decision.allowed);
}

#[tokio::test]
async fn cost_based_limiter_admits_under_budget_and_denies_over_it() {
    let store = store();
    let config = tight_cost_config();

    let first = check_cost(&store, &config, "caller-c", CostTier::Cost50, 6.0).await.expect("first request fits the budget");
    assert!(first.allowed);

    let err = check_cost(&store, &config, "caller-c", CostTier::Cost50, 6.0).await.unwrap_err();
    assert!(matches!(err, GatewayError::RateLimitExceeded { .. }), "cumulative score of 12.0 exceeds the 10.0 cost50 budget");
}

#[tokio::test]
async fn a_denied_cost_request_does_not_consume_the_window_budget() {
    let store = store();
    let config = tight_cost_config();

    check_cost(&store, &config, "caller-d", CostTier::Cost50, 6.0).await.expect("first request fits");
    check_cost(&store, &config, "caller-d", CostTier::Cost50, 20.0).await.unwrap_err();

    let decision = check_cost(&store, &config, "caller-d", CostTier::Cost50, 3.0).await.expect("denied request must not have consumed budget");
    assert!(decision.allowed, "6.0 + 3.0 = 9.0 is still under the 10.0 budget if the 20.0 denial was correctly rolled back");
}

#[tokio::test]
async fn disabling_admission_control_passes_every_request_through() {
    let store = store();
    let config = AdmissionConfig { enabled: false, plan_free: 1, ..AdmissionConfig::default() };

    for _ in 0..10 {
        let decision = check_plan(&store, &config, "caller-e", PlanTier::Free).await.expect("disabled admission never denies");
        assert!(decision.allowed);
    }
}

#[tokio::test]
async fn rate_limit_decision_headers_carry_the_tier_and_retry_after() {
    let store = store();
    let config = tight_plan_config();
    for _ in 0..3 {
        check_plan(&store, &config, "caller-f", PlanTier::Free).await.expect("within budget");
    }
    let err = check_plan(&store, &config, "caller-f", PlanTier::Free).await.unwrap_err();
    match err {
        GatewayError::RateLimitExceeded { identity, tier, .. } => {
            assert_eq!(identity, "caller-f");
            assert_eq!(tier, "free");
        }
        other => panic!("expected RateLimitExceeded, got {other:?}"),
    }
}
