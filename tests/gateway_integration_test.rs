//! End-to-end tests for the enrichment gateway over in-memory components

mod common;

use prospect_core::cache::registry::STATE_REGISTRY_REQUEST_TYPE;
use prospect_core::cache::{CacheLookupResult, StateRegistryLookup};
use prospect_core::error::{DownstreamFailureKind, ErrorStage, ProspectError};
use prospect_core::resilience::CircuitState;
use prospect_core::test_utils::TestGatewayBuilder;
use prospect_core::tier::{CacheStrategy, Tier, TierTtlOverrides};
use prospect_core::usage::{BillingCategory, UsageContext};
use prospect_core::GatewayRequest;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn hunter(tier: &str, domain: &str) -> GatewayRequest {
    GatewayRequest::new("hunter", "hunter_domain", json!({"domain": domain, "limit": 10}), 0.034)
        .with_tier(tier)
        .with_endpoint("/v2/domain-search")
}

#[tokio::test]
async fn test_state_registry_lookups_share_one_entry_across_spellings() {
    common::init_test_logging();
    let harness = TestGatewayBuilder::new().build();
    let cancel = CancellationToken::new();
    let calls = AtomicU32::new(0);

    let first = StateRegistryLookup::new("Acme LLC", "ca").with_tier("professional");
    let second = StateRegistryLookup::new("  Acme LLC ", "CA").with_tier("Professional");

    let live = || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, String>(json!({"entity": "ACME LLC", "status": "active", "confidenceScore": 92})) }
    };

    let request = harness.gateway.state_registry_request(&first);
    assert_eq!(request.request_type, STATE_REGISTRY_REQUEST_TYPE);
    assert_eq!(request.cost, 0.9);

    let miss = harness.gateway.execute(request, live, &cancel).await.unwrap();
    assert!(!miss.cache_hit);
    harness.settle().await;

    let request = harness.gateway.state_registry_request(&second);
    let hit = harness.gateway.execute(request, live, &cancel).await.unwrap();

    assert!(hit.cache_hit);
    assert_eq!(hit.cache_key, miss.cache_key);
    assert_eq!(hit.metadata.as_ref().and_then(|m| m.confidence_score), Some(92));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_strategy_per_tier() {
    let harness = TestGatewayBuilder::new().build();
    let gateway = &harness.gateway;

    assert_eq!(gateway.resolver().resolve(Some("starter")).strategy, CacheStrategy::CacheOnly);
    assert_eq!(
        gateway.resolver().resolve(Some("unknown-plan")).strategy,
        CacheStrategy::CachePreferred
    );
    assert_eq!(gateway.resolver().resolve(Some("compliance")).strategy, CacheStrategy::LiveRefresh);
    assert!(gateway.resolver().resolve(Some("enterprise")).force_live_lookup);
}

#[tokio::test]
async fn test_cache_only_tier_serves_entries_written_by_other_callers() {
    let harness = TestGatewayBuilder::new().build();
    let cancel = CancellationToken::new();

    // Starter keys match other tiers' keys only when params carry no tier, as here
    harness
        .gateway
        .execute(hunter("professional", "acme.com"), || async { Ok::<_, String>(json!({"emails": 4})) }, &cancel)
        .await
        .unwrap();
    harness.settle().await;

    let outcome = harness
        .gateway
        .execute(hunter("starter", "acme.com"), || async { Err::<Value, _>("must not be called") }, &cancel)
        .await
        .unwrap();
    assert!(outcome.cache_hit);
    assert_eq!(outcome.data, json!({"emails": 4}));

    let err = harness
        .gateway
        .execute(hunter("starter", "other.com"), || async { Err::<Value, _>("must not be called") }, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.stage(), ErrorStage::CacheLookup);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_entries_expire_after_tier_ttl() {
    let harness = TestGatewayBuilder::new()
        .ttl_overrides(TierTtlOverrides::none().with_seconds(Tier::Professional, 120.0))
        .build();
    let cancel = CancellationToken::new();
    let calls = AtomicU32::new(0);
    let live = || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, String>(json!({"emails": 1})) }
    };

    let outcome = harness.gateway.execute(hunter("professional", "acme.com"), live, &cancel).await.unwrap();
    assert_eq!(outcome.policy.ttl_seconds, 120);
    harness.settle().await;

    harness.clock.advance(Duration::from_secs(60));
    assert!(harness.gateway.execute(hunter("professional", "acme.com"), live, &cancel).await.unwrap().cache_hit);

    harness.clock.advance(Duration::from_secs(61));
    let refreshed = harness.gateway.execute(hunter("professional", "acme.com"), live, &cancel).await.unwrap();
    assert!(!refreshed.cache_hit);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_breaker_opens_and_recovers_after_cooldown() {
    let harness = TestGatewayBuilder::new()
        .failure_threshold(2)
        .cooldown(Duration::from_secs(30))
        .build();
    let cancel = CancellationToken::new();
    let calls = AtomicU32::new(0);

    for _ in 0..2 {
        let err = harness
            .gateway
            .execute(
                hunter("professional", "down.com"),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<Value, _>("503 service unavailable") }
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProspectError::Downstream { kind: DownstreamFailureKind::Failed, .. }));
    }
    assert_eq!(harness.gateway.breakers().state("hunter"), CircuitState::Open);

    let rejected = harness
        .gateway
        .execute(
            hunter("professional", "down.com"),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(json!({})) }
            },
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(rejected, ProspectError::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    harness.clock.advance(Duration::from_secs(31));
    let probe = harness
        .gateway
        .execute(hunter("professional", "down.com"), || async { Ok::<_, String>(json!({"emails": 0})) }, &cancel)
        .await
        .unwrap();
    assert!(!probe.cache_hit);
    assert_eq!(harness.gateway.breakers().state("hunter"), CircuitState::Closed);
}

#[tokio::test]
async fn test_breakers_are_isolated_per_service() {
    let harness = TestGatewayBuilder::new().failure_threshold(1).build();
    let cancel = CancellationToken::new();

    let _ = harness
        .gateway
        .execute(hunter("professional", "x.com"), || async { Err::<Value, _>("boom") }, &cancel)
        .await;
    assert_eq!(harness.gateway.breakers().state("hunter"), CircuitState::Open);

    let places = GatewayRequest::new("google_places", "places_search", json!({"query": "pizza"}), 0.032);
    let outcome = harness
        .gateway
        .execute(places, || async { Ok::<_, String>(json!([])) }, &cancel)
        .await
        .unwrap();
    assert!(!outcome.cache_hit);
}

#[tokio::test]
async fn test_live_refresh_falls_back_to_cache_when_circuit_open() {
    let harness = TestGatewayBuilder::new().build();
    let cancel = CancellationToken::new();

    harness
        .gateway
        .execute(hunter("enterprise", "acme.com"), || async { Ok::<_, String>(json!({"emails": 7})) }, &cancel)
        .await
        .unwrap();
    harness.settle().await;

    harness.gateway.breakers().force_open("hunter");
    let outcome = harness
        .gateway
        .execute(hunter("enterprise", "acme.com"), || async { Ok::<_, String>(json!({"emails": 8})) }, &cancel)
        .await
        .unwrap();

    assert!(outcome.stale_fallback);
    assert_eq!(outcome.data, json!({"emails": 7}));
    assert_eq!(outcome.cost_incurred, 0.0);
    harness.settle().await;

    // The live row from the first call, then a single cache-hit row
    let rows = harness.sink.entries();
    assert_eq!(rows.len(), 2);
    assert!(rows[1].cache_hit);
    assert_eq!(rows[1].estimated_cost, Some(0.0));
}

#[tokio::test]
async fn test_abandoned_recovery_request_does_not_wedge_the_breaker() {
    let harness = TestGatewayBuilder::new()
        .failure_threshold(1)
        .cooldown(Duration::from_secs(60))
        .build();
    let cancel = CancellationToken::new();

    let _ = harness
        .gateway
        .execute(hunter("professional", "down.com"), || async { Err::<Value, _>("503") }, &cancel)
        .await;
    assert_eq!(harness.gateway.breakers().state("hunter"), CircuitState::Open);
    harness.clock.advance(Duration::from_secs(61));

    // The request that took the recovery slot is dropped by its caller
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        harness.gateway.execute(
            hunter("professional", "down.com"),
            || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, String>(json!({}))
            },
            &cancel,
        ),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(harness.gateway.breakers().state("hunter"), CircuitState::HalfOpen);

    let outcome = harness
        .gateway
        .execute(hunter("professional", "down.com"), || async { Ok::<_, String>(json!({"emails": 2})) }, &cancel)
        .await
        .unwrap();
    assert!(!outcome.cache_hit);
    assert_eq!(harness.gateway.breakers().state("hunter"), CircuitState::Closed);
}

#[tokio::test]
async fn test_cancelled_call_is_not_a_service_failure() {
    let harness = TestGatewayBuilder::new().failure_threshold(1).build();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = harness
        .gateway
        .execute(
            hunter("professional", "slow.com"),
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, String>(json!({}))
            },
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ProspectError::Downstream { kind: DownstreamFailureKind::Cancelled, .. }));
    assert!(!err.is_retryable());
    assert_eq!(harness.gateway.breakers().state("hunter"), CircuitState::Closed);
}

#[tokio::test]
async fn test_min_store_interval_keeps_first_write() {
    let harness = TestGatewayBuilder::new()
        .min_store_interval(Duration::from_secs(60))
        .build();
    let cancel = CancellationToken::new();

    for version in 1..=2 {
        harness
            .gateway
            .execute(hunter("enterprise", "acme.com"), move || async move { Ok::<_, String>(json!({"v": version})) }, &cancel)
            .await
            .unwrap();
        harness.settle().await;
    }

    let stored = harness
        .gateway
        .cache()
        .lookup("hunter_domain", &json!({"domain": "acme.com", "limit": 10}))
        .await
        .unwrap();
    match stored {
        CacheLookupResult::Hit { data, .. } => assert_eq!(data, json!({"v": 1})),
        CacheLookupResult::Miss { .. } => panic!("expected the first write to be cached"),
    }
    assert_eq!(harness.gateway.cache().stats().skipped_stores, 1);
}

#[tokio::test]
async fn test_usage_rows_carry_context_and_billing() {
    let harness = TestGatewayBuilder::new().build();
    let cancel = CancellationToken::new();
    let context = UsageContext {
        campaign_id: Some("6f1c2a34-5b6d-4e7f-8a9b-0c1d2e3f4a5b".to_string()),
        session_id: Some("session-42".to_string()),
        ..UsageContext::default()
    };

    let request = hunter("professional", "acme.com").with_context(context);
    harness
        .gateway
        .execute(request.clone(), || async { Ok::<_, String>(json!({"results": [1, 2]})) }, &cancel)
        .await
        .unwrap();
    harness.settle().await;
    harness
        .gateway
        .execute(request, || async { Ok::<_, String>(json!({})) }, &cancel)
        .await
        .unwrap();
    harness.settle().await;

    let rows = harness.sink.entries();
    assert_eq!(rows.len(), 2);

    let live = &rows[0];
    assert!(live.campaign_id.is_some());
    assert_eq!(live.session_id.as_deref(), Some("session-42"));
    assert_eq!(live.endpoint.as_deref(), Some("/v2/domain-search"));
    assert_eq!(live.actual_cost, Some(0.034));
    assert_eq!(live.billing_category, BillingCategory::PaidUsage);
    assert_eq!(live.results_returned, Some(2));
    assert_eq!(live.useful_results, Some(2));

    let cached = &rows[1];
    assert!(cached.cache_hit);
    assert_eq!(cached.billing_category, BillingCategory::FreeTier);
}
