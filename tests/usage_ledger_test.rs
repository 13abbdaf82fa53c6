//! Usage ledger integration: context attribution, sink failures and shutdown drain

mod common;

use prospect_core::config::UsageLedgerConfig;
use prospect_core::usage::{
    sink_from_config, BillingCategory, MemoryUsageSink, QueryType, UsageContext, UsageLedger,
    UsageLedgerHandle, UsageLogParams,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn ledger_with_sink(capacity: usize) -> (UsageLedgerHandle, MemoryUsageSink, tokio::task::JoinHandle<()>) {
    let sink = MemoryUsageSink::new();
    let (ledger, handle) = UsageLedger::new(Arc::new(sink.clone()), capacity, Duration::from_secs(1));
    let join = tokio::spawn(ledger.run());
    (handle, sink, join)
}

#[tokio::test]
async fn test_shutdown_drains_queued_entries() {
    common::init_test_logging();
    let (handle, sink, join) = ledger_with_sink(64);

    for i in 0..10 {
        let mut params = UsageLogParams::new("google_places");
        params.query_type = Some(QueryType::Discovery);
        params.results_returned = Some(i);
        assert!(handle.log(params));
    }

    let result = handle.shutdown().await;
    assert!(result.success);
    join.await.unwrap();

    assert_eq!(sink.len(), 10);
    assert_eq!(handle.stats().written, 10);
    assert!(!handle.is_running());

    // Closed ledger drops instead of blocking
    assert!(!handle.log(UsageLogParams::new("google_places")));
    assert_eq!(handle.stats().dropped, 1);
}

#[tokio::test]
async fn test_scoped_handles_attribute_campaign_and_session() {
    let (handle, sink, join) = ledger_with_sink(16);

    let campaign = handle.with_context(&UsageContext {
        campaign_id: Some("0b6b9f3e-1f7a-4c2e-9d3b-5a8f6e7c1d20".to_string()),
        job_id: Some("job-7".to_string()),
        ..UsageContext::default()
    });
    let mut params = UsageLogParams::new("cobalt");
    params.actual_cost = Some(0.9);
    params.request_params = Some(json!({"businessName": "acme llc", "apiKey": "secret"}));
    campaign.log(params);

    let mut params = UsageLogParams::new("cobalt");
    params.context.campaign_id = Some("not-a-uuid".to_string());
    params.estimated_cost = Some(0.9);
    handle.log(params);

    handle.shutdown().await;
    join.await.unwrap();

    let rows = sink.entries();
    assert_eq!(rows.len(), 2);

    assert!(rows[0].campaign_id.is_some());
    assert_eq!(rows[0].session_id.as_deref(), Some("job-7"));
    assert_eq!(rows[0].billing_category, BillingCategory::PaidUsage);

    assert!(rows[1].campaign_id.is_none());
    assert_eq!(rows[1].actual_cost, Some(0.9));
}

#[tokio::test]
async fn test_failing_sink_counts_failures_without_blocking_callers() {
    let (handle, sink, join) = ledger_with_sink(16);
    sink.fail_writes(true);

    for _ in 0..3 {
        assert!(handle.log(UsageLogParams::new("hunter")));
    }
    handle.shutdown().await;
    join.await.unwrap();

    let stats = handle.stats();
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.written, 0);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_disabled_ledger_accepts_and_discards() {
    let config = UsageLedgerConfig {
        enabled: false,
        ..UsageLedgerConfig::default()
    };
    let (handle, join) = UsageLedger::spawn(&config, sink_from_config(&config, None));

    assert!(join.is_none());
    assert!(!handle.is_enabled());
    assert!(!handle.log(UsageLogParams::new("google_places")));
    assert!(handle.shutdown().await.success);
}
