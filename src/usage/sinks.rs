//! Destinations for usage ledger rows

use super::entry::UsageLogEntry;
use crate::config::UsageLedgerConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageSinkError {
    #[error("Usage sink database error: {0}")]
    Database(String),

    #[error("Usage sink unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for UsageSinkError {
    fn from(err: sqlx::Error) -> Self {
        UsageSinkError::Database(err.to_string())
    }
}

/// Append-only store for usage rows
#[async_trait]
pub trait UsageSink: Send + Sync + std::fmt::Debug {
    async fn write(&self, entry: &UsageLogEntry) -> Result<(), UsageSinkError>;

    fn name(&self) -> &'static str;
}

/// Sink selected by `usage_ledger.sink`.
///
/// A Postgres sink without a pool falls back to the tracing sink.
pub fn sink_from_config(config: &UsageLedgerConfig, pool: Option<PgPool>) -> Arc<dyn UsageSink> {
    match (config.sink.as_str(), pool) {
        ("postgres", Some(pool)) => Arc::new(PostgresUsageSink::new(pool)),
        ("postgres", None) => {
            warn!("Postgres usage sink configured but no database pool available, logging usage to tracing only");
            Arc::new(TracingUsageSink)
        }
        ("memory", _) => Arc::new(MemoryUsageSink::new()),
        ("tracing", _) => Arc::new(TracingUsageSink),
        (other, _) => {
            warn!(sink = other, "Unknown usage sink, logging usage to tracing only");
            Arc::new(TracingUsageSink)
        }
    }
}

/// Inserts into `enhanced_api_usage`
#[derive(Clone)]
pub struct PostgresUsageSink {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresUsageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresUsageSink")
            .field("pool", &"PgPool")
            .finish()
    }
}

impl PostgresUsageSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageSink for PostgresUsageSink {
    async fn write(&self, entry: &UsageLogEntry) -> Result<(), UsageSinkError> {
        sqlx::query(
            r#"
            INSERT INTO enhanced_api_usage (
                request_id, campaign_id, session_id, source_name, endpoint, http_method,
                request_params, query_type, business_query, location_query, response_code,
                response_time_ms, results_returned, success, error_message, estimated_cost,
                actual_cost, cost_currency, billing_category, data_quality_score,
                useful_results, cache_hit, rate_limited, retry_count, created_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
            )
            "#,
        )
        .bind(entry.request_id)
        .bind(entry.campaign_id)
        .bind(&entry.session_id)
        .bind(&entry.source_name)
        .bind(&entry.endpoint)
        .bind(&entry.http_method)
        .bind(&entry.request_params)
        .bind(entry.query_type.map(|q| q.as_str()))
        .bind(&entry.business_query)
        .bind(&entry.location_query)
        .bind(entry.response_code)
        .bind(entry.response_time_ms)
        .bind(entry.results_returned)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.estimated_cost)
        .bind(entry.actual_cost)
        .bind(&entry.cost_currency)
        .bind(entry.billing_category.as_str())
        .bind(entry.data_quality_score)
        .bind(entry.useful_results)
        .bind(entry.cache_hit)
        .bind(entry.rate_limited)
        .bind(entry.retry_count)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

/// Keeps rows in process; used by tests and local runs
#[derive(Debug, Clone, Default)]
pub struct MemoryUsageSink {
    entries: Arc<Mutex<Vec<UsageLogEntry>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<UsageLogEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl UsageSink for MemoryUsageSink {
    async fn write(&self, entry: &UsageLogEntry) -> Result<(), UsageSinkError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(UsageSinkError::Unavailable(
                "memory sink writes disabled".to_string(),
            ));
        }
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Emits each row as a structured log event and stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn write(&self, entry: &UsageLogEntry) -> Result<(), UsageSinkError> {
        info!(
            request_id = %entry.request_id,
            source_name = %entry.source_name,
            query_type = entry.query_type.map(|q| q.as_str()),
            success = entry.success,
            cache_hit = entry.cache_hit,
            actual_cost = entry.actual_cost,
            billing_category = %entry.billing_category,
            response_code = entry.response_code,
            "USAGE"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::entry::{UsageContext, UsageLogParams};
    use chrono::Utc;

    fn sample() -> UsageLogEntry {
        UsageLogEntry::from_params(
            UsageLogParams::new("google_places"),
            &UsageContext::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_memory_sink_records_and_fails_on_demand() {
        let sink = MemoryUsageSink::new();
        sink.write(&sample()).await.unwrap();
        assert_eq!(sink.len(), 1);

        sink.fail_writes(true);
        assert!(sink.write(&sample()).await.is_err());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_sink_selection_without_pool() {
        let config = UsageLedgerConfig::default();
        assert_eq!(sink_from_config(&config, None).name(), "tracing");

        let config = UsageLedgerConfig {
            sink: "memory".to_string(),
            ..UsageLedgerConfig::default()
        };
        assert_eq!(sink_from_config(&config, None).name(), "memory");
    }
}
