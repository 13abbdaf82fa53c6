//! Usage log rows and the normalization applied before persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::{Uuid, Variant};

/// Longest string persisted as-is
pub const MAX_FIELD_CHARS: usize = 512;

/// Length kept from an over-long string before the ellipsis
const TRUNCATED_PREFIX_CHARS: usize = 509;

const ELLIPSIS: char = '…';

pub const DEFAULT_HTTP_METHOD: &str = "GET";

pub const DEFAULT_COST_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Discovery,
    Enrichment,
    Validation,
    Internal,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Discovery => "discovery",
            QueryType::Enrichment => "enrichment",
            QueryType::Validation => "validation",
            QueryType::Internal => "internal",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCategory {
    FreeTier,
    PaidUsage,
    Overage,
}

impl BillingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCategory::FreeTier => "free_tier",
            BillingCategory::PaidUsage => "paid_usage",
            BillingCategory::Overage => "overage",
        }
    }

    /// `paid_usage` when anything was billed, `free_tier` otherwise
    pub fn for_cost(cost: Option<f64>) -> Self {
        match cost {
            Some(cost) if cost > 0.0 => BillingCategory::PaidUsage,
            _ => BillingCategory::FreeTier,
        }
    }
}

impl fmt::Display for BillingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-scoped attribution merged into every entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageContext {
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub tier_key: Option<String>,
    #[serde(default)]
    pub business_query: Option<String>,
    #[serde(default)]
    pub location_query: Option<String>,
}

impl UsageContext {
    /// Field-wise merge; values set on `overrides` win
    pub fn merged_with(&self, overrides: &UsageContext) -> UsageContext {
        UsageContext {
            campaign_id: overrides.campaign_id.clone().or_else(|| self.campaign_id.clone()),
            session_id: overrides.session_id.clone().or_else(|| self.session_id.clone()),
            job_id: overrides.job_id.clone().or_else(|| self.job_id.clone()),
            tier_key: overrides.tier_key.clone().or_else(|| self.tier_key.clone()),
            business_query: overrides
                .business_query
                .clone()
                .or_else(|| self.business_query.clone()),
            location_query: overrides
                .location_query
                .clone()
                .or_else(|| self.location_query.clone()),
        }
    }
}

/// What a caller reports about one external call attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLogParams {
    pub source_name: String,
    #[serde(default)]
    pub request_id: Option<Uuid>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub request_params: Option<Value>,
    #[serde(default)]
    pub query_type: Option<QueryType>,
    #[serde(default)]
    pub response_code: Option<i32>,
    #[serde(default)]
    pub response_time_ms: Option<i32>,
    #[serde(default)]
    pub results_returned: Option<i32>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub actual_cost: Option<f64>,
    #[serde(default)]
    pub billing_category: Option<BillingCategory>,
    #[serde(default)]
    pub data_quality_score: Option<f64>,
    #[serde(default)]
    pub useful_results: Option<i32>,
    #[serde(default)]
    pub cache_hit: Option<bool>,
    #[serde(default)]
    pub rate_limited: Option<bool>,
    #[serde(default)]
    pub retry_count: Option<i32>,
    #[serde(flatten)]
    pub context: UsageContext,
}

impl UsageLogParams {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            ..Self::default()
        }
    }
}

/// One `enhanced_api_usage` row, ready to insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub request_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub source_name: String,
    pub endpoint: Option<String>,
    pub http_method: String,
    pub request_params: Option<Value>,
    pub query_type: Option<QueryType>,
    pub business_query: Option<String>,
    pub location_query: Option<String>,
    pub response_code: Option<i32>,
    pub response_time_ms: Option<i32>,
    pub results_returned: Option<i32>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub estimated_cost: Option<f64>,
    pub actual_cost: Option<f64>,
    pub cost_currency: String,
    pub billing_category: BillingCategory,
    pub data_quality_score: Option<f64>,
    pub useful_results: Option<i32>,
    pub cache_hit: bool,
    pub rate_limited: bool,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

impl UsageLogEntry {
    /// Apply defaults, attribution and size limits to reported params
    pub fn from_params(params: UsageLogParams, base: &UsageContext, now: DateTime<Utc>) -> Self {
        let context = base.merged_with(&params.context);

        let estimated_cost = round_cost(params.estimated_cost);
        let actual_cost = round_cost(params.actual_cost.or(params.estimated_cost));
        let billing_category = params
            .billing_category
            .unwrap_or_else(|| BillingCategory::for_cost(actual_cost));

        Self {
            request_id: params.request_id.unwrap_or_else(Uuid::new_v4),
            campaign_id: context.campaign_id.as_deref().and_then(parse_campaign_id),
            session_id: context.session_id.or(context.job_id).map(truncate_string),
            source_name: truncate_string(params.source_name),
            endpoint: params.endpoint.map(truncate_string),
            http_method: params
                .http_method
                .unwrap_or_else(|| DEFAULT_HTTP_METHOD.to_string()),
            request_params: params.request_params.map(sanitize_payload),
            query_type: params.query_type,
            business_query: context.business_query.map(truncate_string),
            location_query: context.location_query.map(truncate_string),
            response_code: params.response_code,
            response_time_ms: params.response_time_ms,
            results_returned: params.results_returned,
            success: params.success,
            error_message: params.error_message.map(truncate_string),
            estimated_cost,
            actual_cost,
            cost_currency: DEFAULT_COST_CURRENCY.to_string(),
            billing_category,
            data_quality_score: params.data_quality_score.filter(|s| s.is_finite()),
            useful_results: params.useful_results.or(params.results_returned),
            cache_hit: params.cache_hit.unwrap_or(false),
            rate_limited: params
                .rate_limited
                .unwrap_or(params.response_code == Some(429)),
            retry_count: params.retry_count.unwrap_or(0),
            created_at: now,
        }
    }
}

/// Round to 4 decimal places; non-finite costs are dropped
pub fn round_cost(cost: Option<f64>) -> Option<f64> {
    cost.filter(|c| c.is_finite())
        .map(|c| (c * 10_000.0).round() / 10_000.0)
}

/// Hyphenated RFC 4122 UUID, versions 1 through 5
fn parse_campaign_id(raw: &str) -> Option<Uuid> {
    let trimmed = raw.trim();
    if trimmed.len() != 36 {
        return None;
    }
    Uuid::parse_str(trimmed)
        .ok()
        .filter(|id| matches!(id.get_version_num(), 1..=5) && id.get_variant() == Variant::RFC4122)
}

pub fn truncate_string(value: String) -> String {
    if value.chars().count() <= MAX_FIELD_CHARS {
        return value;
    }
    let mut truncated: String = value.chars().take(TRUNCATED_PREFIX_CHARS).collect();
    truncated.push(ELLIPSIS);
    truncated
}

/// Truncate every over-long string inside `value`, at any depth
pub fn sanitize_payload(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_string(s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_payload).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_payload(v)))
                .collect(),
        ),
        other => other,
    }
}
