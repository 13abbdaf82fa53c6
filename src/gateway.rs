//! # Enrichment Gateway
//!
//! Single entry point for paid lookups. For each request it:
//!
//! 1. resolves the caller's tier into a [`TierCachePolicy`]
//! 2. normalizes the params and derives the cache key
//! 3. serves from cache or calls the live service, as the strategy dictates
//! 4. refreshes the cache and records usage on a detached task
//!
//! | Strategy        | Cache hit        | Cache miss                     |
//! |-----------------|------------------|--------------------------------|
//! | cache-only      | served           | `CacheOnlyMiss`, no live call  |
//! | cache-preferred | served           | live call, cache refreshed     |
//! | live-refresh    | live call        | live call, cache refreshed     |
//!
//! With `force_live_lookup` the cache is not read up front; it is only
//! consulted as a stale fallback when the service's circuit is open.

use crate::cache::registry::{
    confidence_from_response, StateRegistryCache, StateRegistryLookup,
    STATE_REGISTRY_LOOKUP_COST, STATE_REGISTRY_REQUEST_TYPE,
};
use crate::cache::{
    CacheKeyGenerator, CacheLookupResult, CacheMetadata, CacheProvider, CacheStore,
    NormalizedParams, StoreOptions,
};
use crate::config::ProspectConfig;
use crate::error::{ProspectError, ProspectResult};
use crate::logging::log_external_call;
use crate::resilience::{guarded_call, CircuitBreakerRegistry, RetryPolicy};
use crate::tier::{CacheStrategy, TierCachePolicy, TierPolicyResolver};
use crate::usage::{sink_from_config, QueryType, UsageContext, UsageLedger, UsageLedgerHandle, UsageLogParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Breaker name for state registry lookups
pub const STATE_REGISTRY_SERVICE: &str = "cobalt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    /// External service; names the circuit breaker and the usage source
    pub service: String,
    pub request_type: String,
    pub params: Value,
    /// Free-form tier identifier, resolved per request
    pub tier: Option<String>,
    /// Cost of one live call, in USD
    pub cost: f64,
    pub query_type: QueryType,
    pub endpoint: Option<String>,
    pub context: UsageContext,
}

impl GatewayRequest {
    pub fn new(
        service: impl Into<String>,
        request_type: impl Into<String>,
        params: Value,
        cost: f64,
    ) -> Self {
        Self {
            service: service.into(),
            request_type: request_type.into(),
            params,
            tier: None,
            cost,
            query_type: QueryType::Enrichment,
            endpoint: None,
            context: UsageContext::default(),
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = query_type;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_context(mut self, context: UsageContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOutcome {
    pub data: Value,
    pub cache_hit: bool,
    /// `None` when key derivation failed and the cache was bypassed
    pub cache_key: Option<String>,
    pub policy: TierCachePolicy,
    pub cost_incurred: f64,
    pub metadata: Option<CacheMetadata>,
    /// Served from cache because the live service's circuit was open
    pub stale_fallback: bool,
    /// Live attempts spent, 0 for cache hits
    pub attempts: u32,
}

/// Composes tier policy, cache, circuit breakers, retries and usage logging
#[derive(Debug, Clone)]
pub struct EnrichmentGateway {
    cache: CacheStore,
    resolver: TierPolicyResolver,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    ledger: UsageLedgerHandle,
}

impl EnrichmentGateway {
    pub fn new(
        cache: CacheStore,
        resolver: TierPolicyResolver,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
        ledger: UsageLedgerHandle,
    ) -> Self {
        Self {
            cache,
            resolver,
            breakers,
            retry,
            ledger,
        }
    }

    /// Wire every component from configuration.
    ///
    /// Spawns the usage ledger worker; the returned join handle completes
    /// after [`UsageLedgerHandle::shutdown`].
    pub fn bootstrap(config: &ProspectConfig, pool: Option<PgPool>) -> (Self, Option<JoinHandle<()>>) {
        let provider = CacheProvider::from_config_graceful(
            &config.cache,
            pool.clone(),
            Some(&config.circuit_breakers),
        );
        let cache = CacheStore::new(
            provider,
            CacheKeyGenerator::new(config.cache.format_version.clone()),
        )
        .with_min_store_interval(config.cache.min_store_interval());

        let resolver = TierPolicyResolver::from_config(&config.tiers);
        let breakers = Arc::new(CircuitBreakerRegistry::from_config(&config.circuit_breakers));
        let sink = sink_from_config(&config.usage_ledger, pool);
        let (ledger, worker) = UsageLedger::spawn(&config.usage_ledger, sink);

        info!(
            cache_provider = cache.provider().provider_name(),
            circuit_breakers_enabled = breakers.is_enabled(),
            usage_ledger_enabled = ledger.is_enabled(),
            "Enrichment gateway initialized"
        );

        (
            Self::new(cache, resolver, breakers, config.downstream.to_retry_policy(), ledger),
            worker,
        )
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn resolver(&self) -> &TierPolicyResolver {
        &self.resolver
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn ledger(&self) -> &UsageLedgerHandle {
        &self.ledger
    }

    pub fn state_registry_cache(&self) -> StateRegistryCache {
        StateRegistryCache::new(self.cache.clone(), self.resolver.clone())
    }

    /// Gateway request for a Secretary-of-State registry lookup
    pub fn state_registry_request(&self, lookup: &StateRegistryLookup) -> GatewayRequest {
        let registry = self.state_registry_cache();
        let policy = registry.policy_for(lookup);
        let context = UsageContext {
            business_query: Some(lookup.business_name.clone()),
            location_query: Some(lookup.state.clone()),
            ..UsageContext::default()
        };

        GatewayRequest {
            service: STATE_REGISTRY_SERVICE.to_string(),
            request_type: STATE_REGISTRY_REQUEST_TYPE.to_string(),
            params: registry.params_for(lookup, &policy),
            tier: lookup.tier.clone(),
            cost: STATE_REGISTRY_LOOKUP_COST,
            query_type: QueryType::Enrichment,
            endpoint: None,
            context,
        }
    }

    /// Serve `request` from cache or `live_call` according to its tier.
    ///
    /// `live_call` is invoked once per attempt. Cancelling `cancel` abandons
    /// an in-flight live call; a result that already arrived is still cached
    /// and logged.
    pub async fn execute<F, Fut, E>(
        &self,
        request: GatewayRequest,
        live_call: F,
        cancel: &CancellationToken,
    ) -> ProspectResult<GatewayOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        let started = Instant::now();
        let policy = self.resolver.resolve(request.tier.as_deref());
        let params = self.cache.normalize(&request.request_type, &request.params)?;

        let cache_key = match self.cache.derive_key(&request.request_type, &params).await {
            Ok(key) => Some(key),
            Err(e) if policy.strategy == CacheStrategy::CacheOnly => return Err(e),
            Err(e) => {
                warn!(
                    service = %request.service,
                    request_type = %request.request_type,
                    error = %e,
                    "Cache key unavailable, bypassing cache"
                );
                None
            }
        };

        let cached = match (&cache_key, policy.reads_cache_first()) {
            (Some(key), true) => Some(self.cache.lookup_key(&request.request_type, key.clone()).await),
            _ => None,
        };

        match (policy.strategy, cached) {
            (CacheStrategy::CacheOnly | CacheStrategy::CachePreferred, Some(CacheLookupResult::Hit { cache_key, data, metadata })) => {
                return Ok(self.serve_cached(&request, &policy, cache_key, data, metadata, false, started));
            }
            (CacheStrategy::CacheOnly, _) => {
                self.log_usage(&request, &policy, UsageRecord::cache_only_miss(started));
                return Err(ProspectError::CacheOnlyMiss {
                    request_type: request.request_type,
                    tier: policy.tier.to_string(),
                });
            }
            _ => {}
        }

        self.call_live(request, policy, params, cache_key, live_call, cancel, started)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_live<F, Fut, E>(
        &self,
        request: GatewayRequest,
        policy: TierCachePolicy,
        params: NormalizedParams,
        cache_key: Option<String>,
        live_call: F,
        cancel: &CancellationToken,
        started: Instant,
    ) -> ProspectResult<GatewayOutcome>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        match guarded_call(&self.breakers, &request.service, &self.retry, cancel, live_call).await {
            Ok(output) => {
                log_external_call(
                    &request.service,
                    &request.request_type,
                    "success",
                    output.attempts,
                    Some(output.latency.as_millis() as u64),
                    None,
                );

                if let Some(key) = &cache_key {
                    self.refresh_cache(&request, &policy, key.clone(), params, output.value.clone());
                }
                self.log_usage(
                    &request,
                    &policy,
                    UsageRecord::live_success(&request, &output.value, output.attempts, output.latency.as_millis()),
                );

                Ok(GatewayOutcome {
                    data: output.value,
                    cache_hit: false,
                    cache_key,
                    policy,
                    cost_incurred: request.cost,
                    metadata: None,
                    stale_fallback: false,
                    attempts: output.attempts,
                })
            }
            Err(err) => {
                let attempts = match &err {
                    ProspectError::Downstream { attempts, .. } => *attempts,
                    _ => 0,
                };
                log_external_call(
                    &request.service,
                    &request.request_type,
                    "failed",
                    attempts,
                    Some(started.elapsed().as_millis() as u64),
                    Some(err.to_string().as_str()),
                );

                if let (ProspectError::CircuitOpen { .. }, CacheStrategy::LiveRefresh, Some(key)) =
                    (&err, policy.strategy, &cache_key)
                {
                    if let CacheLookupResult::Hit { cache_key, data, metadata } =
                        self.cache.lookup_key(&request.request_type, key.clone()).await
                    {
                        warn!(
                            service = %request.service,
                            cache_key = %cache_key,
                            "Circuit open, serving cached response as fallback"
                        );
                        // One usage row per request: the cache hit
                        return Ok(self.serve_cached(&request, &policy, cache_key, data, metadata, true, started));
                    }
                }

                self.log_usage(&request, &policy, UsageRecord::live_failure(&request, &err, attempts, started));
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn serve_cached(
        &self,
        request: &GatewayRequest,
        policy: &TierCachePolicy,
        cache_key: String,
        data: Value,
        metadata: CacheMetadata,
        stale_fallback: bool,
        started: Instant,
    ) -> GatewayOutcome {
        debug!(
            service = %request.service,
            cache_key = %cache_key,
            tier = %policy.tier,
            "Serving enrichment from cache"
        );
        self.log_usage(request, policy, UsageRecord::cache_hit(&data, started));

        GatewayOutcome {
            data,
            cache_hit: true,
            cache_key: Some(cache_key),
            policy: policy.clone(),
            cost_incurred: 0.0,
            metadata: Some(metadata),
            stale_fallback,
            attempts: 0,
        }
    }

    /// Write the live response on a detached task so caller cancellation cannot abort it
    fn refresh_cache(
        &self,
        request: &GatewayRequest,
        policy: &TierCachePolicy,
        cache_key: String,
        params: NormalizedParams,
        response: Value,
    ) {
        let cache = self.cache.clone();
        let request_type = request.request_type.clone();
        let options = StoreOptions::for_policy(policy, request.cost)
            .with_confidence(confidence_from_response(&response));

        tokio::spawn(async move {
            if let Err(e) = cache
                .store_key(&request_type, cache_key, params, response, options)
                .await
            {
                warn!(request_type = %request_type, error = %e, "Cache refresh failed");
            }
        });
    }

    fn log_usage(&self, request: &GatewayRequest, policy: &TierCachePolicy, record: UsageRecord) {
        let mut context = request.context.clone();
        context.tier_key.get_or_insert_with(|| policy.tier.to_string());

        self.ledger.log(UsageLogParams {
            source_name: request.service.clone(),
            endpoint: request.endpoint.clone(),
            request_params: Some(request.params.clone()),
            query_type: Some(request.query_type),
            response_time_ms: Some(record.response_time_ms),
            results_returned: record.results_returned,
            success: Some(record.success),
            error_message: record.error_message,
            estimated_cost: Some(record.estimated_cost),
            actual_cost: Some(record.actual_cost),
            cache_hit: Some(record.cache_hit),
            retry_count: Some(record.retry_count),
            context,
            ..UsageLogParams::default()
        });
    }
}

/// Outcome-specific usage fields
struct UsageRecord {
    success: bool,
    cache_hit: bool,
    estimated_cost: f64,
    actual_cost: f64,
    response_time_ms: i32,
    results_returned: Option<i32>,
    error_message: Option<String>,
    retry_count: i32,
}

impl UsageRecord {
    fn cache_hit(data: &Value, started: Instant) -> Self {
        Self {
            success: true,
            cache_hit: true,
            estimated_cost: 0.0,
            actual_cost: 0.0,
            response_time_ms: elapsed_ms(started.elapsed().as_millis()),
            results_returned: count_results(data),
            error_message: None,
            retry_count: 0,
        }
    }

    fn cache_only_miss(started: Instant) -> Self {
        Self {
            success: false,
            cache_hit: false,
            estimated_cost: 0.0,
            actual_cost: 0.0,
            response_time_ms: elapsed_ms(started.elapsed().as_millis()),
            results_returned: Some(0),
            error_message: Some("no cached entry and tier forbids live lookups".to_string()),
            retry_count: 0,
        }
    }

    fn live_success(request: &GatewayRequest, data: &Value, attempts: u32, latency_ms: u128) -> Self {
        Self {
            success: true,
            cache_hit: false,
            estimated_cost: request.cost,
            actual_cost: request.cost,
            response_time_ms: elapsed_ms(latency_ms),
            results_returned: count_results(data),
            error_message: None,
            retry_count: attempts.saturating_sub(1) as i32,
        }
    }

    fn live_failure(request: &GatewayRequest, err: &ProspectError, attempts: u32, started: Instant) -> Self {
        // Rejected by the breaker: the service was never called
        let estimated_cost = match err {
            ProspectError::CircuitOpen { .. } => 0.0,
            _ => request.cost,
        };
        Self {
            success: false,
            cache_hit: false,
            estimated_cost,
            actual_cost: 0.0,
            response_time_ms: elapsed_ms(started.elapsed().as_millis()),
            results_returned: None,
            error_message: Some(err.to_string()),
            retry_count: attempts.saturating_sub(1) as i32,
        }
    }
}

fn elapsed_ms(ms: u128) -> i32 {
    i32::try_from(ms).unwrap_or(i32::MAX)
}

/// Array length of the payload, or of its `results` field
fn count_results(data: &Value) -> Option<i32> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(map) => map.get("results")?.as_array()?,
        _ => return None,
    };
    Some(i32::try_from(items.len()).unwrap_or(i32::MAX))
}
