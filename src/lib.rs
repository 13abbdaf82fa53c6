#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Prospect Core
//!
//! Cost-aware caching and fault isolation for paid business-data APIs.
//!
//! ## Overview
//!
//! Every lookup against a paid provider (places search, state registries,
//! email discovery) goes through one pipeline: the caller's subscription tier
//! decides whether the cache may answer, parameters are normalized so that
//! equivalent requests share one cache entry, live calls are guarded by a
//! per-service circuit breaker with bounded retries, and every attempt lands
//! in an append-only usage ledger.
//!
//! ## Module Organization
//!
//! - [`cache`] - Parameter normalization, key derivation and the cache store
//! - [`tier`] - Tier to cache policy resolution with TTL overrides
//! - [`resilience`] - Circuit breakers and guarded, retried calls
//! - [`usage`] - Non-blocking usage ledger and its sinks
//! - [`gateway`] - The composed enrichment pipeline
//! - [`config`] - Layered YAML/env configuration
//! - [`database`] - Pool setup and embedded migrations
//! - [`logging`] - Structured logging setup and helpers
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prospect_core::config::ConfigManager;
//! use prospect_core::gateway::{EnrichmentGateway, GatewayRequest};
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let (gateway, _ledger) = EnrichmentGateway::bootstrap(manager.config(), None);
//!
//! let request = GatewayRequest::new("google_places", "places_search", json!({"query": "coffee"}), 0.032)
//!     .with_tier("professional");
//! let outcome = gateway
//!     .execute(request, || async { Ok::<_, String>(json!({"results": []})) }, &CancellationToken::new())
//!     .await?;
//!
//! println!("cache hit: {}, cost: {}", outcome.cache_hit, outcome.cost_incurred);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests; Postgres tests are #[ignore] and need DATABASE_URL
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod resilience;
pub mod test_utils;
pub mod tier;
pub mod usage;

pub use cache::{
    CacheKeyGenerator, CacheLookupResult, CacheMetadata, CacheProvider, CacheStore,
    NormalizedParams, StateRegistryCache, StateRegistryLookup, StoreOptions,
};
pub use config::{ConfigManager, ProspectConfig};
pub use error::{ErrorStage, ProspectError, ProspectResult};
pub use gateway::{EnrichmentGateway, GatewayOutcome, GatewayRequest};
pub use resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, RetryPolicy};
pub use tier::{resolve_tier_cache_policy, CacheStrategy, Tier, TierCachePolicy, TierPolicyResolver};
pub use usage::{UsageContext, UsageLedger, UsageLedgerHandle, UsageLogParams};
