//! # Resilience Module
//!
//! Per-service circuit breakers and the guarded-call wrapper that every live
//! request to a paid external API goes through.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use prospect_core::config::CircuitBreakerConfig;
//! use prospect_core::resilience::{guarded_call, CircuitBreakerRegistry, RetryPolicy};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(CircuitBreakerRegistry::from_config(&CircuitBreakerConfig::default()));
//! let cancel = CancellationToken::new();
//!
//! let output = guarded_call(&registry, "places", &RetryPolicy::default(), &cancel, || async {
//!     Ok::<_, String>(serde_json::json!({"results": []}))
//! })
//! .await?;
//! # let _ = output;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitOpenError, CircuitPermit, CircuitState,
};
pub use config::CircuitBreakerConfig;
pub use metrics::{CircuitBreakerMetrics, RegistryMetrics};
pub use registry::CircuitBreakerRegistry;
pub use retry::{guarded_call, GuardedOutput, RetryPolicy};
