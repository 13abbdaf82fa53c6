//! # Circuit Breaker Configuration
//!
//! Settings for a single breaker. For the YAML-facing, per-service form see
//! `crate::config::CircuitBreakerConfig`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to stay open before a single probe call is let through
    pub cooldown: Duration,
}

impl CircuitBreakerConfig {
    /// Paid enrichment APIs (places search, email verification, registries)
    pub fn for_external_api() -> Self {
        Self::default()
    }

    /// APIs with tight per-minute quotas, where a few failures usually mean
    /// the quota is spent
    pub fn for_rate_limited_api() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.cooldown.is_zero() {
            return Err("cooldown must be greater than 0".to_string());
        }

        if self.cooldown > Duration::from_secs(3600) {
            return Err("cooldown should not exceed one hour".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}
