//! # Prospect Core Configuration
//!
//! Layered configuration for the enrichment core, loaded with the `config`
//! crate in this order (later sources win):
//!
//! 1. `config/prospect-config.yaml`
//! 2. `config/prospect-config.{environment}.yaml` (optional)
//! 3. Environment variables prefixed `PROSPECT__`, nested with `__`
//!    (e.g. `PROSPECT__CACHE__BACKEND=memory`)
//!
//! Per-tier TTL overrides have a further layer of their own, read at policy
//! resolution time; see [`crate::tier::TierTtlOverrides`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use prospect_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let backend = &manager.config().cache.backend;
//! let threshold = manager.config().circuit_breakers.default_config.failure_threshold;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring prospect-config.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProspectConfig {
    /// Database connection used by the Postgres cache backend and usage sink
    pub database: DatabaseConfig,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Per-tier TTL overrides
    pub tiers: TiersConfig,

    /// Circuit breakers guarding external services
    pub circuit_breakers: CircuitBreakerConfig,

    /// Timeout and retry budget for guarded calls
    pub downstream: DownstreamConfig,

    /// Usage ledger background writer
    pub usage_ledger: UsageLedgerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL. `${DATABASE_URL}` expands from the environment.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Apply bundled migrations when the pool is created
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            username: "prospect".to_string(),
            password: String::new(),
            database: "prospect_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
            run_migrations: false,
        }
    }
}

impl DatabaseConfig {
    /// Build complete database URL from configuration
    pub fn database_url(&self) -> String {
        if let Some(url) = &self.url {
            if url.starts_with("${DATABASE_URL}") {
                if let Ok(env_url) = std::env::var("DATABASE_URL") {
                    return env_url;
                }
            } else if !url.is_empty() {
                return url.clone();
            }
        }

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// `postgres`, `memory` or `noop`
    pub backend: String,
    /// Cache format version token mixed into every key
    pub format_version: String,
    /// Skip rewriting the same key from this process within the interval. 0 disables.
    pub min_store_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: "postgres".to_string(),
            format_version: crate::cache::CACHE_FORMAT_VERSION.to_string(),
            min_store_interval_seconds: 0,
        }
    }
}

impl CacheConfig {
    pub fn min_store_interval(&self) -> Option<Duration> {
        (self.min_store_interval_seconds > 0)
            .then(|| Duration::from_secs(self.min_store_interval_seconds))
    }
}

/// TTL override for one tier. Values that are not positive are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TierTtlConfig {
    pub ttl_seconds: Option<f64>,
    pub ttl_days: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TiersConfig {
    /// Prefix for `<PREFIX>_<TIER>_SECONDS` / `<PREFIX>_<TIER>_DAYS` variables
    pub ttl_env_prefix: String,
    pub starter: TierTtlConfig,
    pub professional: TierTtlConfig,
    pub enterprise: TierTtlConfig,
    pub compliance: TierTtlConfig,
}

impl Default for TiersConfig {
    fn default() -> Self {
        Self {
            ttl_env_prefix: "PROSPECT_CACHE_TTL".to_string(),
            starter: TierTtlConfig::default(),
            professional: TierTtlConfig::default(),
            enterprise: TierTtlConfig::default(),
            compliance: TierTtlConfig::default(),
        }
    }
}

/// Circuit breaker configuration integrated with YAML config
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// When false every `check` passes and failures are only counted
    pub enabled: bool,

    /// Default configuration for new circuit breakers
    pub default_config: CircuitBreakerComponentConfig,

    /// Specific configurations for named services
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_config: CircuitBreakerComponentConfig::default(),
            component_configs: HashMap::new(),
        }
    }
}

/// Circuit breaker configuration for a specific service from YAML
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerComponentConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time to stay open before a probe is allowed, in milliseconds
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerComponentConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Get configuration for a specific service
    pub fn config_for_component(&self, component_name: &str) -> CircuitBreakerComponentConfig {
        self.component_configs
            .get(component_name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }
}

impl CircuitBreakerComponentConfig {
    /// Convert to resilience module's format
    pub fn to_resilience_config(&self) -> crate::resilience::config::CircuitBreakerConfig {
        crate::resilience::config::CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Per-attempt timeout for a live external call
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 12_000,
            max_attempts: 3,
            backoff_base_ms: 250,
            backoff_max_ms: 4_000,
        }
    }
}

impl DownstreamConfig {
    pub fn to_retry_policy(&self) -> crate::resilience::retry::RetryPolicy {
        crate::resilience::retry::RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UsageLedgerConfig {
    pub enabled: bool,
    /// `postgres`, `memory` or `tracing`
    pub sink: String,
    /// Bounded channel size; entries beyond it are dropped with a warning
    pub channel_capacity: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for UsageLedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: "postgres".to_string(),
            channel_capacity: 1_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

const CACHE_BACKENDS: [&str; 3] = ["postgres", "memory", "noop"];
const USAGE_SINKS: [&str; 3] = ["postgres", "memory", "tracing"];

impl ProspectConfig {
    /// Validate configuration values that have no sensible fallback
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !CACHE_BACKENDS.contains(&self.cache.backend.as_str()) {
            return Err(ConfigurationError::invalid_value(
                "cache.backend",
                self.cache.backend.clone(),
                format!("expected one of {CACHE_BACKENDS:?}"),
            ));
        }

        if self.cache.format_version.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "cache.format_version",
                "cache configuration",
            ));
        }

        if self.uses_database() && self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        let breaker_configs = std::iter::once(("default_config", &self.circuit_breakers.default_config))
            .chain(
                self.circuit_breakers
                    .component_configs
                    .iter()
                    .map(|(name, cfg)| (name.as_str(), cfg)),
            );
        for (name, cfg) in breaker_configs {
            cfg.to_resilience_config().validate().map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("circuit_breakers.{name}"),
                    format!("{cfg:?}"),
                    reason,
                )
            })?;
        }

        if self.downstream.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "downstream.max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.downstream.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "downstream.timeout_ms",
                "0",
                "guarded calls need a timeout",
            ));
        }

        if !USAGE_SINKS.contains(&self.usage_ledger.sink.as_str()) {
            return Err(ConfigurationError::invalid_value(
                "usage_ledger.sink",
                self.usage_ledger.sink.clone(),
                format!("expected one of {USAGE_SINKS:?}"),
            ));
        }

        if self.usage_ledger.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "usage_ledger.channel_capacity",
                "0",
                "channel capacity must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Whether any enabled component needs a database connection
    pub fn uses_database(&self) -> bool {
        (self.cache.enabled && self.cache.backend == "postgres")
            || (self.usage_ledger.enabled && self.usage_ledger.sink == "postgres")
    }

    pub fn database_url(&self) -> String {
        self.database.database_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ProspectConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.circuit_breakers.default_config.failure_threshold, 5);
        assert_eq!(config.circuit_breakers.default_config.cooldown_ms, 60_000);
        assert_eq!(config.downstream.timeout_ms, 12_000);
        assert_eq!(config.downstream.max_attempts, 3);
        assert!(config.cache.min_store_interval().is_none());
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        let mut config = ProspectConfig::default();
        config.cache.backend = "redis".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_component_config_lookup_falls_back_to_default() {
        let mut config = CircuitBreakerConfig::default();
        config.component_configs.insert(
            "hunter".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 3,
                cooldown_ms: 30_000,
            },
        );

        assert_eq!(config.config_for_component("hunter").failure_threshold, 3);
        assert_eq!(config.config_for_component("places").failure_threshold, 5);
    }

    #[test]
    fn test_zero_threshold_override_fails_validation() {
        let mut config = ProspectConfig::default();
        config.circuit_breakers.component_configs.insert(
            "neverbounce".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 0,
                cooldown_ms: 1_000,
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("circuit_breakers.neverbounce"));
    }

    #[test]
    fn test_database_url_prefers_explicit_url() {
        let config = DatabaseConfig {
            url: Some("postgresql://u:p@db:5432/leads".to_string()),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.database_url(), "postgresql://u:p@db:5432/leads");

        let built = DatabaseConfig::default().database_url();
        assert_eq!(built, "postgresql://prospect:@localhost:5432/prospect_development");
    }
}
