//! Cache provider with integrated circuit breaker
//!
//! Uses enum dispatch for zero-cost abstraction over the concrete services.
//! The Postgres backend is shared across instances and sits behind a "cache"
//! circuit breaker, so an unreachable database degrades to cache misses
//! instead of a timeout on every request.

use super::errors::CacheResult;
use super::key::KeyInput;
use super::providers::{MemoryCacheService, NoOpCacheService, PostgresCacheService};
use super::traits::{CacheMetadata, CacheService, CacheWrite};
use crate::clock::{system_clock, SharedClock};
use crate::config::{CacheConfig, CircuitBreakerConfig};
use crate::resilience::{CircuitBreaker, CircuitPermit, CircuitState};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Breaker name used for the shared cache backend
pub const CACHE_CIRCUIT_NAME: &str = "cache";

/// Internal cache backend enum for zero-cost dispatch
#[derive(Debug, Clone)]
enum CacheBackend {
    Postgres(Box<PostgresCacheService>),
    Memory(MemoryCacheService),
    /// Always miss, always succeed
    NoOp(NoOpCacheService),
}

impl CacheBackend {
    fn is_distributed(&self) -> bool {
        matches!(self, Self::Postgres(_))
    }

    fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::Postgres(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }

    async fn derive_key(&self, input: &KeyInput) -> CacheResult<String> {
        match self {
            Self::Postgres(s) => s.derive_key(input).await,
            Self::Memory(s) => s.derive_key(input).await,
            Self::NoOp(s) => s.derive_key(input).await,
        }
    }

    async fn fetch(&self, cache_key: &str) -> CacheResult<Option<Value>> {
        match self {
            Self::Postgres(s) => s.fetch(cache_key).await,
            Self::Memory(s) => s.fetch(cache_key).await,
            Self::NoOp(s) => s.fetch(cache_key).await,
        }
    }

    async fn fetch_metadata(&self, cache_key: &str) -> CacheResult<Option<CacheMetadata>> {
        match self {
            Self::Postgres(s) => s.fetch_metadata(cache_key).await,
            Self::Memory(s) => s.fetch_metadata(cache_key).await,
            Self::NoOp(s) => s.fetch_metadata(cache_key).await,
        }
    }

    async fn put(&self, write: CacheWrite) -> CacheResult<()> {
        match self {
            Self::Postgres(s) => s.put(write).await,
            Self::Memory(s) => s.put(write).await,
            Self::NoOp(s) => s.put(write).await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::Postgres(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }
}

/// Cache provider with circuit breaker protection for the shared backend.
///
/// When the cache circuit is open:
/// - `derive_key()` hashes locally (keys are identical to the server's)
/// - `fetch()`/`fetch_metadata()` return `Ok(None)`
/// - `put()` returns `Ok(false)`; nothing is written
/// - `health_check()` returns `Ok(false)`
#[derive(Clone)]
pub struct CacheProvider {
    backend: CacheBackend,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for CacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheProvider")
            .field("backend", &self.backend)
            .field(
                "circuit_breaker",
                &self.circuit_breaker.as_ref().map(|cb| cb.state()),
            )
            .finish()
    }
}

impl CacheProvider {
    /// Create a provider from configuration with graceful degradation.
    ///
    /// A disabled cache, an unknown backend, or a Postgres backend without a
    /// pool all yield a NoOp provider. Startup never fails because of the cache.
    pub fn from_config_graceful(
        config: &CacheConfig,
        pool: Option<PgPool>,
        cb_config: Option<&CircuitBreakerConfig>,
    ) -> Self {
        let backend = Self::create_backend(config, pool);

        let circuit_breaker = if backend.is_distributed() && backend.is_enabled() {
            cb_config.map(|cb_cfg| {
                let component_config = cb_cfg.config_for_component(CACHE_CIRCUIT_NAME);
                info!(
                    failure_threshold = component_config.failure_threshold,
                    cooldown_ms = component_config.cooldown_ms,
                    "Cache circuit breaker initialized"
                );
                Arc::new(CircuitBreaker::new(
                    CACHE_CIRCUIT_NAME.to_string(),
                    component_config.to_resilience_config(),
                    system_clock(),
                ))
            })
        } else {
            None
        };

        Self {
            backend,
            circuit_breaker,
        }
    }

    fn create_backend(config: &CacheConfig, pool: Option<PgPool>) -> CacheBackend {
        if !config.enabled {
            info!("Enrichment cache disabled by configuration");
            return CacheBackend::NoOp(NoOpCacheService::new());
        }

        match config.backend.as_str() {
            "postgres" | "postgresql" => match pool {
                Some(pool) => {
                    info!(backend = "postgres", "Cache provider initialized");
                    CacheBackend::Postgres(Box::new(PostgresCacheService::new(pool)))
                }
                None => {
                    warn!("Postgres cache configured but no database pool available, falling back to NoOp");
                    CacheBackend::NoOp(NoOpCacheService::new())
                }
            },
            "memory" | "in-memory" => {
                info!(backend = "memory", "In-process cache provider initialized");
                CacheBackend::Memory(MemoryCacheService::new())
            }
            "noop" | "none" => CacheBackend::NoOp(NoOpCacheService::new()),
            other => {
                warn!(backend = other, "Unknown cache backend, falling back to NoOp");
                CacheBackend::NoOp(NoOpCacheService::new())
            }
        }
    }

    /// Postgres provider guarded by the given breaker settings
    pub fn postgres(pool: PgPool, cb_config: &CircuitBreakerConfig) -> Self {
        Self::from_config_graceful(
            &CacheConfig {
                enabled: true,
                backend: "postgres".to_string(),
                ..CacheConfig::default()
            },
            Some(pool),
            Some(cb_config),
        )
    }

    pub fn memory(service: MemoryCacheService) -> Self {
        Self {
            backend: CacheBackend::Memory(service),
            circuit_breaker: None,
        }
    }

    /// In-process provider reading expiry from `clock`
    pub fn memory_with_clock(clock: SharedClock) -> Self {
        Self::memory(MemoryCacheService::with_clock(clock))
    }

    /// Create a NoOp provider (for explicit opt-out or testing)
    pub fn noop() -> Self {
        Self {
            backend: CacheBackend::NoOp(NoOpCacheService::new()),
            circuit_breaker: None,
        }
    }

    /// Whether caching is actually enabled (not NoOp)
    pub fn is_enabled(&self) -> bool {
        self.backend.is_enabled()
    }

    /// Whether entries are visible to other instances
    pub fn is_distributed(&self) -> bool {
        self.backend.is_distributed()
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    /// Current cache circuit state, `None` when unguarded
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(|cb| cb.state())
    }

    /// Guard the backend with `breaker`, replacing any existing one
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Permit for a backend call (`None` when unguarded), or `Err` when the
    /// call should be skipped. The permit is dropped with the caller's future,
    /// so an abandoned half-open probe frees its slot.
    fn admit(&self, operation: &'static str) -> Result<Option<CircuitPermit>, ()> {
        match &self.circuit_breaker {
            None => Ok(None),
            Some(cb) => match cb.check() {
                Ok(permit) => Ok(Some(permit)),
                Err(_) => {
                    debug!(operation = operation, "Cache circuit open, skipping backend call");
                    Err(())
                }
            },
        }
    }

    fn observe<T>(permit: Option<CircuitPermit>, started: Instant, result: &CacheResult<T>) {
        if let Some(permit) = permit {
            match result {
                Ok(_) => permit.record_success_timed(started.elapsed()),
                Err(_) => permit.record_failure_timed(started.elapsed()),
            }
        }
    }

    pub async fn derive_key(&self, input: &KeyInput) -> CacheResult<String> {
        let Ok(cb) = self.admit("derive_key") else {
            return Ok(input.local_digest());
        };
        let started = Instant::now();
        let result = self.backend.derive_key(input).await;
        Self::observe(cb, started, &result);
        result
    }

    /// Unexpired response for `cache_key`; `Ok(None)` while the circuit is open
    pub async fn fetch(&self, cache_key: &str) -> CacheResult<Option<Value>> {
        let Ok(cb) = self.admit("fetch") else {
            return Ok(None);
        };
        let started = Instant::now();
        let result = self.backend.fetch(cache_key).await;
        Self::observe(cb, started, &result);
        result
    }

    pub async fn fetch_metadata(&self, cache_key: &str) -> CacheResult<Option<CacheMetadata>> {
        let Ok(cb) = self.admit("fetch_metadata") else {
            return Ok(None);
        };
        let started = Instant::now();
        let result = self.backend.fetch_metadata(cache_key).await;
        Self::observe(cb, started, &result);
        result
    }

    /// Write an entry. `Ok(false)` means the open cache circuit skipped it.
    pub async fn put(&self, write: CacheWrite) -> CacheResult<bool> {
        let Ok(cb) = self.admit("put") else {
            return Ok(false);
        };
        let started = Instant::now();
        let result = self.backend.put(write).await;
        Self::observe(cb, started, &result);
        result.map(|()| true)
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        let Ok(cb) = self.admit("health_check") else {
            return Ok(false);
        };
        let started = Instant::now();
        let result = self.backend.health_check().await;
        Self::observe(cb, started, &result);
        result
    }
}
