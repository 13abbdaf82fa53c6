//! Cache service trait definition

use super::errors::CacheResult;
use super::key::KeyInput;
use super::params::NormalizedParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A full cache entry write. Always replaces whatever is stored under `cache_key`.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub cache_key: String,
    pub request_type: String,
    pub params: NormalizedParams,
    pub response: Value,
    pub cost: f64,
    pub confidence_score: Option<u8>,
    pub ttl: Duration,
}

/// Secondary data about a cache hit.
///
/// Every field is optional because the metadata read is best-effort; when it
/// fails the hit is still returned with `degraded` set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub cost: Option<f64>,
    pub confidence_score: Option<u8>,
    pub request_params: Option<Value>,
    #[serde(default)]
    pub degraded: bool,
}

impl CacheMetadata {
    pub fn degraded() -> Self {
        Self {
            degraded: true,
            ..Self::default()
        }
    }
}

/// Operations the durable key-value backend must provide.
///
/// Implemented by the concrete providers (Postgres, in-memory, NoOp) and
/// dispatched through [`super::CacheProvider`].
pub trait CacheService: Send + Sync {
    /// Deterministic hash of the key input
    fn derive_key(
        &self,
        input: &KeyInput,
    ) -> impl std::future::Future<Output = CacheResult<String>> + Send;

    /// Unexpired response stored under `cache_key`, if any.
    ///
    /// Expiry is enforced here, never by the caller.
    fn fetch(
        &self,
        cache_key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<Value>>> + Send;

    /// Cost, confidence and params recorded alongside the entry
    fn fetch_metadata(
        &self,
        cache_key: &str,
    ) -> impl std::future::Future<Output = CacheResult<Option<CacheMetadata>>> + Send;

    /// Insert or fully overwrite an entry
    fn put(&self, write: CacheWrite) -> impl std::future::Future<Output = CacheResult<()>> + Send;

    fn health_check(&self) -> impl std::future::Future<Output = CacheResult<bool>> + Send;

    fn provider_name(&self) -> &'static str;
}
