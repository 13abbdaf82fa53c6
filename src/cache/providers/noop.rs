//! No-op cache provider
//!
//! Always misses, always accepts writes. Used when caching is disabled or when
//! the configured backend could not be reached at startup.

use crate::cache::errors::CacheResult;
use crate::cache::key::KeyInput;
use crate::cache::traits::{CacheMetadata, CacheService, CacheWrite};
use serde_json::Value;

/// Cache service that never caches anything
///
/// Keys are still derived locally so callers get a stable `cache_key` to
/// report in misses and usage logs.
#[derive(Debug, Clone, Default)]
pub struct NoOpCacheService;

impl NoOpCacheService {
    pub fn new() -> Self {
        Self
    }
}

impl CacheService for NoOpCacheService {
    async fn derive_key(&self, input: &KeyInput) -> CacheResult<String> {
        Ok(input.local_digest())
    }

    async fn fetch(&self, _cache_key: &str) -> CacheResult<Option<Value>> {
        Ok(None)
    }

    async fn fetch_metadata(&self, _cache_key: &str) -> CacheResult<Option<CacheMetadata>> {
        Ok(None)
    }

    async fn put(&self, _write: CacheWrite) -> CacheResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKeyGenerator;
    use crate::cache::params::NormalizedParams;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_noop_fetch_returns_none() {
        let svc = NoOpCacheService::new();
        assert_eq!(svc.fetch("any_key").await.unwrap(), None);
        assert_eq!(svc.fetch_metadata("any_key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noop_put_succeeds() {
        let svc = NoOpCacheService::new();
        svc.put(CacheWrite {
            cache_key: "key".to_string(),
            request_type: "places_search".to_string(),
            params: NormalizedParams::new(),
            response: json!({}),
            cost: 0.0,
            confidence_score: None,
            ttl: Duration::from_secs(60),
        })
        .await
        .unwrap();
        assert_eq!(svc.fetch("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noop_still_derives_keys() {
        let svc = NoOpCacheService::new();
        let input = CacheKeyGenerator::default().input("places_search", &NormalizedParams::new());
        assert_eq!(svc.derive_key(&input).await.unwrap().len(), 64);
        assert_eq!(svc.provider_name(), "noop");
    }
}
