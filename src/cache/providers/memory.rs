//! In-process cache provider backed by DashMap
//!
//! Entries carry their own expiry, checked against the injected clock on every
//! read. Nothing is shared across processes, so this backend is meant for
//! single-instance deployments and tests.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::key::KeyInput;
use crate::cache::traits::{CacheMetadata, CacheService, CacheWrite};
use crate::clock::{system_clock, SharedClock};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    request_type: String,
    params: Value,
    response: Value,
    cost: f64,
    confidence_score: Option<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Switches that make individual operations fail, for exercising fail-open paths
#[derive(Debug, Default)]
struct FaultSwitches {
    key_derivation: AtomicBool,
    reads: AtomicBool,
    metadata: AtomicBool,
    writes: AtomicBool,
}

#[derive(Clone)]
pub struct MemoryCacheService {
    entries: Arc<DashMap<String, MemoryEntry>>,
    clock: SharedClock,
    faults: Arc<FaultSwitches>,
}

impl std::fmt::Debug for MemoryCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheService")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

impl Default for MemoryCacheService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacheService {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            faults: Arc::new(FaultSwitches::default()),
        }
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Request type recorded for a key, regardless of expiry
    pub fn request_type_of(&self, cache_key: &str) -> Option<String> {
        self.entries
            .get(cache_key)
            .map(|entry| entry.request_type.clone())
    }

    /// Raw expiry of a key, regardless of whether it has passed
    pub fn expires_at(&self, cache_key: &str) -> Option<DateTime<Utc>> {
        self.entries.get(cache_key).map(|entry| entry.expires_at)
    }

    pub fn fail_key_derivation(&self, fail: bool) {
        self.faults.key_derivation.store(fail, Ordering::Relaxed);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::Relaxed);
    }

    pub fn fail_metadata(&self, fail: bool) {
        self.faults.metadata.store(fail, Ordering::Relaxed);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.faults.writes.store(fail, Ordering::Relaxed);
    }

    fn live_entry(&self, cache_key: &str) -> Option<MemoryEntry> {
        let now = self.clock.now();
        self.entries
            .get(cache_key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.clone())
    }
}

impl CacheService for MemoryCacheService {
    async fn derive_key(&self, input: &KeyInput) -> CacheResult<String> {
        if self.faults.key_derivation.load(Ordering::Relaxed) {
            return Err(CacheError::KeyDerivation(
                "hash operation unavailable".to_string(),
            ));
        }
        Ok(input.local_digest())
    }

    async fn fetch(&self, cache_key: &str) -> CacheResult<Option<Value>> {
        if self.faults.reads.load(Ordering::Relaxed) {
            return Err(CacheError::ConnectionError(
                "memory backend read disabled".to_string(),
            ));
        }

        let result = self.live_entry(cache_key).map(|entry| entry.response);
        if result.is_some() {
            debug!(cache_key = cache_key, "Cache HIT (memory)");
        } else {
            debug!(cache_key = cache_key, "Cache MISS (memory)");
        }
        Ok(result)
    }

    async fn fetch_metadata(&self, cache_key: &str) -> CacheResult<Option<CacheMetadata>> {
        if self.faults.metadata.load(Ordering::Relaxed) {
            return Err(CacheError::BackendError(
                "memory backend metadata read disabled".to_string(),
            ));
        }

        Ok(self.live_entry(cache_key).map(|entry| CacheMetadata {
            created_at: Some(entry.created_at),
            expires_at: Some(entry.expires_at),
            cost: Some(entry.cost),
            confidence_score: entry.confidence_score,
            request_params: Some(entry.params),
            degraded: false,
        }))
    }

    async fn put(&self, write: CacheWrite) -> CacheResult<()> {
        if self.faults.writes.load(Ordering::Relaxed) {
            return Err(CacheError::ConnectionError(
                "memory backend write disabled".to_string(),
            ));
        }

        let ttl = ChronoDuration::from_std(write.ttl)
            .map_err(|e| CacheError::BackendError(format!("ttl out of range: {e}")))?;
        let now = self.clock.now();

        let entry = MemoryEntry {
            request_type: write.request_type,
            params: write.params.to_json(),
            response: write.response,
            cost: write.cost,
            confidence_score: write.confidence_score,
            created_at: now,
            expires_at: now + ttl,
        };

        debug!(
            cache_key = %write.cache_key,
            ttl_seconds = write.ttl.as_secs(),
            "Cache SET (memory)"
        );
        self.entries.insert(write.cache_key, entry);
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(!self.faults.reads.load(Ordering::Relaxed))
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKeyGenerator;
    use crate::cache::params::NormalizedParams;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::time::Duration;

    fn write(key: &str, ttl: Duration) -> CacheWrite {
        CacheWrite {
            cache_key: key.to_string(),
            request_type: "places_search".to_string(),
            params: NormalizedParams::from_json(&json!({"query": "bakery"})).unwrap(),
            response: json!({"results": [1, 2, 3]}),
            cost: 0.032,
            confidence_score: Some(80),
            ttl,
        }
    }

    #[tokio::test]
    async fn test_entries_expire_by_clock() {
        let clock = ManualClock::starting_now();
        let svc = MemoryCacheService::with_clock(Arc::new(clock.clone()));

        svc.put(write("k1", Duration::from_secs(120))).await.unwrap();
        assert!(svc.fetch("k1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(121));
        assert!(svc.fetch("k1").await.unwrap().is_none());
        assert!(svc.fetch_metadata("k1").await.unwrap().is_none());
        assert_eq!(svc.purge_expired(), 1);
        assert!(svc.is_empty());
    }

    #[tokio::test]
    async fn test_put_overwrites_fully() {
        let svc = MemoryCacheService::new();
        svc.put(write("k1", Duration::from_secs(60))).await.unwrap();

        let mut second = write("k1", Duration::from_secs(60));
        second.response = json!({"results": []});
        second.confidence_score = None;
        svc.put(second).await.unwrap();

        assert_eq!(svc.fetch("k1").await.unwrap(), Some(json!({"results": []})));
        let metadata = svc.fetch_metadata("k1").await.unwrap().unwrap();
        assert_eq!(metadata.confidence_score, None);
        assert_eq!(svc.len(), 1);
    }

    #[tokio::test]
    async fn test_derive_key_matches_local_digest() {
        let svc = MemoryCacheService::new();
        let input = CacheKeyGenerator::default()
            .input("hunter_domain_search", &NormalizedParams::from_json(&json!({"domain": "acme.com"})).unwrap());
        assert_eq!(svc.derive_key(&input).await.unwrap(), input.local_digest());

        svc.fail_key_derivation(true);
        assert!(matches!(
            svc.derive_key(&input).await,
            Err(CacheError::KeyDerivation(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_switches() {
        let svc = MemoryCacheService::new();
        svc.fail_writes(true);
        assert!(svc.put(write("k1", Duration::from_secs(60))).await.is_err());

        svc.fail_writes(false);
        svc.put(write("k1", Duration::from_secs(60))).await.unwrap();

        svc.fail_reads(true);
        assert!(svc.fetch("k1").await.is_err());
        assert!(!svc.health_check().await.unwrap());
    }
}
