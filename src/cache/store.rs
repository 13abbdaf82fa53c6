//! # Cache Store
//!
//! Read-through/write-through facade over a [`CacheProvider`]: normalizes
//! parameters, derives the key, and applies the failure policy.
//!
//! | Failure                    | Lookup                 | Store                  |
//! |----------------------------|------------------------|------------------------|
//! | Normalization              | `Err` (fatal)          | `Err` (fatal)          |
//! | Key derivation             | `Err(KeyGeneration)`   | `Err(KeyGeneration)`   |
//! | Backend read/write         | treated as a miss      | `Err(CacheBackend)`    |
//! | Metadata read              | hit with degraded meta | n/a                    |

use super::key::CacheKeyGenerator;
use super::params::NormalizedParams;
use super::provider::CacheProvider;
use super::stats::{CacheStats, CacheStatsSnapshot};
use super::traits::{CacheMetadata, CacheWrite};
use crate::clock::{system_clock, SharedClock};
use crate::error::{ErrorStage, ProspectError, ProspectResult};
use crate::logging::log_cache_operation;
use crate::tier::{TierCachePolicy, MIN_TTL_SECONDS};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookupResult {
    Hit {
        cache_key: String,
        data: Value,
        metadata: CacheMetadata,
    },
    Miss {
        cache_key: String,
    },
}

impl CacheLookupResult {
    pub fn cache_key(&self) -> &str {
        match self {
            Self::Hit { cache_key, .. } | Self::Miss { cache_key } => cache_key,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Requested lifetime; raised to 60 seconds when lower
    pub ttl_seconds: u64,
    pub cost: f64,
    pub confidence_score: Option<u8>,
}

impl StoreOptions {
    pub fn new(ttl_seconds: u64, cost: f64) -> Self {
        Self {
            ttl_seconds,
            cost,
            confidence_score: None,
        }
    }

    /// TTL taken from a tier policy
    pub fn for_policy(policy: &TierCachePolicy, cost: f64) -> Self {
        Self::new(policy.ttl_seconds, cost)
    }

    pub fn with_confidence(mut self, confidence_score: Option<u8>) -> Self {
        self.confidence_score = confidence_score.map(|score| score.min(100));
        self
    }

    pub fn effective_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds.max(MIN_TTL_SECONDS))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub cache_key: String,
    /// TTL actually applied, after the floor
    pub ttl_seconds: u64,
    /// False when nothing was persisted: the minimum store interval
    /// suppressed the write, or the cache circuit was open
    pub written: bool,
}

/// Last write time per key, for the minimum store interval.
///
/// Entries older than the interval are pruned at most once per interval, so
/// the map only holds keys written in roughly the last two intervals.
#[derive(Debug)]
struct StoreIntervalGuard {
    interval: Duration,
    clock: SharedClock,
    last_writes: DashMap<String, DateTime<Utc>>,
    last_pruned: Mutex<DateTime<Utc>>,
}

impl StoreIntervalGuard {
    fn new(interval: Duration, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            interval,
            clock,
            last_writes: DashMap::new(),
            last_pruned: Mutex::new(now),
        }
    }

    fn within_interval(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A clock that went backwards counts as recent
        (now - since)
            .to_std()
            .map_or(true, |elapsed| elapsed < self.interval)
    }

    fn recently_written(&self, cache_key: &str) -> bool {
        let now = self.clock.now();
        self.last_writes
            .get(cache_key)
            .is_some_and(|written_at| self.within_interval(*written_at, now))
    }

    fn record_write(&self, cache_key: &str) {
        let now = self.clock.now();
        self.last_writes.insert(cache_key.to_string(), now);

        let due = {
            let mut last_pruned = self.last_pruned.lock();
            if self.within_interval(*last_pruned, now) {
                false
            } else {
                *last_pruned = now;
                true
            }
        };
        if due {
            let before = self.last_writes.len();
            self.last_writes
                .retain(|_, written_at| self.within_interval(*written_at, now));
            debug!(
                pruned = before.saturating_sub(self.last_writes.len()),
                tracked = self.last_writes.len(),
                "Pruned cache store interval guard"
            );
        }
    }

    fn tracked(&self) -> usize {
        self.last_writes.len()
    }
}

/// Cheap to clone; clones share the provider, counters and write guard
#[derive(Debug, Clone)]
pub struct CacheStore {
    provider: CacheProvider,
    keys: CacheKeyGenerator,
    stats: Arc<CacheStats>,
    clock: SharedClock,
    interval_guard: Option<Arc<StoreIntervalGuard>>,
}

impl CacheStore {
    pub fn new(provider: CacheProvider, keys: CacheKeyGenerator) -> Self {
        Self {
            provider,
            keys,
            stats: Arc::new(CacheStats::new()),
            clock: system_clock(),
            interval_guard: None,
        }
    }

    /// Clock used by the minimum store interval
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.interval_guard = self
            .interval_guard
            .as_ref()
            .map(|guard| Arc::new(StoreIntervalGuard::new(guard.interval, Arc::clone(&clock))));
        self.clock = clock;
        self
    }

    /// Skip repeat writes of one key within `interval` (process-local)
    pub fn with_min_store_interval(mut self, interval: Option<Duration>) -> Self {
        self.interval_guard = interval
            .filter(|i| !i.is_zero())
            .map(|i| Arc::new(StoreIntervalGuard::new(i, Arc::clone(&self.clock))));
        self
    }

    /// Keys currently remembered by the minimum store interval
    pub fn tracked_store_keys(&self) -> usize {
        self.interval_guard.as_ref().map_or(0, |guard| guard.tracked())
    }

    pub fn provider(&self) -> &CacheProvider {
        &self.provider
    }

    pub fn key_generator(&self) -> &CacheKeyGenerator {
        &self.keys
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn normalize(&self, request_type: &str, params: &Value) -> ProspectResult<NormalizedParams> {
        NormalizedParams::from_json(params)
            .map_err(|e| ProspectError::normalization(request_type, e.to_string()))
    }

    /// Key for already-normalized params, derived by the backend
    pub async fn derive_key(
        &self,
        request_type: &str,
        params: &NormalizedParams,
    ) -> ProspectResult<String> {
        let input = self.keys.input(request_type, params);
        self.provider.derive_key(&input).await.map_err(|e| {
            self.stats.record_error();
            ProspectError::key_generation(request_type, e.to_string())
        })
    }

    pub async fn lookup(&self, request_type: &str, params: &Value) -> ProspectResult<CacheLookupResult> {
        let normalized = self.normalize(request_type, params)?;
        self.lookup_normalized(request_type, &normalized).await
    }

    pub async fn lookup_normalized(
        &self,
        request_type: &str,
        params: &NormalizedParams,
    ) -> ProspectResult<CacheLookupResult> {
        let cache_key = self.derive_key(request_type, params).await?;
        Ok(self.lookup_key(request_type, cache_key).await)
    }

    /// Lookup with an already-derived key. Never fails: backend errors are misses.
    pub async fn lookup_key(&self, request_type: &str, cache_key: String) -> CacheLookupResult {
        let data = match self.provider.fetch(&cache_key).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                self.stats.record_miss();
                log_cache_operation("lookup", request_type, Some(&cache_key), "miss", None);
                return CacheLookupResult::Miss { cache_key };
            }
            Err(e) => {
                self.stats.record_error();
                self.stats.record_miss();
                warn!(
                    request_type = request_type,
                    cache_key = %cache_key,
                    error = %e,
                    "Cache read failed, treating as miss"
                );
                return CacheLookupResult::Miss { cache_key };
            }
        };

        let metadata = match self.provider.fetch_metadata(&cache_key).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                debug!(cache_key = %cache_key, "Cache metadata missing for hit");
                CacheMetadata::degraded()
            }
            Err(e) => {
                warn!(
                    request_type = request_type,
                    cache_key = %cache_key,
                    error = %e,
                    "Cache metadata read failed, returning hit with partial metadata"
                );
                CacheMetadata::degraded()
            }
        };

        self.stats.record_hit();
        log_cache_operation("lookup", request_type, Some(&cache_key), "hit", None);
        CacheLookupResult::Hit {
            cache_key,
            data,
            metadata,
        }
    }

    pub async fn store(
        &self,
        request_type: &str,
        params: &Value,
        response: Value,
        options: StoreOptions,
    ) -> ProspectResult<StoredEntry> {
        let normalized = self.normalize(request_type, params)?;
        self.store_normalized(request_type, normalized, response, options)
            .await
    }

    /// Fully overwrite the entry for `params`; last writer wins
    pub async fn store_normalized(
        &self,
        request_type: &str,
        params: NormalizedParams,
        response: Value,
        options: StoreOptions,
    ) -> ProspectResult<StoredEntry> {
        let cache_key = self.derive_key(request_type, &params).await?;
        self.store_key(request_type, cache_key, params, response, options)
            .await
    }

    /// Store under an already-derived key
    pub async fn store_key(
        &self,
        request_type: &str,
        cache_key: String,
        params: NormalizedParams,
        response: Value,
        options: StoreOptions,
    ) -> ProspectResult<StoredEntry> {
        let ttl = options.effective_ttl();

        if self.recently_written(&cache_key) {
            self.stats.record_skipped_store();
            debug!(cache_key = %cache_key, "Skipping cache write within minimum store interval");
            return Ok(StoredEntry {
                cache_key,
                ttl_seconds: ttl.as_secs(),
                written: false,
            });
        }

        let write = CacheWrite {
            cache_key: cache_key.clone(),
            request_type: request_type.to_string(),
            params,
            response,
            cost: options.cost.max(0.0),
            confidence_score: options.confidence_score,
            ttl,
        };

        let written = match self.provider.put(write).await {
            Ok(written) => written,
            Err(e) => {
                self.stats.record_error();
                return Err(ProspectError::cache_backend(
                    ErrorStage::CacheStore,
                    request_type,
                    &e,
                ));
            }
        };

        if !written {
            self.stats.record_skipped_store();
            log_cache_operation("store", request_type, Some(&cache_key), "skipped", Some("cache circuit open"));
            return Ok(StoredEntry {
                cache_key,
                ttl_seconds: ttl.as_secs(),
                written: false,
            });
        }

        if let Some(guard) = &self.interval_guard {
            guard.record_write(&cache_key);
        }
        self.stats.record_store();
        log_cache_operation(
            "store",
            request_type,
            Some(&cache_key),
            "stored",
            Some(&format!("ttl_seconds={}", ttl.as_secs())),
        );

        Ok(StoredEntry {
            cache_key,
            ttl_seconds: ttl.as_secs(),
            written: true,
        })
    }

    fn recently_written(&self, cache_key: &str) -> bool {
        self.interval_guard
            .as_ref()
            .is_some_and(|guard| guard.recently_written(cache_key))
    }
}
