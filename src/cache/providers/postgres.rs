//! Postgres cache provider
//!
//! Backs the cache with the `enrichment_cache` table. Key derivation and
//! reads/writes go through the SQL functions installed by the migrations in
//! `migrations/`:
//!
//! - `generate_cache_key(version, request_type, canonical_params)`
//! - `get_cached_response(cache_key)`: filters on `expires_at > now()`
//! - `store_cached_response(...)`: upsert, last writer wins
//!
//! Because the key function hashes the same text as
//! [`KeyInput::local_digest`], keys derived here and keys derived in process
//! are interchangeable.

use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::key::KeyInput;
use crate::cache::traits::{CacheMetadata, CacheService, CacheWrite};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::debug;

#[derive(Debug, FromRow)]
struct CacheMetadataRow {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    cost: f64,
    confidence_score: Option<i16>,
    request_params: Option<Value>,
}

impl From<CacheMetadataRow> for CacheMetadata {
    fn from(row: CacheMetadataRow) -> Self {
        Self {
            created_at: Some(row.created_at),
            expires_at: Some(row.expires_at),
            cost: Some(row.cost),
            confidence_score: row
                .confidence_score
                .and_then(|score| u8::try_from(score).ok()),
            request_params: row.request_params,
            degraded: false,
        }
    }
}

#[derive(Clone)]
pub struct PostgresCacheService {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresCacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCacheService")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresCacheService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl CacheService for PostgresCacheService {
    async fn derive_key(&self, input: &KeyInput) -> CacheResult<String> {
        let key: Option<String> = sqlx::query_scalar("SELECT generate_cache_key($1, $2, $3)")
            .bind(&input.version)
            .bind(&input.request_type)
            .bind(&input.canonical_params)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CacheError::KeyDerivation(e.to_string()))?;

        match key {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(CacheError::KeyDerivation(format!(
                "generate_cache_key returned no value for {}",
                input.request_type
            ))),
        }
    }

    async fn fetch(&self, cache_key: &str) -> CacheResult<Option<Value>> {
        let response: Option<Value> = sqlx::query_scalar("SELECT get_cached_response($1)")
            .bind(cache_key)
            .fetch_one(&self.pool)
            .await?;

        if response.is_some() {
            debug!(cache_key = cache_key, "Cache HIT (postgres)");
        } else {
            debug!(cache_key = cache_key, "Cache MISS (postgres)");
        }
        Ok(response)
    }

    async fn fetch_metadata(&self, cache_key: &str) -> CacheResult<Option<CacheMetadata>> {
        let row = sqlx::query_as::<_, CacheMetadataRow>(
            r#"
            SELECT created_at, expires_at, cost, confidence_score, request_params
            FROM enrichment_cache
            WHERE cache_key = $1 AND expires_at > now()
            LIMIT 1
            "#,
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CacheMetadata::from))
    }

    async fn put(&self, write: CacheWrite) -> CacheResult<()> {
        let ttl_seconds = i64::try_from(write.ttl.as_secs())
            .map_err(|e| CacheError::BackendError(format!("ttl out of range: {e}")))?;

        sqlx::query("SELECT store_cached_response($1, $2, $3, $4, $5, $6, $7)")
            .bind(&write.cache_key)
            .bind(&write.request_type)
            .bind(write.params.to_json())
            .bind(&write.response)
            .bind(write.cost)
            .bind(write.confidence_score.map(i16::from))
            .bind(ttl_seconds)
            .execute(&self.pool)
            .await?;

        debug!(
            cache_key = %write.cache_key,
            ttl_seconds = ttl_seconds,
            "Cache SET (postgres)"
        );
        Ok(())
    }

    async fn health_check(&self) -> CacheResult<bool> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}
