//! # Schema Migrations
//!
//! The `enrichment_cache` table, its SQL functions, and the
//! `enhanced_api_usage` ledger table live in `migrations/` and are embedded
//! at compile time:
//!
//! - `generate_cache_key(version, request_type, canonical_params)`
//! - `get_cached_response(cache_key)`
//! - `store_cached_response(cache_key, request_type, params, response, cost, confidence, ttl_seconds)`

use sqlx::PgPool;
use tracing::info;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply any pending migrations. Idempotent.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    MIGRATOR.run(pool).await?;
    info!(
        migrations = MIGRATOR.iter().count(),
        "Database migrations applied"
    );
    Ok(())
}
