//! # Enrichment Cache Module
//!
//! Durable cache for paid third-party API responses, keyed on the canonical
//! form of the request parameters.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore                       <- normalize, derive key, failure policy
//!   └── CacheProvider (enum)       <- zero-cost dispatch, no vtable
//!         ├── Postgres(PostgresCacheService)  <- enrichment_cache + SQL functions
//!         ├── Memory(MemoryCacheService)      <- DashMap, single instance / tests
//!         └── NoOp(NoOpCacheService)          <- always-miss fallback
//! ```
//!
//! ## Design Decisions
//!
//! - **Canonical params**: sorted keys, trimmed strings, empty values pruned
//! - **Versioned keys**: bumping the format version orphans old entries
//! - **Fail open**: read failures are misses; only key derivation can fail a lookup
//! - **Graceful degradation**: no pool or unknown backend → NoOp, never blocks startup

pub mod errors;
pub mod key;
pub mod params;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod stats;
pub mod store;
pub mod traits;

pub use errors::{CacheError, CacheResult};
pub use key::{CacheKeyGenerator, KeyInput, CACHE_FORMAT_VERSION};
pub use params::{normalize, NormalizationError, NormalizedParams, ParamValue};
pub use provider::CacheProvider;
pub use providers::{MemoryCacheService, NoOpCacheService, PostgresCacheService};
pub use registry::{StateRegistryCache, StateRegistryCacheResult, StateRegistryLookup};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{CacheLookupResult, CacheStore, StoreOptions, StoredEntry};
pub use traits::{CacheMetadata, CacheService, CacheWrite};
