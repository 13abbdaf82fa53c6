//! Cache provider implementations

pub mod memory;
pub mod noop;
pub mod postgres;

pub use memory::MemoryCacheService;
pub use noop::NoOpCacheService;
pub use postgres::PostgresCacheService;
