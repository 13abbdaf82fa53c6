//! Cache backend error types

use thiserror::Error;

/// Errors that can occur during cache backend operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
    /// Backend could not be reached
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize or deserialize a cached payload
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Deterministic hash operation failed or returned nothing
    #[error("Cache key derivation error: {0}")]
    KeyDerivation(String),

    /// Backend operation timed out
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    BackendError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => CacheError::Timeout("connection pool timed out".into()),
            sqlx::Error::Io(e) => CacheError::ConnectionError(e.to_string()),
            sqlx::Error::PoolClosed => CacheError::ConnectionError("pool closed".into()),
            other => CacheError::BackendError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::SerializationError(err.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
