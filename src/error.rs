//! Error types for the enrichment core.
//!
//! Every error surfaced to a caller names the stage that failed, the service or
//! request type involved, and whether a retry is safe.

use crate::cache::CacheError;
use crate::config::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStage {
    Normalization,
    KeyGeneration,
    CacheLookup,
    CacheStore,
    CircuitBreaker,
    Downstream,
    Configuration,
    UsageLedger,
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorStage::Normalization => "normalization",
            ErrorStage::KeyGeneration => "key_generation",
            ErrorStage::CacheLookup => "cache_lookup",
            ErrorStage::CacheStore => "cache_store",
            ErrorStage::CircuitBreaker => "circuit_breaker",
            ErrorStage::Downstream => "downstream",
            ErrorStage::Configuration => "configuration",
            ErrorStage::UsageLedger => "usage_ledger",
        };
        f.write_str(label)
    }
}

/// How a downstream call ran out of budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownstreamFailureKind {
    /// Every attempt hit the per-call timeout
    Timeout,
    /// The last attempt returned an error
    Failed,
    /// The caller abandoned the request before a result arrived
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProspectError {
    #[error("Normalization error for {request_type}: {reason}")]
    Normalization { request_type: String, reason: String },

    #[error("Key generation error for {request_type}: {reason}")]
    KeyGeneration { request_type: String, reason: String },

    #[error("Cache backend error during {stage} for {request_type}: {reason}")]
    CacheBackend {
        stage: ErrorStage,
        request_type: String,
        reason: String,
    },

    #[error("Circuit breaker open for {service} (retry in {retry_after:?})")]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },

    #[error("Downstream call to {service} {kind:?} after {attempts} attempt(s): {cause}")]
    Downstream {
        service: String,
        kind: DownstreamFailureKind,
        attempts: u32,
        cause: String,
    },

    #[error("No unexpired cache entry for {request_type} and tier {tier} forbids live lookups")]
    CacheOnlyMiss { request_type: String, tier: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ProspectError {
    pub fn normalization(request_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Normalization {
            request_type: request_type.into(),
            reason: reason.into(),
        }
    }

    pub fn key_generation(request_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::KeyGeneration {
            request_type: request_type.into(),
            reason: reason.into(),
        }
    }

    pub fn cache_backend(
        stage: ErrorStage,
        request_type: impl Into<String>,
        error: &CacheError,
    ) -> Self {
        Self::CacheBackend {
            stage,
            request_type: request_type.into(),
            reason: error.to_string(),
        }
    }

    /// Stage of the pipeline that produced this error
    pub fn stage(&self) -> ErrorStage {
        match self {
            Self::Normalization { .. } => ErrorStage::Normalization,
            Self::KeyGeneration { .. } => ErrorStage::KeyGeneration,
            Self::CacheBackend { stage, .. } => *stage,
            Self::CircuitOpen { .. } => ErrorStage::CircuitBreaker,
            Self::Downstream { .. } => ErrorStage::Downstream,
            Self::CacheOnlyMiss { .. } => ErrorStage::CacheLookup,
            Self::Configuration(_) => ErrorStage::Configuration,
            Self::Database(_) => ErrorStage::CacheStore,
            Self::Serialization(_) => ErrorStage::Normalization,
        }
    }

    /// Service or request type the error concerns
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Normalization { request_type, .. }
            | Self::KeyGeneration { request_type, .. }
            | Self::CacheBackend { request_type, .. }
            | Self::CacheOnlyMiss { request_type, .. } => Some(request_type),
            Self::CircuitOpen { service, .. } | Self::Downstream { service, .. } => Some(service),
            Self::Configuration(_) | Self::Database(_) | Self::Serialization(_) => None,
        }
    }

    /// Whether the caller may safely retry the whole operation later.
    ///
    /// An open circuit is retryable only after its cooldown; callers should
    /// not spend retry budget on it immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Normalization { .. }
            | Self::Configuration(_)
            | Self::CacheOnlyMiss { .. }
            | Self::Serialization(_) => false,
            Self::KeyGeneration { .. } | Self::CacheBackend { .. } | Self::Database(_) => true,
            Self::CircuitOpen { .. } => true,
            Self::Downstream { kind, .. } => !matches!(kind, DownstreamFailureKind::Cancelled),
        }
    }

    /// Suggested delay before retrying, when one is known
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for ProspectError {
    fn from(err: sqlx::Error) -> Self {
        ProspectError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ProspectError {
    fn from(err: serde_json::Error) -> Self {
        ProspectError::Serialization(err.to_string())
    }
}

impl From<ConfigurationError> for ProspectError {
    fn from(err: ConfigurationError) -> Self {
        ProspectError::Configuration(err.to_string())
    }
}

pub type ProspectResult<T> = Result<T, ProspectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_and_subject_reporting() {
        let err = ProspectError::CircuitOpen {
            service: "hunter".to_string(),
            retry_after: Duration::from_secs(12),
        };
        assert_eq!(err.stage(), ErrorStage::CircuitBreaker);
        assert_eq!(err.subject(), Some("hunter"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));

        let err = ProspectError::normalization("places_search", "nesting too deep");
        assert_eq!(err.stage(), ErrorStage::Normalization);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_cancelled_downstream_is_not_retryable() {
        let err = ProspectError::Downstream {
            service: "neverbounce".to_string(),
            kind: DownstreamFailureKind::Cancelled,
            attempts: 1,
            cause: "caller went away".to_string(),
        };
        assert!(!err.is_retryable());

        let err = ProspectError::Downstream {
            service: "neverbounce".to_string(),
            kind: DownstreamFailureKind::Timeout,
            attempts: 3,
            cause: "timed out".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}
