//! Deterministic cache key derivation.
//!
//! The hashed input is `version ␟ request_type ␟ canonical_params`, so bumping
//! the cache format version orphans every previously written entry without a
//! migration, and two request types can never share a key.

use super::params::NormalizedParams;
use sha2::{Digest, Sha256};

/// Cache format version embedded in every key
pub const CACHE_FORMAT_VERSION: &str = "v2025-10-15";

const FIELD_SEPARATOR: char = '\u{1f}';

/// Everything that goes into a key, ready for a backend to hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInput {
    pub version: String,
    pub request_type: String,
    pub canonical_params: String,
}

impl KeyInput {
    /// The exact string that is hashed
    pub fn hashed_input(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.version,
            self.request_type,
            self.canonical_params,
            sep = FIELD_SEPARATOR
        )
    }

    /// SHA-256 of [`KeyInput::hashed_input`], hex encoded
    pub fn local_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hashed_input().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    version: String,
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new(CACHE_FORMAT_VERSION)
    }
}

impl CacheKeyGenerator {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn input(&self, request_type: &str, params: &NormalizedParams) -> KeyInput {
        KeyInput {
            version: self.version.clone(),
            request_type: request_type.to_string(),
            canonical_params: params.canonical_json(),
        }
    }

    /// Derive a key locally. Pure: the same inputs always give the same key.
    pub fn generate_key(&self, request_type: &str, params: &NormalizedParams) -> String {
        self.input(request_type, params).local_digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> NormalizedParams {
        NormalizedParams::from_json(&value).unwrap()
    }

    #[test]
    fn test_key_is_stable_and_hex() {
        let generator = CacheKeyGenerator::default();
        let p = params(json!({"domain": "acme.com"}));

        let first = generator.generate_key("hunter_domain_search", &p);
        let second = generator.generate_key("hunter_domain_search", &p);

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_request_type_is_part_of_the_key() {
        let generator = CacheKeyGenerator::default();
        let p = params(json!({"email": "jane@acme.com"}));

        assert_ne!(
            generator.generate_key("neverbounce_verify", &p),
            generator.generate_key("hunter_email_verify", &p)
        );
    }

    #[test]
    fn test_version_bump_changes_every_key() {
        let p = params(json!({"query": "plumbers", "location": "Austin, TX"}));
        let current = CacheKeyGenerator::default().generate_key("places_search", &p);
        let next = CacheKeyGenerator::new("v2026-01-01").generate_key("places_search", &p);
        assert_ne!(current, next);
    }

    #[test]
    fn test_separator_prevents_field_bleed() {
        let generator = CacheKeyGenerator::new("v1");
        let a = generator.input("ab", &params(json!({"c": "d"})));
        let b = generator.input("a", &params(json!({"bc": "d"})));
        assert_ne!(a.hashed_input(), b.hashed_input());
    }
}
