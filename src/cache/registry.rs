//! Secretary-of-State registry lookups (`cobalt_sos`).
//!
//! Registry searches are the most expensive call we make, so their cache
//! params are built by hand: the business name and address are folded into a
//! canonical shape and the resolved tier policy is embedded, keeping tiers
//! with different freshness guarantees from sharing entries.

use super::key::CACHE_FORMAT_VERSION;
use super::store::{CacheLookupResult, CacheStore, StoreOptions, StoredEntry};
use super::traits::CacheMetadata;
use crate::error::ProspectResult;
use crate::tier::{TierCachePolicy, TierPolicyResolver};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const STATE_REGISTRY_REQUEST_TYPE: &str = "cobalt_sos";

/// Billed per live registry lookup, in USD
pub const STATE_REGISTRY_LOOKUP_COST: f64 = 0.9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRegistryLookup {
    pub business_name: String,
    pub state: String,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub include_ucc_data: bool,
    #[serde(default)]
    pub tier: Option<String>,
    /// Overrides the cache format version embedded in the params
    #[serde(default)]
    pub cache_version: Option<String>,
}

impl StateRegistryLookup {
    pub fn new(business_name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            business_name: business_name.into(),
            state: state.into(),
            ..Self::default()
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRegistryCacheResult {
    pub hit: bool,
    pub cache_key: String,
    pub policy: TierCachePolicy,
    pub data: Option<Value>,
    pub metadata: Option<CacheMetadata>,
}

fn normalize_name(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Upper-cased, cut to two letters
fn normalize_state(value: &str) -> String {
    value.trim().to_uppercase().chars().take(2).collect()
}

fn normalize_postal(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

/// Canonical params for a registry lookup under `policy`
pub fn build_params(lookup: &StateRegistryLookup, policy: &TierCachePolicy, version: &str) -> Value {
    let mut params = Map::new();
    params.insert("version".to_string(), json!(version));
    params.insert("tier".to_string(), json!(policy.tier.as_str()));
    params.insert("strategy".to_string(), json!(policy.strategy.as_str()));
    params.insert(
        "businessName".to_string(),
        json!(normalize_name(&lookup.business_name)),
    );
    params.insert("state".to_string(), json!(normalize_state(&lookup.state)));
    if let Some(city) = lookup.city.as_deref() {
        params.insert("city".to_string(), json!(normalize_name(city)));
    }
    if let Some(street) = lookup.street.as_deref() {
        params.insert("street".to_string(), json!(normalize_name(street)));
    }
    if let Some(postal) = normalize_postal(lookup.postal_code.as_deref()) {
        params.insert("postalCode".to_string(), json!(postal));
    }
    params.insert(
        "includeUccData".to_string(),
        json!(lookup.include_ucc_data),
    );
    Value::Object(params)
}

/// `confidenceScore` from a registry response, when it is a number
pub fn confidence_from_response(response: &Value) -> Option<u8> {
    response
        .get("confidenceScore")
        .and_then(Value::as_f64)
        .filter(|score| score.is_finite())
        .map(|score| score.round().clamp(0.0, 100.0) as u8)
}

#[derive(Debug, Clone)]
pub struct StateRegistryCache {
    store: CacheStore,
    resolver: TierPolicyResolver,
}

impl StateRegistryCache {
    pub fn new(store: CacheStore, resolver: TierPolicyResolver) -> Self {
        Self { store, resolver }
    }

    pub fn policy_for(&self, lookup: &StateRegistryLookup) -> TierCachePolicy {
        self.resolver.resolve(lookup.tier.as_deref())
    }

    pub fn params_for(&self, lookup: &StateRegistryLookup, policy: &TierCachePolicy) -> Value {
        let version = lookup
            .cache_version
            .as_deref()
            .unwrap_or(CACHE_FORMAT_VERSION);
        build_params(lookup, policy, version)
    }

    pub async fn lookup(&self, lookup: &StateRegistryLookup) -> ProspectResult<StateRegistryCacheResult> {
        let policy = self.policy_for(lookup);
        let params = self.params_for(lookup, &policy);

        let result = match self
            .store
            .lookup(STATE_REGISTRY_REQUEST_TYPE, &params)
            .await?
        {
            CacheLookupResult::Hit {
                cache_key,
                data,
                metadata,
            } => StateRegistryCacheResult {
                hit: true,
                cache_key,
                policy,
                data: Some(data),
                metadata: Some(metadata),
            },
            CacheLookupResult::Miss { cache_key } => StateRegistryCacheResult {
                hit: false,
                cache_key,
                policy,
                data: None,
                metadata: None,
            },
        };
        Ok(result)
    }

    /// Store a live response. `policy` defaults to the lookup's own tier.
    pub async fn store(
        &self,
        lookup: &StateRegistryLookup,
        response: Value,
        policy: Option<&TierCachePolicy>,
    ) -> ProspectResult<StoredEntry> {
        let policy = match policy {
            Some(policy) => policy.clone(),
            None => self.policy_for(lookup),
        };
        let params = self.params_for(lookup, &policy);
        let options = StoreOptions::for_policy(&policy, STATE_REGISTRY_LOOKUP_COST)
            .with_confidence(confidence_from_response(&response));

        self.store
            .store(STATE_REGISTRY_REQUEST_TYPE, &params, response, options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKeyGenerator, CacheProvider, MemoryCacheService};
    use crate::tier::{CacheStrategy, Tier};

    fn registry_cache() -> StateRegistryCache {
        let store = CacheStore::new(
            CacheProvider::memory(MemoryCacheService::new()),
            CacheKeyGenerator::default(),
        );
        StateRegistryCache::new(store, TierPolicyResolver::default())
    }

    #[test]
    fn test_build_params_shape() {
        let policy = TierPolicyResolver::default().resolve(Some("starter"));
        let lookup = StateRegistryLookup {
            city: Some(" San Jose ".to_string()),
            postal_code: Some("   ".to_string()),
            ..StateRegistryLookup::new("  Acme LLC ", "california")
        };

        let params = build_params(&lookup, &policy, CACHE_FORMAT_VERSION);
        assert_eq!(
            params,
            json!({
                "version": CACHE_FORMAT_VERSION,
                "tier": "starter",
                "strategy": "cache-only",
                "businessName": "acme llc",
                "state": "CA",
                "city": "san jose",
                "includeUccData": false,
            })
        );
    }

    #[test]
    fn test_confidence_extraction() {
        assert_eq!(confidence_from_response(&json!({"confidenceScore": 92.4})), Some(92));
        assert_eq!(confidence_from_response(&json!({"confidenceScore": 0})), Some(0));
        assert_eq!(confidence_from_response(&json!({"confidenceScore": 140})), Some(100));
        assert_eq!(confidence_from_response(&json!({"confidenceScore": "high"})), None);
        assert_eq!(confidence_from_response(&json!({})), None);
    }

    #[tokio::test]
    async fn test_case_and_whitespace_variants_share_a_key() {
        let cache = registry_cache();
        let a = cache
            .lookup(&StateRegistryLookup::new("Acme LLC", "ca"))
            .await
            .unwrap();
        let b = cache
            .lookup(&StateRegistryLookup::new("  Acme LLC ", "CA"))
            .await
            .unwrap();
        assert_eq!(a.cache_key, b.cache_key);
        assert_eq!(a.policy.tier, Tier::Professional);
        assert_eq!(a.policy.strategy, CacheStrategy::CachePreferred);
    }

    #[tokio::test]
    async fn test_tiers_do_not_share_entries() {
        let cache = registry_cache();
        let starter = StateRegistryLookup::new("Acme LLC", "CA").with_tier("starter");
        let enterprise = StateRegistryLookup::new("Acme LLC", "CA").with_tier("enterprise");

        cache
            .store(&starter, json!({"status": "active", "confidenceScore": 88}), None)
            .await
            .unwrap();

        let hit = cache.lookup(&starter).await.unwrap();
        assert!(hit.hit);
        assert_eq!(
            hit.metadata.as_ref().and_then(|m| m.confidence_score),
            Some(88)
        );
        assert_eq!(
            hit.metadata.as_ref().and_then(|m| m.cost),
            Some(STATE_REGISTRY_LOOKUP_COST)
        );

        assert!(!cache.lookup(&enterprise).await.unwrap().hit);
    }
}
