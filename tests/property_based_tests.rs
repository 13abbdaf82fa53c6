mod common;

use common::strategies::*;
use prospect_core::cache::{CacheKeyGenerator, NormalizedParams};
use prospect_core::tier::{TierPolicyResolver, MIN_TTL_SECONDS};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn object(entries: &[(String, Value)]) -> Value {
    Value::Object(entries.iter().cloned().collect::<Map<_, _>>())
}

fn pad_strings(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(format!("  {s}\t")),
        Value::Array(items) => Value::Array(items.iter().map(pad_strings).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), pad_strings(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

proptest! {
    /// Property: normalizing an already-normalized object is a no-op
    #[test]
    fn normalization_is_idempotent(entries in params_entries_strategy()) {
        let once = NormalizedParams::from_json(&object(&entries)).unwrap();
        let twice = NormalizedParams::from_json(&once.to_json()).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Property: surrounding whitespace never changes the key
    #[test]
    fn whitespace_padding_does_not_change_key(entries in params_entries_strategy()) {
        let keys = CacheKeyGenerator::default();
        let plain = NormalizedParams::from_json(&object(&entries)).unwrap();
        let padded = NormalizedParams::from_json(&pad_strings(&object(&entries))).unwrap();
        prop_assert_eq!(
            keys.generate_key("places_search", &plain),
            keys.generate_key("places_search", &padded)
        );
    }

    /// Property: extra null-valued params never change the key
    #[test]
    fn null_params_are_pruned(entries in params_entries_strategy(), extra in param_name_strategy()) {
        prop_assume!(!entries.iter().any(|(name, _)| *name == extra));

        let mut with_null = entries.clone();
        with_null.push((extra, Value::Null));

        let keys = CacheKeyGenerator::default();
        let a = NormalizedParams::from_json(&object(&entries)).unwrap();
        let b = NormalizedParams::from_json(&object(&with_null)).unwrap();
        prop_assert_eq!(keys.generate_key("hunter_domain", &a), keys.generate_key("hunter_domain", &b));
    }

    /// Property: keys are 64-char lowercase hex and separate request types and versions
    #[test]
    fn keys_are_hex_and_namespaced(entries in params_entries_strategy()) {
        let params = NormalizedParams::from_json(&object(&entries)).unwrap();
        let current = CacheKeyGenerator::default();
        let bumped = CacheKeyGenerator::new("v-next");

        let key = current.generate_key("cobalt_sos", &params);
        prop_assert_eq!(key.len(), 64);
        prop_assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        prop_assert_ne!(&key, &current.generate_key("places_search", &params));
        prop_assert_ne!(&key, &bumped.generate_key("cobalt_sos", &params));
    }

    /// Property: every tier identifier resolves to a policy with a TTL at or above the floor
    #[test]
    fn tier_resolution_is_total(identifier in tier_identifier_strategy()) {
        let policy = TierPolicyResolver::default().resolve(Some(&identifier));
        prop_assert!(policy.ttl_seconds >= MIN_TTL_SECONDS);
    }
}
