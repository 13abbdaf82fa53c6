use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for request parameter names
pub fn param_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,15}"
}

/// Strategy for scalar parameter values, including ones that prune away
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ]
}

/// Strategy for nested parameter values, at most three levels deep
pub fn param_value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(param_name_strategy(), inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Strategy for a params object as an ordered list of entries with unique names
pub fn params_entries_strategy() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map(param_name_strategy(), param_value_strategy(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

/// Strategy for free-form tier identifiers as callers send them
pub fn tier_identifier_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("starter".to_string()),
        Just("PROFESSIONAL".to_string()),
        Just("Enterprise Plus".to_string()),
        Just("compliance-annual".to_string()),
        "[a-z ]{0,12}",
    ]
}
