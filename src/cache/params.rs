//! Request parameter canonicalization.
//!
//! Callers hand us loosely-shaped JSON. Before anything is hashed it is folded
//! into a [`NormalizedParams`]: keys sorted at every level, strings trimmed,
//! and null / empty string / empty array / empty object pruned outright.
//! Array order is preserved.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Deepest nesting accepted before the input is treated as malformed
pub const MAX_NESTING_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct NormalizationError {
    pub reason: String,
}

impl NormalizationError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A normalized parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Number(n) => Value::Number(n.clone()),
            ParamValue::String(s) => Value::String(s.clone()),
            ParamValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            ParamValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(Number::from(value))
    }
}

/// Canonical, order-independent request parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedParams(BTreeMap<String, ParamValue>);

impl NormalizedParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a raw JSON object. `null` is treated as an empty object.
    pub fn from_json(value: &Value) -> Result<Self, NormalizationError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => {
                let mut normalized = BTreeMap::new();
                for (key, entry) in map {
                    if let Some(v) = normalize_value(entry, 1)? {
                        normalized.insert(key.clone(), v);
                    }
                }
                Ok(Self(normalized))
            }
            other => Err(NormalizationError::new(format!(
                "request params must be a JSON object, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Insert a value, applying the same pruning rules as [`NormalizedParams::from_json`]
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), NormalizationError> {
        let key = key.into();
        match normalize_value(&value, 1)? {
            Some(v) => {
                self.0.insert(key, v);
            }
            None => {
                self.0.remove(&key);
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Compact JSON with sorted keys. This is the exact text that gets hashed.
    pub fn canonical_json(&self) -> String {
        // BTreeMap iteration order makes this stable.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Normalize an arbitrary value, returning `None` when it prunes away entirely
pub fn normalize(value: &Value) -> Result<Option<ParamValue>, NormalizationError> {
    normalize_value(value, 0)
}

fn normalize_value(value: &Value, depth: usize) -> Result<Option<ParamValue>, NormalizationError> {
    if depth > MAX_NESTING_DEPTH {
        return Err(NormalizationError::new(format!(
            "params nested deeper than {MAX_NESTING_DEPTH} levels"
        )));
    }

    let normalized = match value {
        Value::Null => None,
        Value::Bool(b) => Some(ParamValue::Bool(*b)),
        Value::Number(n) => Some(ParamValue::Number(n.clone())),
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| ParamValue::String(trimmed.to_string()))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Some(v) = normalize_value(item, depth + 1)? {
                    out.push(v);
                }
            }
            (!out.is_empty()).then_some(ParamValue::Array(out))
        }
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (key, entry) in map {
                if let Some(v) = normalize_value(entry, depth + 1)? {
                    out.insert(key.clone(), v);
                }
            }
            (!out.is_empty()).then_some(ParamValue::Map(out))
        }
    };

    Ok(normalized)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
