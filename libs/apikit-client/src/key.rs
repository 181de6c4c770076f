//! Canonical cache keys.

use std::fmt;

use apikit::Contract;
use serde_json::{Map, Value};

/// Key of one query cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(String);

impl QueryKey {
    /// Explicit override key (e.g. `"orders"`).
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key was derived from `contract`.
    pub fn belongs_to(&self, contract: &Contract) -> bool {
        self.0
            .strip_prefix(&contract.identity())
            .is_some_and(|rest| rest.starts_with('|'))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueryKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for QueryKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// One mutation status slot per contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutationKey(String);

impl MutationKey {
    pub fn of(contract: &Contract) -> Self {
        Self(contract.identity())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `METHOD path|payload|url` with both inputs in canonical form.
pub fn derive_query_key(contract: &Contract, payload: &Value, url_params: &Value) -> QueryKey {
    QueryKey(format!(
        "{}|{}|{}",
        contract.identity(),
        canonical_json(payload),
        canonical_json(url_params)
    ))
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apikit::ContractBuilder;
    use serde_json::json;

    fn contract() -> Contract {
        ContractBuilder::get("/v1/menu")
            .public()
            .response_any("Menu")
            .build()
            .unwrap()
    }

    #[test]
    fn key_ignores_object_key_order() {
        let a = derive_query_key(&contract(), &json!({"b": 1, "a": {"y": 2, "x": 1}}), &json!({}));
        let b = derive_query_key(&contract(), &json!({"a": {"x": 1, "y": 2}, "b": 1}), &json!({}));
        assert_eq!(a, b);
    }

    #[test]
    fn key_keeps_array_order() {
        let a = derive_query_key(&contract(), &json!({"ids": [1, 2]}), &json!({}));
        let b = derive_query_key(&contract(), &json!({"ids": [2, 1]}), &json!({}));
        assert_ne!(a, b);
    }

    #[test]
    fn key_separates_payload_from_url() {
        let a = derive_query_key(&contract(), &json!({"id": 1}), &json!({}));
        let b = derive_query_key(&contract(), &json!({}), &json!({"id": 1}));
        assert_ne!(a, b);
        assert!(a.belongs_to(&contract()));
        assert!(!QueryKey::new("orders").belongs_to(&contract()));
    }

    #[test]
    fn canonical_json_is_compact() {
        assert_eq!(canonical_json(&json!({"z": [true, null], "a": "x"})), r#"{"a":"x","z":[true,null]}"#);
    }
}
