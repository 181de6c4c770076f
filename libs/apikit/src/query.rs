//! Query-string codec for read operations.
//!
//! Payloads of GET contracts travel as form-style parameters: scalars as
//! `key=value`, arrays as repeated keys, objects as JSON text, `null` omitted.
//! Decoding coerces each raw string back using the property type declared by
//! the request schema, so `?limit=5` validates against an integer field.

use serde_json::{Map, Number, Value};

use crate::schema::{PropertyType, Schema};

/// Encode an object payload as a query string (without the leading `?`).
///
/// Keys are emitted in sorted order so identical payloads produce identical URLs.
pub fn encode(payload: &Value) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Value::Object(map) = payload {
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        for key in keys {
            match &map[key.as_str()] {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        if let Some(text) = scalar_text(item) {
                            serializer.append_pair(key, &text);
                        }
                    }
                }
                other => {
                    if let Some(text) = scalar_text(other) {
                        serializer.append_pair(key, &text);
                    }
                }
            }
        }
    }
    serializer.finish()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Decode a raw query string into an object, guided by `schema`.
pub fn decode(raw: &str, schema: &dyn Schema) -> Value {
    decode_pairs(
        url::form_urlencoded::parse(raw.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned())),
        schema,
    )
}

/// Same as [`decode`] for already-split pairs (e.g. extracted path parameters).
pub fn decode_pairs(pairs: impl IntoIterator<Item = (String, String)>, schema: &dyn Schema) -> Value {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in pairs {
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => grouped.push((key, vec![value])),
        }
    }

    let mut out = Map::new();
    for (key, values) in grouped {
        let decoded = match schema.property_type(&key) {
            PropertyType::Array(item) => {
                Value::Array(values.iter().map(|v| coerce(v, &item)).collect())
            }
            kind if values.len() == 1 => coerce(&values[0], &kind),
            kind => Value::Array(values.iter().map(|v| coerce(v, &kind)).collect()),
        };
        out.insert(key, decoded);
    }
    Value::Object(out)
}

/// Best-effort conversion of one raw value; anything unparsable stays a string
/// so the schema reports a precise type error instead of silently dropping it.
fn coerce(raw: &str, kind: &PropertyType) -> Value {
    let fallback = || Value::String(raw.to_string());
    match kind {
        PropertyType::String => fallback(),
        PropertyType::Integer => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| fallback()),
        PropertyType::Number => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(fallback),
        PropertyType::Boolean => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => fallback(),
        },
        PropertyType::Object | PropertyType::Array(_) => {
            serde_json::from_str(raw).unwrap_or_else(|_| fallback())
        }
        PropertyType::Any => match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
            _ => fallback(),
        },
    }
}
