//! Canonical JSON encoding for deterministic hashing and signing.
//!
//! The encoding is:
//! - Object keys sorted by byte order at every depth
//! - No insignificant whitespace
//! - Strings and numbers rendered exactly as `serde_json` renders them
//! - `null` values kept, never dropped
//!
//! Two parties that agree on a JSON value always agree on its canonical bytes,
//! and therefore on its hash and keyed signature.

use serde::Serialize;
use serde_json::Value;

use crate::crypto::Blake3Hash;
use crate::error::CoreError;

/// Convert any serializable value to a JSON value tree.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::Canonicalization(e.to_string()))
}

/// Canonical JSON of a serializable value.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CoreError> {
    Ok(canonical_value(&to_value(value)?))
}

/// Canonical JSON with one top-level field removed.
///
/// Used to exclude a signature or seal from the bytes it covers. Non-object
/// values are encoded unchanged.
pub fn canonical_json_without<T: Serialize + ?Sized>(
    value: &T,
    field: &str,
) -> Result<String, CoreError> {
    let mut tree = to_value(value)?;
    if let Value::Object(map) = &mut tree {
        map.remove(field);
    }
    Ok(canonical_value(&tree))
}

/// Blake3 over the canonical JSON of a value.
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<Blake3Hash, CoreError> {
    Ok(Blake3Hash::hash(canonical_json(value)?.as_bytes()))
}

/// Encode a JSON value tree canonically.
pub fn canonical_value(value: &Value) -> String {
    let mut buf = String::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Recursively encode a JSON value.
fn encode_value_to(buf: &mut String, value: &Value) {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => buf.push_str(&n.to_string()),
        Value::String(s) => encode_string(buf, s),
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                encode_value_to(buf, item);
            }
            buf.push(']');
        }
        Value::Object(map) => encode_object_canonical(buf, map),
    }
}

/// Encode an object with keys sorted by byte comparison.
fn encode_object_canonical(buf: &mut String, map: &serde_json::Map<String, Value>) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    buf.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        encode_string(buf, key);
        buf.push(':');
        encode_value_to(buf, value);
    }
    buf.push('}');
}

/// Encode a string with serde_json's escaping rules.
fn encode_string(buf: &mut String, s: &str) {
    // Display on a string Value is serde_json's compact, escaped form.
    buf.push_str(&Value::String(s.to_owned()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_recursively() {
        let v = json!({"b": 1, "a": {"z": true, "m": null}});
        assert_eq!(canonical_value(&v), r#"{"a":{"m":null,"z":true},"b":1}"#);
    }

    #[test]
    fn test_insertion_order_irrelevant() {
        let a = json!({"x": [1, 2], "y": "s"});
        let b = json!({"y": "s", "x": [1, 2]});
        assert_eq!(canonical_value(&a), canonical_value(&b));
    }

    #[test]
    fn test_array_order_preserved() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_value(&v), "[3,1,2]");
    }

    #[test]
    fn test_string_escaping() {
        let v = json!({"q": "a\"b\n"});
        assert_eq!(canonical_value(&v), r#"{"q":"a\"b\n"}"#);
    }

    #[test]
    fn test_without_drops_only_top_level_field() {
        let v = json!({"signature": "s", "inner": {"signature": "kept"}});
        let out = canonical_json_without(&v, "signature").unwrap();
        assert_eq!(out, r#"{"inner":{"signature":"kept"}}"#);
    }

    #[test]
    fn test_canonical_hash_stable() {
        let a = canonical_hash(&json!({"k": 1, "j": 2})).unwrap();
        let b = canonical_hash(&json!({"j": 2, "k": 1})).unwrap();
        assert_eq!(a, b);
    }
}
