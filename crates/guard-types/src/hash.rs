//! Canonical JSON serialization and SHA-256 digests.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serializes `value` compactly with object keys sorted at every depth.
///
/// Two values that differ only in key order produce the same string.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Normalizes an optional payload: absent, `null`, `{}` and `[]` all collapse to `{}`.
pub fn canonical_payload(payload: Option<&Value>) -> Value {
    match payload {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(Value::Object(map)) if map.is_empty() => Value::Object(Default::default()),
        Some(Value::Array(items)) if items.is_empty() => Value::Object(Default::default()),
        Some(other) => other.clone(),
    }
}

/// Hex SHA-256 of the canonical form of a payload.
pub fn payload_hash(payload: Option<&Value>) -> String {
    sha256_hex(canonical_json(&canonical_payload(payload)).as_bytes())
}

/// SHA-256 hex digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_hash() {
        let a = json!({ "name": "Ada", "age": 36, "tags": [{ "b": 1, "a": 2 }] });
        let b = json!({ "tags": [{ "a": 2, "b": 1 }], "age": 36, "name": "Ada" });
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(payload_hash(Some(&a)), payload_hash(Some(&b)));
    }

    #[test]
    fn absent_and_empty_payloads_hash_identically() {
        let absent = payload_hash(None);
        assert_eq!(absent, payload_hash(Some(&Value::Null)));
        assert_eq!(absent, payload_hash(Some(&json!({}))));
        assert_eq!(absent, payload_hash(Some(&json!([]))));
        assert_ne!(absent, payload_hash(Some(&json!({ "x": 1 }))));
    }

    #[test]
    fn canonical_json_is_compact_and_escaped() {
        let v = json!({ "b\"q": "line\nbreak", "a": [1, null, true] });
        assert_eq!(
            canonical_json(&v),
            r#"{"a":[1,null,true],"b\"q":"line\nbreak"}"#
        );
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(
            payload_hash(Some(&json!(["rec1", "rec2"]))),
            payload_hash(Some(&json!(["rec2", "rec1"])))
        );
    }
}
