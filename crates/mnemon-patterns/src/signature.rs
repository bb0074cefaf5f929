use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize `value` with object keys sorted recursively, so field order
/// and map iteration order never affect the bytes being hashed.
pub fn canonical_json<T: Serialize>(value: &T) -> Value {
    let v = serde_json::to_value(value).unwrap_or(Value::Null);
    sort_json_keys(v)
}

/// Content-addressed signature: SHA-256 hex over the canonical JSON of a
/// pattern's essential structure. 64 lowercase hex characters; stable under
/// key reordering and whitespace.
pub fn signature_hash<T: Serialize>(value: &T) -> String {
    let canonical = canonical_json(value);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{:x}", digest)
}

fn sort_json_keys(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_json_keys(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_the_hash() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(signature_hash(&a), signature_hash(&b));
    }

    #[test]
    fn whitespace_does_not_change_the_hash() {
        let a: Value = serde_json::from_str(r#"{ "steps" : [ "edit" , "test" ] }"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"steps":["edit","test"]}"#).unwrap();
        assert_eq!(signature_hash(&a), signature_hash(&b));
    }

    #[test]
    fn different_content_hashes_differently() {
        assert_ne!(
            signature_hash(&json!({"steps": ["edit"]})),
            signature_hash(&json!({"steps": ["test"]}))
        );
    }

    #[test]
    fn hash_is_64_lowercase_hex() {
        let h = signature_hash(&json!({"k": "v"}));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn canonicalize_is_idempotent_for_the_hash() {
        let v = json!({"b": [3, 2], "a": {"nested": true}});
        assert_eq!(signature_hash(&v), signature_hash(&canonical_json(&v)));
    }
}
