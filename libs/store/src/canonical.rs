//! Canonical JSON encoding and content digests.
//!
//! Object keys are emitted in sorted order so that byte equality of two
//! encodings implies structural equality of the values.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Renders a JSON value with sorted object keys and no insignificant
/// whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
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

/// Hex sha256 of the given bytes.
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"z": true, "y": null}});
        assert_eq!(canonical_json(&a), r#"{"a":{"y":null,"z":true},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_escapes_strings() {
        let v = json!({"k\"ey": "line\nbreak"});
        assert_eq!(canonical_json(&v), r#"{"k\"ey":"line\nbreak"}"#);
    }

    #[test]
    fn test_canonical_json_keeps_array_order() {
        let v = json!([3, 1, 2]);
        assert_eq!(canonical_json(&v), "[3,1,2]");
    }

    #[test]
    fn test_digest_is_stable() {
        let a = canonical_json(&json!({"x": 1, "y": 2}));
        let b = canonical_json(&json!({"y": 2, "x": 1}));
        assert_eq!(content_digest(a.as_bytes()), content_digest(b.as_bytes()));
        assert_eq!(content_digest(b"").len(), 64);
    }
}
