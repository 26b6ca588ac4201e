use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serializes a value to JSON with object keys sorted at every level.
///
/// Block and transaction hashes are computed over this form, so two
/// independently built copies of the same data always hash identically
/// regardless of struct field order or map insertion order.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> String {
    // Plain data with string keys always converts; Null is never hashed for real data.
    let value = serde_json::to_value(value).unwrap_or_default();
    let mut out = String::new();
    write_canonical(&value, &mut out);
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

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_are_sorted_recursively() {
        let value = json!({ "b": 1, "a": { "z": true, "c": [ { "y": 1, "x": 2 } ] } });

        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":[{"x":2,"y":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut first = serde_json::Map::new();
        first.insert("studentId".to_string(), json!("S-1"));
        first.insert("type".to_string(), json!("STUDENT_REGISTRATION"));

        let mut second = serde_json::Map::new();
        second.insert("type".to_string(), json!("STUDENT_REGISTRATION"));
        second.insert("studentId".to_string(), json!("S-1"));

        assert_eq!(canonical_json(&first), canonical_json(&second));
    }

    #[test]
    fn test_strings_are_escaped() {
        let value = json!({ "note": "line\n\"quoted\"" });
        assert_eq!(canonical_json(&value), r#"{"note":"line\n\"quoted\""}"#);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
