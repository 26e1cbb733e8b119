/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

//! Deterministic content hashing over arbitrary JSON values.
//!
//! Same family of idea as [`crate::model`]'s recursive traversal and the
//! teacher's own `HashValue` (a recursive `Hash` impl over
//! `serde_json::Value`), but this produces the SHA-1 hex digest the
//! snapshot writer's no-change fast path depends on, rather than
//! feeding a `std::hash::Hasher`.
//!
//! Maps hash order-insensitively (keys sorted); lists hash
//! order-sensitively. Preserve this exactly -- swapping either
//! convention silently breaks `_hash` stability across re-ingests of
//! unchanged rows.

use serde_json::Value;
use sha1::{Digest, Sha1};

fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recursively hash a JSON value, returning the SHA-1 hex digest.
pub fn jsonhash(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(String, String)> = map
                .iter()
                .map(|(k, v)| (jsonhash(&Value::String(k.clone())), jsonhash(v)))
                .collect();
            pairs.sort();
            let repr = pairs
                .iter()
                .map(|(k, v)| format!("({k:?}, {v:?})"))
                .collect::<Vec<_>>()
                .join(", ");
            sha1_hex(&format!("[{repr}]"))
        }
        Value::Array(items) => {
            let hashes: Vec<String> = items.iter().map(jsonhash).collect();
            let repr = hashes
                .iter()
                .map(|h| format!("{h:?}"))
                .collect::<Vec<_>>()
                .join(", ");
            sha1_hex(&format!("({repr})"))
        }
        Value::Null => sha1_hex("null"),
        Value::Bool(b) => sha1_hex(&format!("b:{b}")),
        Value::Number(n) => sha1_hex(&format!("n:{n}")),
        Value::String(s) => sha1_hex(&format!("s:{s}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_with_different_type_tags_do_not_collide() {
        assert_ne!(jsonhash(&json!("5")), jsonhash(&json!(5)));
    }

    #[test]
    fn maps_are_order_insensitive() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(jsonhash(&a), jsonhash(&b));
    }

    #[test]
    fn lists_are_order_sensitive() {
        let a = json!(["x", "y"]);
        let b = json!(["y", "x"]);
        assert_ne!(jsonhash(&a), jsonhash(&b));
    }

    #[test]
    fn stable_across_repeated_calls() {
        let v = json!({"tags": ["a", "b"], "name": "x"});
        assert_eq!(jsonhash(&v), jsonhash(&v));
    }
}
