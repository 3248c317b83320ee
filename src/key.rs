//! Deterministic string keys from arbitrary payloads.
//!
//! Two payloads that serialize to the same key are treated as the same
//! resource (spec invariant 7): scalars pass through as their string form,
//! objects canonicalize to a sorted array of single-key objects so that
//! field order never affects the key, and arrays keep their element order.

use serde::Serialize;
use serde_json::Value;

/// Serialize `payload` into a deterministic cache key.
///
/// Strings and numbers at the top level are returned as their own string
/// form; everything else (objects, arrays, `null`, `bool`) is canonicalized
/// and rendered as JSON.
pub fn serialize_key<T: Serialize>(payload: &T) -> String {
  let value = serde_json::to_value(payload).expect("payload must serialize to JSON");
  key_from_value(&value)
}

/// Same as [`serialize_key`] but takes an already-built [`Value`].
pub fn key_from_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    other => {
      let canonical = canonicalize(other);
      serde_json::to_string(&canonical).expect("canonical value must serialize")
    }
  }
}

/// Recursively canonicalize a JSON value: objects become an array of
/// single-key objects sorted lexicographically by key, with `undefined`
/// members (absent from the map to begin with, by serde's own skip rules)
/// never appearing; arrays keep element order but recurse into each slot.
fn canonicalize(value: &Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      let entries = keys
        .into_iter()
        .map(|k| {
          let mut single = serde_json::Map::new();
          single.insert(k.clone(), canonicalize(&map[k]));
          Value::Object(single)
        })
        .collect();
      Value::Array(entries)
    }
    Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
    scalar => scalar.clone(),
  }
}
