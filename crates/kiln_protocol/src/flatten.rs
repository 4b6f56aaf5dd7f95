//! Flattening and deterministic hashing for result records.

use blake3::Hasher;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::defaults::DEFAULT_REQUEST_ID_NAMESPACE;

const SEP: u8 = 0x1f;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Render a scalar JSON value the way it appears in a flattened pair.
fn scalar_repr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Flatten nested JSON into ordered `(key, scalar)` pairs.
///
/// Nested object keys are joined with `__`; list elements are flattened
/// in order under the parent key, so a key may repeat. Uses the default
/// separator and keeps empty-string scalars.
pub fn flatten(value: &Value) -> Vec<(String, Value)> {
    flatten_with(value, "__", true)
}

/// Flatten with an explicit separator and empty-string policy.
///
/// When `allow_null_strings` is false, pairs whose scalar is `""` are
/// dropped.
pub fn flatten_with(value: &Value, separator: &str, allow_null_strings: bool) -> Vec<(String, Value)> {
    let mut pairs = Vec::new();
    flatten_into(value, String::new(), separator, allow_null_strings, &mut pairs);
    pairs
}

fn flatten_into(
    value: &Value,
    keystring: String,
    separator: &str,
    allow_null_strings: bool,
    pairs: &mut Vec<(String, Value)>,
) {
    match value {
        Value::Object(map) => {
            let prefix = if keystring.is_empty() {
                keystring
            } else {
                format!("{keystring}{separator}")
            };
            for (key, nested) in map {
                let updated = format!("{prefix}{key}");
                flatten_into(nested, updated, separator, allow_null_strings, pairs);
            }
        }
        Value::Array(elements) => {
            for element in elements {
                flatten_into(element, keystring.clone(), separator, allow_null_strings, pairs);
            }
        }
        scalar => {
            if !allow_null_strings && scalar.as_str() == Some("") {
                return;
            }
            pairs.push((keystring, scalar.clone()));
        }
    }
}

/// Deterministic dedup key for a result record.
///
/// The record is flattened, the pairs sorted, and the sorted
/// representation hashed, so key order and nesting shape do not affect
/// the key. Repeated deliveries of the same record land on the same row.
pub fn dedup_key(record: &Map<String, Value>) -> String {
    let mut parts: Vec<String> = flatten(&Value::Object(record.clone()))
        .into_iter()
        .map(|(key, value)| format!("{key}={}", scalar_repr(&value)))
        .collect();
    parts.sort();
    let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
    hash_parts(&refs)
}

/// Derive a deterministic request id from a set of values.
///
/// Values are stringified and sorted first, so argument order does not
/// change the id. Used to mint ids for requests that arrive without one,
/// keeping redeliveries of the same request on the same id.
pub fn derive_request_id<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<String> = values.into_iter().map(|v| v.as_ref().to_string()).collect();
    sorted.sort();
    let refs: Vec<&str> = sorted.iter().map(String::as_str).collect();
    let unique = hash_parts(&refs);
    let name = format!("{DEFAULT_REQUEST_ID_NAMESPACE}/{unique}");
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
}
