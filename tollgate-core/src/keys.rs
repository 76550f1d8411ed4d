//! Key building and blank-value checks shared by the cache and guard layers.

use crate::error::CacheError;
use serde::Serialize;
use serde_json::Value;

/// Separator used when joining key parts.
pub const KEY_SEPARATOR: &str = "_";

/// Join key parts with `_`.
///
/// Every part must be non-blank; a blank part would silently collide with
/// other keys, so it is rejected instead.
pub fn build_key<I, S>(parts: I) -> Result<String, CacheError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        let part = part.as_ref();
        if part.trim().is_empty() {
            return Err(CacheError::EmptyKeyPart);
        }
        if i > 0 {
            key.push_str(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    if key.is_empty() {
        return Err(CacheError::EmptyKeyPart);
    }
    Ok(key)
}

/// Blank check over an already-decoded JSON value.
///
/// Null, whitespace-only strings, empty arrays and empty objects are blank.
pub fn is_blank_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Blank check over any serializable value.
///
/// `None`, `""`, `"   "`, empty vectors, sets, maps and slices are blank.
/// Values that fail to serialize are treated as present.
pub fn is_blank<T: Serialize + ?Sized>(value: &T) -> bool {
    match serde_json::to_value(value) {
        Ok(v) => is_blank_value(&v),
        Err(_) => false,
    }
}
