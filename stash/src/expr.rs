//! Dotted field-path evaluation against JSON documents.
//!
//! `"foo"` evaluates to `doc["foo"]`, `"foo.bar"` to `doc["foo"]["bar"]`.

use serde_json::Value;

use crate::{Error, Result};

/// Evaluate a dotted `path` against `value` and return the string form of the result.
///
/// An empty path yields the value itself. Strings are returned unquoted; every
/// other value uses its JSON text.
pub fn evaluate(value: &Value, path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(display_value(value));
    }

    let (head, tail) = match path.split_once('.') {
        Some((head, tail)) => (head, tail),
        None => (path, ""),
    };

    let map = value
        .as_object()
        .ok_or_else(|| Error::NotAMapping(path.to_string()))?;

    match map.get(head) {
        Some(next) if !next.is_null() => evaluate(next, tail),
        _ => Err(Error::KeyNotFound(path.to_string())),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
