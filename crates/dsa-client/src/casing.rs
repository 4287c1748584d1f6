//! Key casing normalization.
//!
//! The backend speaks snake_case; dashboard types decode camelCase. Every
//! payload is rewritten once at the transport boundary.

use serde_json::{Map, Value};

/// Rewrite every `_x` (underscore followed by a lowercase ASCII letter) as
/// `X`. Other underscores are kept.
pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if let Some(&next) = chars.peek() {
                if next.is_ascii_lowercase() {
                    out.push(next.to_ascii_uppercase());
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Recursively rewrite every object key of `value` to camelCase.
pub fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (snake_to_camel(&k), normalize_keys(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}
