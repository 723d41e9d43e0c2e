//! Credential redaction for log fields.
//!
//! A field is dropped to [`REDACTED`] when its name contains one of
//! [`SENSITIVE_KEYS`], or when its value looks like an opaque secret: a
//! bearer header, a JWT, or a long hex or base64 run.

use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";

/// Substrings of field names whose values are never logged.
pub const SENSITIVE_KEYS: [&str; 8] = [
    "password",
    "code",
    "secret",
    "token",
    "value",
    "key_material",
    "authorization",
    "cookie",
];

const OPAQUE_MIN_LEN: usize = 48;

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|entry| lower.contains(entry))
}

pub fn looks_like_secret(raw: &str) -> bool {
    if raw.to_ascii_lowercase().starts_with("bearer ") {
        return true;
    }
    if raw.matches('.').count() == 2 && raw.len() > 40 && !raw.contains(' ') {
        return true;
    }
    is_long_hex(raw) || is_long_base64(raw)
}

/// Redact `value` as stored under `key`, descending into objects and arrays.
pub fn redact_value(key: &str, value: &Value) -> Value {
    if is_sensitive_key(key) {
        return Value::String(REDACTED.to_string());
    }

    match value {
        Value::String(s) if looks_like_secret(s) => Value::String(REDACTED.to_string()),
        Value::Object(map) => Value::Object(redact_object(map)),
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(key, v)).collect()),
        _ => value.clone(),
    }
}

pub fn redact_object(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), redact_value(k, v)))
        .collect()
}

fn is_long_hex(value: &str) -> bool {
    value.len() > OPAQUE_MIN_LEN && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_long_base64(value: &str) -> bool {
    value.len() > OPAQUE_MIN_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=' | '_' | '-'))
}
