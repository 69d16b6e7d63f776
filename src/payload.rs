//! Lenient field extraction for push payloads.
//!
//! Servers are inconsistent about key casing (`participant_count` vs
//! `participantCount`), so every lookup takes a list of candidate keys and
//! returns the first one present with the right JSON type.

use serde_json::Value;

pub(crate) fn pick_str<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        if let Some(value) = data.get(key).and_then(Value::as_str) {
            return Some(value);
        }
    }
    None
}

pub(crate) fn pick_number(data: &Value, keys: &[&str]) -> Option<f64> {
    for key in keys {
        if let Some(value) = data.get(key) {
            if let Some(n) = value.as_f64() {
                return Some(n);
            }
        }
    }
    None
}

/// Non-negative integer field. Floats are rounded; negatives are rejected.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn pick_count(data: &Value, keys: &[&str]) -> Option<u64> {
    for key in keys {
        if let Some(value) = data.get(key) {
            if let Some(n) = value.as_u64() {
                return Some(n);
            }
            if let Some(n) = value.as_f64().filter(|n| n.is_finite() && *n >= 0.0) {
                return Some(n.round() as u64);
            }
        }
    }
    None
}

pub(crate) fn pick_bool(data: &Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        if let Some(value) = data.get(key).and_then(Value::as_bool) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
#[path = "payload_test.rs"]
mod tests;
