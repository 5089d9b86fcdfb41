//! Cheap one-level change detection between section values.
//!
//! The registry records whether each provider's output changed since the
//! previous build. Comparing whole JSON trees on every build is too costly
//! for an always-on overlay, so only the top level is inspected:
//!
//! - primitives compare by value
//! - objects are equal when they have the same key set and every value is
//!   `same_slot`-equal
//! - arrays are equal when they have the same length and every element is
//!   `same_slot`-equal
//!
//! Nested objects and arrays compare by kind only. Edits inside them are not
//! reported as changes.

use serde_json::Value;

/// Shallow equality between a fresh section and the previous one.
///
/// A missing previous value always counts as different.
pub fn shallow_equal(current: &Value, previous: Option<&Value>) -> bool {
    let Some(previous) = previous else {
        return false;
    };

    match (current, previous) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, value)| b.get(key).is_some_and(|other| same_slot(value, other)))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same_slot(x, y))
        }
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => false,
        (a, b) => a == b,
    }
}

/// Equality for a single field one level down.
fn same_slot(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_)) => true,
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => false,
        _ => a == b,
    }
}
