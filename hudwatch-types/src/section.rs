//! Section payloads and the shared failure shape.

use serde_json::{json, Value};

/// Identifier of a section (and of the provider that produces it).
pub type SectionId = String;

/// Build the section value recorded for a failed provider.
///
/// The shape is fixed so every consumer can recognise a failure without
/// knowing anything else about the provider:
///
/// ```json
/// { "error": true, "message": "..." }
/// ```
pub fn error_section(message: impl Into<String>) -> Value {
    json!({
        "error": true,
        "message": message.into(),
    })
}

/// Returns the failure message if `value` has the error-section shape.
///
/// A section only counts as failed when `error` is literally `true`; payloads
/// that merely contain an `error` field of another type are left alone.
pub fn section_error(value: &Value) -> Option<&str> {
    let object = value.as_object()?;
    match object.get("error") {
        Some(Value::Bool(true)) => Some(
            object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error"),
        ),
        _ => None,
    }
}

/// Whether `value` is an error section.
pub fn is_error_section(value: &Value) -> bool {
    section_error(value).is_some()
}
