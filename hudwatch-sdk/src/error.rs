//! Error types for registration and provider builds.

use std::any::Any;

use thiserror::Error;

/// Why a provider registration was dropped.
///
/// Registration failures are never fatal: the registry logs them and keeps
/// whatever it had before. The error is returned so callers can react if
/// they care.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The provider id was empty.
    #[error("provider id must not be empty")]
    EmptyId,

    /// A provider with this id is already registered.
    #[error("provider `{0}` is already registered")]
    Duplicate(String),

    /// The registry stopped accepting providers.
    #[error("registry is frozen, provider `{0}` was not registered")]
    Frozen(String),
}

/// A failure raised by a section provider during a build.
///
/// The registry turns every fault (including panics) into an error section,
/// so a fault never escapes a snapshot build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderFault {
    message: String,
}

impl ProviderFault {
    /// Create a fault with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The fault message as recorded in stats and the error section.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Build a fault from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        Self::new(panic_message(payload.as_ref()).unwrap_or("provider panicked"))
    }
}

/// The message carried by a panic payload, if it is a string.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some(*s)
    } else {
        payload.downcast_ref::<String>().map(String::as_str)
    }
}

impl From<String> for ProviderFault {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProviderFault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for ProviderFault {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("serialization failed: {}", err))
    }
}

impl From<std::io::Error> for ProviderFault {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}
