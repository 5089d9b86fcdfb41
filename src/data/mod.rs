//! Value parsing and formatting shared by the CLI and its settings.
//!
//! - [`duration`]: Parsing and formatting of duration strings (e.g., "1s", "500ms")

pub mod duration;

pub use duration::{format_duration, parse_duration, DurationError};
