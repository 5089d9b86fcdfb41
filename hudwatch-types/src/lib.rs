//! # hudwatch-types
//!
//! Core types for HUD diagnostics. This crate defines the schema shared by
//! the snapshot engine (`hudwatch-sdk`) and anything that consumes its
//! output: overlay panels, exporters, or the `hudwatch` CLI.
//!
//! ## Design Goals
//!
//! - **Polymorphic sections**: each provider owns the shape of its section,
//!   so section payloads are plain JSON values
//! - **Uniform failures**: a failed provider always shows up as the same
//!   `{ "error": true, "message": ... }` shape
//! - **Versioned schema**: snapshots carry version info for forward compatibility
//! - **Derived values stay derived**: averages are recomputed from their inputs
//!
//! ## Example
//!
//! ```rust
//! use hudwatch_types::{error_section, section_error, Counter};
//!
//! let failed = error_section("routing table unavailable");
//! assert_eq!(section_error(&failed), Some("routing table unavailable"));
//!
//! let mut counter = Counter::default();
//! counter.record(4.0);
//! counter.record(2.0);
//! assert_eq!(counter.avg_ms, 3.0);
//! ```
//!
//! ## Schema Version
//!
//! The current schema version is **1**. The version is included in serialized
//! snapshots to allow consumers to handle format evolution gracefully.

mod section;
mod snapshot;
mod stats;
mod version;

pub use section::*;
pub use snapshot::*;
pub use stats::*;
pub use version::*;

/// Current schema version.
///
/// Increment this when making breaking changes to the snapshot format.
/// Consumers should check this version and handle older formats appropriately.
pub const SCHEMA_VERSION: u32 = 1;
