//! # hudwatch
//!
//! Command-line host for the hudwatch diagnostics engine.
//!
//! Publishes a `channels` section read from a JSON file, trends it, and
//! emits snapshots to stdout, a file or a Prometheus endpoint.
//!
//! ```text
//! ┌──────────────┐    ┌──────────────────────────────┐    ┌─────────────┐
//! │ channels.json│───▶│ DiagnosticsEngine            │───▶│ stdout/file │
//! └──────────────┘    │  channels → channel_trend    │    │ /metrics    │
//!                     │  → health → perf             │    └─────────────┘
//!                     └──────────────────────────────┘
//! ```
//!
//! - **[`config`]**: layered settings (file, `HUDWATCH_*` environment)
//! - **[`source`]**: the file-backed channel provider
//! - **[`host`]**: engine construction and provider registration
//! - **[`report`]**: plain-text snapshot rendering
//! - **[`data`]**: duration parsing and formatting
//!
//! ## Usage
//!
//! ```bash
//! # One snapshot as JSON
//! hudwatch --channels channels.json --once
//!
//! # Live text report every 500ms, only the kitchen channel
//! hudwatch --channels channels.json --interval 500ms --channel kitchen --summary
//! ```
//!
//! ### As a library
//!
//! ```
//! use hudwatch::config::Settings;
//! use hudwatch::host::{engine_builder, register_providers};
//! use hudwatch_sdk::RefreshOptions;
//!
//! let settings = Settings::default();
//! let engine = engine_builder(&settings).build();
//! register_providers(&engine, &settings).unwrap();
//!
//! let snapshot = engine.refresh(RefreshOptions::default()).unwrap();
//! println!("{}", hudwatch::report::render(&snapshot, "channel_trend"));
//! ```

pub mod config;
pub mod data;
pub mod host;
pub mod report;
pub mod source;

pub use config::{ConfigError, Settings};
pub use source::ChannelFileProvider;
