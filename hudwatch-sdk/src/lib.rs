//! # hudwatch-sdk
//!
//! Snapshot engine for live developer overlays (HUDs).
//!
//! Collaborators register named section providers; the engine calls each of
//! them once per build, in a fixed order, and assembles the results into one
//! versioned [`Snapshot`]. Every provider is timed, fault-isolated and
//! change-tracked without its cooperation. A frame scheduler coalesces UI
//! work so nothing runs twice in one frame.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hudwatch_sdk::{BuildContext, DiagnosticsEngine, Output, ProviderFault, Task};
//! use serde_json::{json, Value};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Build a snapshot every second and write it to a file
//!     let engine = DiagnosticsEngine::builder()
//!         .version(env!("CARGO_PKG_VERSION"))
//!         .output(Output::file("hud.json"))
//!         .interval(Duration::from_secs(1))
//!         .build();
//!
//!     // Register providers before the first build
//!     engine
//!         .register_section_provider(
//!             "routes",
//!             |_: &BuildContext<'_>| -> Result<Value, ProviderFault> { Ok(json!({ "count": 4 })) },
//!             Some(10),
//!         )
//!         .unwrap();
//!     engine.open();
//!
//!     // Start cadence builds and the frame loop (non-blocking)
//!     let _emission = engine.start();
//!
//!     // Queue render work; duplicates within a frame collapse
//!     let render = Task::new(|| println!("render"));
//!     engine.scheduler().enqueue("render", &render);
//!     engine.scheduler().enqueue("render", &render);
//! }
//! ```
//!
//! ## Features
//!
//! - **Ordered providers**: explicit order, ties by registration sequence
//! - **Freeze-once registry**: the provider set is fixed at the first build
//! - **Fault isolation**: a failing or panicking provider becomes an error section
//! - **Self-observation**: built-in `health` and `perf` sections
//! - **Multiple outputs**: File, TCP, channel or Prometheus

mod builder;
mod diff;
mod engine;
mod error;
pub mod format;
mod output;
mod perf;
mod provider;
mod providers;
mod registry;
mod scheduler;

#[cfg(feature = "tokio")]
pub mod frame;

#[cfg(feature = "prometheus")]
pub mod prometheus;

pub use builder::{BuildRequest, SnapshotBuilder};
pub use diff::shallow_equal;
pub use engine::{
    DiagnosticsEngine, EngineBuilder, RefreshOptions, MIN_INTERVAL, SNAPSHOT_BUILD_KEY,
};
pub use error::{ProviderFault, RegistrationError};
pub use output::{Emission, Output};
pub use perf::{PerfStore, Stopwatch};
pub use provider::{BuildContext, Environment, SectionProvider};
pub use providers::{
    HealthProvider, PerfProvider, TrendAggregator, TrendProvider, DEFAULT_SLOW_THRESHOLD_MS,
    DEFAULT_TOP_N, DEFAULT_TREND_CAPACITY, HEALTH_ORDER, HEALTH_SECTION, PERF_ORDER, PERF_SECTION,
};
pub use registry::{Lifecycle, SectionRegistry, StatsBoard, WeakRegistry, DEFAULT_ORDER};
pub use scheduler::{FlushReport, FramePhase, FrameRequester, FrameScheduler, ManualFrames, Task};

#[cfg(feature = "tokio")]
pub use engine::EmissionHandle;

// Re-export types for convenience
pub use hudwatch_types::{
    error_section, is_error_section, section_error, Counter, ProviderStats, SchemaVersion,
    Snapshot, SnapshotMeta,
};
