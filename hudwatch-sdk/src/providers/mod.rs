//! Built-in section providers.
//!
//! - [`TrendProvider`] keeps a rolling history over another section.
//! - [`HealthProvider`] republishes the registry's own build stats.
//! - [`PerfProvider`] publishes the perf counters.

mod health;
mod perf;
mod trend;

pub use health::{HealthProvider, DEFAULT_SLOW_THRESHOLD_MS};
pub use perf::PerfProvider;
pub use trend::{TrendAggregator, TrendProvider, DEFAULT_TOP_N, DEFAULT_TREND_CAPACITY};

/// Section id of the built-in health provider.
pub const HEALTH_SECTION: &str = "health";

/// Section id of the built-in perf provider.
pub const PERF_SECTION: &str = "perf";

/// Order of the built-in health provider. It runs after user providers so
/// the stats it reports are as fresh as possible.
pub const HEALTH_ORDER: i64 = 10_000;

/// Order of the built-in perf provider.
pub const PERF_ORDER: i64 = 10_001;
