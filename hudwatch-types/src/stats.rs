//! Timing statistics: per-provider build stats and perf counters.

use serde::{Deserialize, Serialize};

/// Build statistics for a single section provider.
///
/// Updated in place by the registry on every build, whether the provider
/// succeeded or failed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    /// Duration of the most recent build.
    pub last_time_ms: f64,

    /// Sum of all build durations.
    pub total_time_ms: f64,

    /// Number of builds, successful or not.
    pub build_count: u64,

    /// Longest build seen so far.
    pub max_time_ms: f64,

    /// Message of the most recent failure, cleared by the next success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Whether the latest result differed (shallowly) from the previous section.
    pub last_changed: bool,
}

impl ProviderStats {
    /// Record one build of `elapsed_ms`.
    pub fn record_build(&mut self, elapsed_ms: f64) {
        self.last_time_ms = elapsed_ms;
        self.total_time_ms += elapsed_ms;
        self.max_time_ms = self.max_time_ms.max(elapsed_ms);
        self.build_count += 1;
    }

    /// Mean build duration, 0 before the first build.
    pub fn avg_time_ms(&self) -> f64 {
        if self.build_count == 0 {
            0.0
        } else {
            self.total_time_ms / self.build_count as f64
        }
    }

    /// Whether the last build failed.
    pub fn is_failing(&self) -> bool {
        self.last_error.is_some()
    }
}

/// A named perf counter.
///
/// `avg_ms` is stored for consumers but is always recomputed from
/// `total_ms / count` whenever either input changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub count: u64,
    pub total_ms: f64,
    pub last_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
}

impl Counter {
    /// Bump the count without a timing sample.
    pub fn increment(&mut self) {
        self.count += 1;
        self.recompute_avg();
    }

    /// Stamp a completed timing into the counter.
    pub fn record(&mut self, elapsed_ms: f64) {
        self.count += 1;
        self.total_ms += elapsed_ms;
        self.last_ms = elapsed_ms;
        self.max_ms = self.max_ms.max(elapsed_ms);
        self.recompute_avg();
    }

    fn recompute_avg(&mut self) {
        self.avg_ms = if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        };
    }
}
