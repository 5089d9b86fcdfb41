//! Rolling per-key history over an upstream "current value per key" section.

use std::collections::{BTreeMap, VecDeque};

use hudwatch_types::is_error_section;
use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderFault;
use crate::provider::{BuildContext, SectionProvider};

/// Keys promoted into the display order on each update.
pub const DEFAULT_TOP_N: usize = 5;

/// Samples kept per key.
pub const DEFAULT_TREND_CAPACITY: usize = 60;

/// Bounded history for the top keys of a changing value map.
///
/// Each non-empty update appends the current value of the top-N keys to
/// their histories, evicting the oldest sample once a history is full.
/// Empty updates leave everything untouched.
#[derive(Debug, Clone)]
pub struct TrendAggregator {
    top_n: usize,
    capacity: usize,
    history: BTreeMap<String, VecDeque<f64>>,
    order: Vec<String>,
    samples: u64,
}

impl TrendAggregator {
    /// Create an aggregator tracking `top_n` keys with `capacity` samples
    /// each. A capacity of 0 is treated as 1.
    pub fn new(top_n: usize, capacity: usize) -> Self {
        Self {
            top_n,
            capacity: capacity.max(1),
            history: BTreeMap::new(),
            order: Vec::new(),
            samples: 0,
        }
    }

    /// Fold one set of current values into the history.
    pub fn update(&mut self, current: &BTreeMap<String, f64>) {
        if current.is_empty() {
            return;
        }

        let mut ranked: Vec<(&String, f64)> = current.iter().map(|(k, v)| (k, *v)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(self.top_n);

        for (key, value) in &ranked {
            let samples = self.history.entry((*key).clone()).or_default();
            samples.push_back(*value);
            while samples.len() > self.capacity {
                samples.pop_front();
            }
        }

        let mut order: Vec<String> = ranked.iter().map(|(key, _)| (*key).clone()).collect();
        // BTreeMap iteration is already alphabetical.
        let rest: Vec<String> = self
            .history
            .keys()
            .filter(|key| !order.contains(*key))
            .cloned()
            .collect();
        order.extend(rest);

        self.order = order;
        self.samples += 1;
    }

    /// Samples recorded for one key, oldest first.
    pub fn history(&self, key: &str) -> Option<&VecDeque<f64>> {
        self.history.get(key)
    }

    /// Display order: the latest top-N by value, then the other tracked keys.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Number of non-empty updates applied.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn top_n(&self) -> usize {
        self.top_n
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Render the current state as a section value.
    pub fn to_section(&self) -> Result<Value, ProviderFault> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct TrendSection<'a> {
            history: &'a BTreeMap<String, VecDeque<f64>>,
            order: &'a [String],
            top_n: usize,
            capacity: usize,
            samples: u64,
        }

        Ok(serde_json::to_value(TrendSection {
            history: &self.history,
            order: &self.order,
            top_n: self.top_n,
            capacity: self.capacity,
            samples: self.samples,
        })?)
    }
}

impl Default for TrendAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_N, DEFAULT_TREND_CAPACITY)
    }
}

/// A provider that trends another section.
///
/// The upstream section is read from the *previous* snapshot. It must be an
/// object of numeric values, optionally nested at a JSON pointer. Missing
/// sections, error sections and non-numeric entries count as no data.
///
/// # Example
///
/// ```rust
/// use hudwatch_sdk::{SectionRegistry, TrendAggregator, TrendProvider};
///
/// let registry = SectionRegistry::new();
/// registry
///     .register("channel_trend", 20, TrendProvider::new("channels", TrendAggregator::new(3, 30)))
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct TrendProvider {
    source: String,
    pointer: Option<String>,
    aggregator: TrendAggregator,
}

impl TrendProvider {
    /// Trend the section `source` as a whole.
    pub fn new(source: impl Into<String>, aggregator: TrendAggregator) -> Self {
        Self {
            source: source.into(),
            pointer: None,
            aggregator,
        }
    }

    /// Read the values at a JSON pointer inside the source section
    /// (for example `/occupancy`).
    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    /// The upstream section id.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn aggregator(&self) -> &TrendAggregator {
        &self.aggregator
    }

    fn current_values(&self, ctx: &BuildContext<'_>) -> BTreeMap<String, f64> {
        let Some(section) = ctx.previous(&self.source) else {
            return BTreeMap::new();
        };
        if is_error_section(section) {
            return BTreeMap::new();
        }

        let target = match &self.pointer {
            Some(pointer) => section.pointer(pointer),
            None => Some(section),
        };

        match target {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

impl SectionProvider for TrendProvider {
    fn build(&mut self, ctx: &BuildContext<'_>) -> Result<Value, ProviderFault> {
        let current = self.current_values(ctx);
        self.aggregator.update(&current);
        self.aggregator.to_section()
    }
}
