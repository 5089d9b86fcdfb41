//! Perf counters and stopwatch timers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use hudwatch_types::Counter;
use parking_lot::Mutex;

use crate::format::duration_ms;

/// Keyed perf counters.
///
/// Cloning a `PerfStore` gives another handle to the same counters, so the
/// engine, the scheduler and the perf provider can all share one store.
///
/// # Example
///
/// ```rust
/// use hudwatch_sdk::PerfStore;
///
/// let perf = PerfStore::new();
/// perf.count("panel.render");
///
/// let watch = perf.time_start("snapshot.build");
/// // ... work ...
/// let elapsed = watch.end();
///
/// let dump = perf.dump();
/// assert_eq!(dump["snapshot.build"].count, 1);
/// assert_eq!(dump["snapshot.build"].last_ms, elapsed);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PerfStore {
    counters: Arc<Mutex<BTreeMap<String, Counter>>>,
}

impl PerfStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a bare counter.
    pub fn count(&self, key: &str) {
        self.counters
            .lock()
            .entry(key.to_string())
            .or_default()
            .increment();
    }

    /// Start a stopwatch for `key`.
    ///
    /// Nothing is recorded until [`Stopwatch::end`] is called. Several
    /// stopwatches may run on the same key at once and end in any order.
    pub fn time_start(&self, key: &str) -> Stopwatch {
        Stopwatch {
            store: self.clone(),
            key: key.to_string(),
            started: Instant::now(),
        }
    }

    /// Stamp an externally measured duration into `key`.
    pub fn record(&self, key: &str, elapsed_ms: f64) {
        self.counters
            .lock()
            .entry(key.to_string())
            .or_default()
            .record(elapsed_ms);
    }

    /// Get a copy of one counter.
    pub fn get(&self, key: &str) -> Option<Counter> {
        self.counters.lock().get(key).cloned()
    }

    /// Copy of every counter.
    ///
    /// The returned map is owned by the caller; changing it has no effect on
    /// the store.
    pub fn dump(&self) -> BTreeMap<String, Counter> {
        self.counters.lock().clone()
    }

    /// Clear one key, or every key when `key` is `None`.
    pub fn reset(&self, key: Option<&str>) {
        let mut counters = self.counters.lock();
        match key {
            Some(key) => {
                counters.remove(key);
            }
            None => counters.clear(),
        }
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }
}

/// A running timer returned by [`PerfStore::time_start`].
#[derive(Debug)]
#[must_use = "a stopwatch records nothing until `end` is called"]
pub struct Stopwatch {
    store: PerfStore,
    key: String,
    started: Instant,
}

impl Stopwatch {
    /// Stop the timer, record it and return the elapsed milliseconds.
    pub fn end(self) -> f64 {
        let elapsed = duration_ms(self.started.elapsed());
        self.store.record(&self.key, elapsed);
        elapsed
    }

    /// The key this stopwatch records into.
    pub fn key(&self) -> &str {
        &self.key
    }
}
