//! The diagnostics engine: one process-wide hub tying the registry, builder,
//! perf store and frame scheduler together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hudwatch_types::Snapshot;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::builder::{BuildRequest, SnapshotBuilder};
use crate::error::RegistrationError;
use crate::format::now_ms;
use crate::output::{Emission, Output};
use crate::perf::PerfStore;
use crate::provider::{Environment, SectionProvider};
use crate::providers::{
    HealthProvider, PerfProvider, DEFAULT_SLOW_THRESHOLD_MS, HEALTH_ORDER, HEALTH_SECTION,
    PERF_ORDER, PERF_SECTION,
};
use crate::registry::{SectionRegistry, StatsBoard, DEFAULT_ORDER};
use crate::scheduler::FrameScheduler;

#[cfg(feature = "tokio")]
use crate::frame::{FrameSignal, DEFAULT_FRAME_INTERVAL};

/// Perf key under which every snapshot build is timed.
pub const SNAPSHOT_BUILD_KEY: &str = "snapshot.build";

/// Shortest cadence accepted by [`EngineBuilder::interval`].
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Options for [`DiagnosticsEngine::refresh`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Build even while cadence builds are paused.
    pub allow_while_paused: bool,
}

struct EngineInner {
    registry: SectionRegistry,
    builder: Mutex<SnapshotBuilder>,
    latest: RwLock<Option<Arc<Snapshot>>>,
    environment: RwLock<Environment>,
    perf: PerfStore,
    scheduler: FrameScheduler,
    outputs: Vec<Output>,
    #[cfg(feature = "tokio")]
    frame_signal: Arc<FrameSignal>,
    #[cfg(feature = "tokio")]
    frame_interval: Duration,
}

/// Process-scoped diagnostics hub.
///
/// Cloning gives another handle to the same engine. Collaborators register
/// providers through [`register_section_provider`](Self::register_section_provider)
/// before the first build; HUD panels read [`snapshot`](Self::snapshot) and
/// queue DOM-style work on [`scheduler`](Self::scheduler).
///
/// # Example
///
/// ```rust
/// use hudwatch_sdk::{BuildContext, DiagnosticsEngine, ProviderFault, RefreshOptions};
/// use serde_json::{json, Value};
///
/// let engine = DiagnosticsEngine::builder().version("1.2.0").build();
/// engine
///     .register_section_provider(
///         "routes",
///         |_: &BuildContext<'_>| -> Result<Value, ProviderFault> { Ok(json!({ "count": 3 })) },
///         Some(10),
///     )
///     .unwrap();
///
/// let snapshot = engine.refresh(RefreshOptions::default()).unwrap();
/// assert_eq!(snapshot.section("routes"), Some(&json!({ "count": 3 })));
/// assert_eq!(snapshot.meta.version, "1.2.0");
/// ```
#[derive(Clone)]
pub struct DiagnosticsEngine {
    inner: Arc<EngineInner>,
}

impl DiagnosticsEngine {
    /// Create an engine with default settings and the built-in providers.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Register a section provider, at [`DEFAULT_ORDER`] when `order` is
    /// `None`.
    pub fn register_section_provider<P>(
        &self,
        id: &str,
        provider: P,
        order: Option<i64>,
    ) -> Result<(), RegistrationError>
    where
        P: SectionProvider + 'static,
    {
        self.inner
            .registry
            .register(id, order.unwrap_or(DEFAULT_ORDER), provider)
    }

    /// The registry, for collaborators that want their own handle.
    pub fn registry(&self) -> &SectionRegistry {
        &self.inner.registry
    }

    /// Mark the host ready: apply registrations buffered so far.
    pub fn open(&self) -> usize {
        self.inner.registry.open()
    }

    /// The latest snapshot, if one has been built.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.latest.read().clone()
    }

    /// Build a snapshot now.
    ///
    /// Returns `None` without building while paused, unless
    /// `allow_while_paused` is set. A refresh requested while another build
    /// is running (for example from inside a provider) does not start a
    /// second build; it returns the latest finished snapshot instead.
    pub fn refresh(&self, options: RefreshOptions) -> Option<Arc<Snapshot>> {
        let environment = self.inner.environment.read().clone();
        if environment.paused && !options.allow_while_paused {
            trace!("refresh skipped while paused");
            return None;
        }

        let Some(mut builder) = self.inner.builder.try_lock() else {
            debug!("refresh requested during a build, returning latest snapshot");
            return self.snapshot();
        };

        let previous = self.snapshot();
        let watch = self.inner.perf.time_start(SNAPSHOT_BUILD_KEY);
        let snapshot = Arc::new(builder.build(BuildRequest {
            previous: previous.as_deref(),
            environment: &environment,
            now_ms: now_ms(),
        }));
        watch.end();

        *self.inner.latest.write() = Some(snapshot.clone());
        Some(snapshot)
    }

    /// A cadence build: a refresh that respects pause.
    pub fn tick(&self) -> Option<Arc<Snapshot>> {
        self.refresh(RefreshOptions::default())
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.environment.write().paused = paused;
        debug!(paused, "diagnostics pause toggled");
    }

    pub fn is_paused(&self) -> bool {
        self.inner.environment.read().paused
    }

    /// Set or clear a consumer filter. Takes effect on the next build.
    pub fn set_filter(&self, key: &str, value: Option<String>) {
        let mut environment = self.inner.environment.write();
        match value {
            Some(value) => {
                environment.filters.insert(key.to_string(), value);
            }
            None => {
                environment.filters.remove(key);
            }
        }
    }

    /// Copy of the current filters.
    pub fn filters(&self) -> BTreeMap<String, String> {
        self.inner.environment.read().filters.clone()
    }

    /// Copy of the environment handed to providers.
    pub fn environment(&self) -> Environment {
        self.inner.environment.read().clone()
    }

    pub fn perf(&self) -> &PerfStore {
        &self.inner.perf
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.inner.scheduler
    }

    /// Per-provider build stats.
    pub fn stats(&self) -> StatsBoard {
        self.inner.registry.stats()
    }

    fn emission(&self, snapshot: Arc<Snapshot>) -> Emission {
        Emission {
            snapshot,
            stats: self.inner.registry.stats().all(),
            counters: self.inner.perf.dump(),
        }
    }

    /// Start background cadence builds, emission and the frame loop.
    ///
    /// Spawns tokio tasks: one ticks every interval and emits each new
    /// snapshot to all outputs, one flushes the frame scheduler after each
    /// frame request. Prometheus outputs start their HTTP server here.
    #[cfg(feature = "tokio")]
    pub fn start(&self) -> EmissionHandle {
        use tokio::sync::watch;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = self.clone();
        let interval = self.inner.environment.read().interval;

        #[cfg(feature = "prometheus")]
        for output in self.inner.outputs.iter() {
            if let Output::Prometheus(exporter) = output {
                exporter.start_server();
            }
        }

        let frames = crate::frame::drive(
            self.inner.frame_signal.clone(),
            self.inner.scheduler.clone(),
            self.inner.frame_interval,
        );

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Some(snapshot) = engine.tick() {
                            engine.emit(snapshot).await;
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("emission loop stopped");
        });

        EmissionHandle {
            stop_tx,
            frames: Some(frames),
        }
    }

    /// Emit the latest snapshot to all outputs now, building one first if
    /// none exists yet.
    #[cfg(feature = "tokio")]
    pub async fn emit_now(&self) {
        let snapshot = match self.snapshot() {
            Some(snapshot) => Some(snapshot),
            None => self.refresh(RefreshOptions {
                allow_while_paused: true,
            }),
        };
        if let Some(snapshot) = snapshot {
            self.emit(snapshot).await;
        }
    }

    #[cfg(feature = "tokio")]
    async fn emit(&self, snapshot: Arc<Snapshot>) {
        let emission = self.emission(snapshot);
        for output in self.inner.outputs.iter() {
            if let Err(e) = output.emit(&emission).await {
                tracing::warn!(error = %e, "failed to emit snapshot");
            }
        }
    }
}

impl Default for DiagnosticsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DiagnosticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsEngine")
            .field("registry", &self.inner.registry)
            .field("environment", &*self.inner.environment.read())
            .field("outputs", &self.inner.outputs.len())
            .finish()
    }
}

/// Builder for a [`DiagnosticsEngine`].
#[derive(Debug)]
pub struct EngineBuilder {
    version: String,
    interval: Duration,
    paused: bool,
    outputs: Vec<Output>,
    builtin_providers: bool,
    slow_threshold_ms: f64,
    frame_interval: Duration,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            version: String::new(),
            interval: Duration::from_secs(1),
            paused: false,
            outputs: Vec::new(),
            builtin_providers: true,
            slow_threshold_ms: DEFAULT_SLOW_THRESHOLD_MS,
            #[cfg(feature = "tokio")]
            frame_interval: DEFAULT_FRAME_INTERVAL,
            #[cfg(not(feature = "tokio"))]
            frame_interval: Duration::from_millis(16),
        }
    }

    /// Host application version, copied into every snapshot.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Cadence between background builds. Defaults to 1 second.
    ///
    /// Values below [`MIN_INTERVAL`] are raised to it.
    pub fn interval(mut self, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(?interval, min = ?MIN_INTERVAL, "build interval too short, clamping");
        }
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Start with cadence builds paused.
    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    /// Add an output destination.
    ///
    /// Multiple outputs can be added; snapshots are emitted to all of them.
    pub fn output(mut self, output: Output) -> Self {
        self.outputs.push(output);
        self
    }

    /// Register the built-in `health` and `perf` providers. On by default.
    pub fn builtin_providers(mut self, enabled: bool) -> Self {
        self.builtin_providers = enabled;
        self
    }

    /// Build duration above which the health section reports a provider
    /// as slow.
    pub fn slow_threshold_ms(mut self, threshold: f64) -> Self {
        self.slow_threshold_ms = threshold;
        self
    }

    /// Delay between a frame request and its flush once the engine is
    /// started. Defaults to 16ms.
    pub fn frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }

    pub fn build(self) -> DiagnosticsEngine {
        let registry = SectionRegistry::new();
        let perf = PerfStore::new();

        if self.builtin_providers {
            let health = HealthProvider::with_threshold(&registry, self.slow_threshold_ms);
            // Buffered until the registry opens, cannot conflict on a fresh registry.
            let _ = registry.register(HEALTH_SECTION, HEALTH_ORDER, health);
            let _ = registry.register(PERF_SECTION, PERF_ORDER, PerfProvider::new(perf.clone()));
        }

        #[cfg(feature = "tokio")]
        let frame_signal = Arc::new(FrameSignal::default());
        #[cfg(feature = "tokio")]
        let scheduler = FrameScheduler::with_perf(frame_signal.clone(), perf.clone());
        #[cfg(not(feature = "tokio"))]
        let scheduler = FrameScheduler::with_perf(
            Arc::new(crate::scheduler::ManualFrames::default()),
            perf.clone(),
        );
        #[cfg(not(feature = "tokio"))]
        let _ = self.frame_interval;

        let environment = Environment {
            version: self.version,
            interval: self.interval,
            paused: self.paused,
            filters: BTreeMap::new(),
        };

        DiagnosticsEngine {
            inner: Arc::new(EngineInner {
                builder: Mutex::new(SnapshotBuilder::new(registry.clone())),
                registry,
                latest: RwLock::new(None),
                environment: RwLock::new(environment),
                perf,
                scheduler,
                outputs: self.outputs,
                #[cfg(feature = "tokio")]
                frame_signal,
                #[cfg(feature = "tokio")]
                frame_interval: self.frame_interval,
            }),
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for controlling background emission.
///
/// Drop this handle to stop emission, or call `stop()` explicitly.
#[cfg(feature = "tokio")]
pub struct EmissionHandle {
    stop_tx: tokio::sync::watch::Sender<bool>,
    frames: Option<crate::frame::FrameLoopHandle>,
}

#[cfg(feature = "tokio")]
impl EmissionHandle {
    /// Stop background emission and the frame loop.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(frames) = self.frames.take() {
            frames.stop();
        }
    }
}
