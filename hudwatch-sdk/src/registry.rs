//! Section provider registry: ordered, instrumented, freeze-once.
//!
//! The registry moves through three phases:
//!
//! ```text
//! Uninitialized ──open()──▶ Accepting ──freeze() / first build──▶ Frozen
//! ```
//!
//! - **Uninitialized**: registrations are buffered in call order.
//! - **Accepting**: buffered registrations have been applied; new ones are
//!   validated and inserted immediately.
//! - **Frozen**: the provider set is fixed; registrations are rejected.
//!
//! Every provider is wrapped in an `InstrumentedProvider` that times it,
//! isolates its failures and records whether its output changed.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use hudwatch_types::{error_section, ProviderStats};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::diff::shallow_equal;
use crate::error::{ProviderFault, RegistrationError};
use crate::format::duration_ms;
use crate::provider::{BuildContext, SectionProvider};

/// Order assigned to providers registered without one.
pub const DEFAULT_ORDER: i64 = 1000;

/// Registry lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Accepting,
    Frozen,
}

/// A registration waiting to be applied.
struct Registration {
    id: String,
    order: i64,
    provider: Box<dyn SectionProvider>,
}

/// Lifecycle phase plus the registrations buffered before `open()`.
struct Gate {
    lifecycle: Lifecycle,
    deferred: Vec<Registration>,
}

struct RegistryInner {
    gate: Mutex<Gate>,
    providers: Mutex<Vec<InstrumentedProvider>>,
    order: RwLock<Vec<String>>,
    next_seq: AtomicU64,
    stats: StatsBoard,
}

/// Ordered collection of section providers.
///
/// Cloning a `SectionRegistry` gives another handle to the same registry;
/// external collaborators keep a clone to register their providers.
///
/// # Example
///
/// ```rust
/// use hudwatch_sdk::{BuildContext, ProviderFault, SectionRegistry};
/// use serde_json::{json, Value};
///
/// let registry = SectionRegistry::new();
/// registry.open();
///
/// registry
///     .register("routes", 10, |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
///         Ok(json!({ "count": 4 }))
///     })
///     .unwrap();
/// registry
///     .register("channels", 5, |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
///         Ok(json!({}))
///     })
///     .unwrap();
///
/// assert_eq!(registry.list_order(), vec!["channels", "routes"]);
/// ```
#[derive(Clone)]
pub struct SectionRegistry {
    inner: Arc<RegistryInner>,
}

impl SectionRegistry {
    /// Create a registry in the `Uninitialized` phase.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                gate: Mutex::new(Gate {
                    lifecycle: Lifecycle::Uninitialized,
                    deferred: Vec::new(),
                }),
                providers: Mutex::new(Vec::new()),
                order: RwLock::new(Vec::new()),
                next_seq: AtomicU64::new(0),
                stats: StatsBoard::default(),
            }),
        }
    }

    /// Register a provider with an explicit order.
    ///
    /// Lower orders run first; equal orders run in registration sequence.
    /// Before [`open`](Self::open) the registration is buffered and `Ok` is
    /// returned; conflicts are then reported (logged) when the buffer is
    /// applied.
    ///
    /// Rejections are logged at `warn` and leave the registry unchanged.
    pub fn register<P>(&self, id: &str, order: i64, provider: P) -> Result<(), RegistrationError>
    where
        P: SectionProvider + 'static,
    {
        self.register_boxed(id, order, Box::new(provider))
    }

    /// Register a provider with [`DEFAULT_ORDER`].
    pub fn register_default<P>(&self, id: &str, provider: P) -> Result<(), RegistrationError>
    where
        P: SectionProvider + 'static,
    {
        self.register(id, DEFAULT_ORDER, provider)
    }

    /// Register an already boxed provider.
    pub fn register_boxed(
        &self,
        id: &str,
        order: i64,
        provider: Box<dyn SectionProvider>,
    ) -> Result<(), RegistrationError> {
        if id.is_empty() {
            warn!("rejected provider registration with empty id");
            return Err(RegistrationError::EmptyId);
        }

        let registration = Registration {
            id: id.to_string(),
            order,
            provider,
        };

        let mut gate = self.inner.gate.lock();
        let lifecycle = gate.lifecycle;
        match lifecycle {
            Lifecycle::Uninitialized => {
                debug!(provider = id, "queued provider until registry opens");
                gate.deferred.push(registration);
                Ok(())
            }
            Lifecycle::Accepting => self.insert(registration),
            Lifecycle::Frozen => {
                drop(gate);
                warn!(provider = id, "rejected provider registration after freeze");
                Err(RegistrationError::Frozen(id.to_string()))
            }
        }
    }

    /// Move from `Uninitialized` to `Accepting`, applying buffered
    /// registrations in their original call order.
    ///
    /// A failing buffered registration is logged and does not stop the ones
    /// after it. Returns how many buffered registrations were applied
    /// successfully; calling `open` again is a no-op returning 0.
    pub fn open(&self) -> usize {
        let mut gate = self.inner.gate.lock();
        self.open_locked(&mut gate)
    }

    fn open_locked(&self, gate: &mut Gate) -> usize {
        if gate.lifecycle != Lifecycle::Uninitialized {
            return 0;
        }
        gate.lifecycle = Lifecycle::Accepting;

        let deferred = std::mem::take(&mut gate.deferred);
        let queued = deferred.len();
        let applied = deferred
            .into_iter()
            .map(|registration| self.insert(registration))
            .filter(Result::is_ok)
            .count();

        debug!(queued, applied, "registry opened");
        applied
    }

    /// Stop accepting registrations.
    ///
    /// Freezing an uninitialized registry opens it first so buffered
    /// registrations are not lost. Returns `true` if this call froze it.
    pub fn freeze(&self) -> bool {
        let mut gate = self.inner.gate.lock();
        if gate.lifecycle == Lifecycle::Frozen {
            return false;
        }
        self.open_locked(&mut gate);
        gate.lifecycle = Lifecycle::Frozen;
        debug!(providers = self.inner.order.read().len(), "registry frozen");
        true
    }

    /// Current lifecycle phase.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.gate.lock().lifecycle
    }

    /// Whether registrations are no longer accepted.
    pub fn is_frozen(&self) -> bool {
        self.lifecycle() == Lifecycle::Frozen
    }

    /// Provider ids in execution order.
    pub fn list_order(&self) -> Vec<String> {
        self.inner.order.read().clone()
    }

    /// Number of registered providers (buffered ones excluded).
    pub fn len(&self) -> usize {
        self.inner.order.read().len()
    }

    /// Whether no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a provider with this id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.order.read().iter().any(|known| known == id)
    }

    /// Read-only view of per-provider build statistics.
    pub fn stats(&self) -> StatsBoard {
        self.inner.stats.clone()
    }

    /// A handle that does not keep the registry alive.
    ///
    /// Providers that read their own registry hold one of these; the
    /// registry owns them, so a strong handle would never be freed.
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Exclusive access to the wrapped providers for one build.
    ///
    /// Only the snapshot builder calls this, after freezing, so registration
    /// never contends for the lock while a build runs.
    pub(crate) fn providers(&self) -> MutexGuard<'_, Vec<InstrumentedProvider>> {
        self.inner.providers.lock()
    }

    fn insert(&self, registration: Registration) -> Result<(), RegistrationError> {
        let Registration {
            id,
            order,
            provider,
        } = registration;

        let mut providers = self.inner.providers.lock();
        if providers.iter().any(|p| p.id == id) {
            warn!(provider = %id, "rejected duplicate provider registration");
            return Err(RegistrationError::Duplicate(id));
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!(provider = %id, order, seq, "registered section provider");
        providers.push(InstrumentedProvider {
            id,
            order,
            seq,
            inner: provider,
        });
        providers.sort_by_key(|p| (p.order, p.seq));

        *self.inner.order.write() = providers.iter().map(|p| p.id.clone()).collect();
        Ok(())
    }
}

impl Default for SectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionRegistry")
            .field("lifecycle", &self.lifecycle())
            .field("order", &self.list_order())
            .finish()
    }
}

/// Non-owning handle to a [`SectionRegistry`].
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    /// The registry, if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<SectionRegistry> {
        self.inner.upgrade().map(|inner| SectionRegistry { inner })
    }
}

impl std::fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// A registered provider wrapped with timing, fault isolation and change
/// detection.
pub(crate) struct InstrumentedProvider {
    pub(crate) id: String,
    order: i64,
    seq: u64,
    inner: Box<dyn SectionProvider>,
}

impl InstrumentedProvider {
    /// Run the provider once and record its stats.
    ///
    /// Always yields a section: a returned fault or a panic becomes an error
    /// section.
    pub(crate) fn invoke(&mut self, ctx: &BuildContext<'_>, stats: &StatsBoard) -> Value {
        let started = Instant::now();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.inner.build(ctx)))
            .unwrap_or_else(|payload| Err(ProviderFault::from_panic(payload)));

        let (value, last_error) = match outcome {
            Ok(value) => (value, None),
            Err(fault) => {
                warn!(provider = %self.id, error = %fault, "section provider failed");
                (error_section(fault.message()), Some(fault.message().to_string()))
            }
        };

        let elapsed = duration_ms(started.elapsed());
        let changed = !shallow_equal(&value, ctx.previous_section);

        stats.update(&self.id, |s| {
            s.record_build(elapsed);
            s.last_error = last_error;
            s.last_changed = changed;
        });

        value
    }
}

/// Shared, read-only view of provider build statistics.
///
/// Only the registry writes to it; everyone else gets copies.
#[derive(Debug, Clone, Default)]
pub struct StatsBoard {
    stats: Arc<RwLock<BTreeMap<String, ProviderStats>>>,
}

impl StatsBoard {
    /// Stats for one provider, if it has been built at least once.
    pub fn get(&self, id: &str) -> Option<ProviderStats> {
        self.stats.read().get(id).cloned()
    }

    /// Copy of all provider stats.
    pub fn all(&self) -> BTreeMap<String, ProviderStats> {
        self.stats.read().clone()
    }

    /// Number of providers with stats.
    pub fn len(&self) -> usize {
        self.stats.read().len()
    }

    /// Whether no provider has been built yet.
    pub fn is_empty(&self) -> bool {
        self.stats.read().is_empty()
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut ProviderStats)) {
        let mut stats = self.stats.write();
        f(stats.entry(id.to_string()).or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Environment;
    use serde_json::json;

    fn constant(value: Value) -> impl SectionProvider {
        move |_: &BuildContext<'_>| -> Result<Value, ProviderFault> { Ok(value.clone()) }
    }

    fn accepting() -> SectionRegistry {
        let registry = SectionRegistry::new();
        registry.open();
        registry
    }

    fn run_all(registry: &SectionRegistry) -> BTreeMap<String, Value> {
        let env = Environment::default();
        let ctx = BuildContext {
            previous_section: None,
            previous_snapshot: None,
            environment: &env,
            now_ms: 0,
        };
        let stats = registry.stats();
        let mut providers = registry.providers();
        providers
            .iter_mut()
            .map(|p| (p.id.clone(), p.invoke(&ctx, &stats)))
            .collect()
    }

    #[test]
    fn list_order_sorts_by_order_then_sequence() {
        let registry = accepting();
        registry.register("c", 20, constant(json!(1))).unwrap();
        registry.register("a", 10, constant(json!(1))).unwrap();
        registry.register("d", 20, constant(json!(1))).unwrap();
        registry.register("b", 10, constant(json!(1))).unwrap();
        registry.register_default("z", constant(json!(1))).unwrap();
        registry.register("first", -5, constant(json!(1))).unwrap();

        assert_eq!(registry.list_order(), vec!["first", "a", "b", "c", "d", "z"]);
    }

    #[test]
    fn order_is_recomputed_on_each_registration() {
        let registry = accepting();
        registry.register("late", 100, constant(json!(1))).unwrap();
        assert_eq!(registry.list_order(), vec!["late"]);

        registry.register("early", 1, constant(json!(1))).unwrap();
        assert_eq!(registry.list_order(), vec!["early", "late"]);
    }

    #[test]
    fn duplicate_id_keeps_first_provider() {
        let registry = accepting();
        registry.register("dup", 10, constant(json!("first"))).unwrap();

        let err = registry
            .register("dup", 1, constant(json!("second")))
            .unwrap_err();
        assert_eq!(err, RegistrationError::Duplicate("dup".into()));

        assert_eq!(registry.list_order(), vec!["dup"]);
        assert_eq!(run_all(&registry)["dup"], json!("first"));
    }

    #[test]
    fn empty_id_is_rejected() {
        let registry = accepting();
        assert_eq!(
            registry.register("", 1, constant(json!(1))),
            Err(RegistrationError::EmptyId)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn registration_after_freeze_is_rejected() {
        let registry = accepting();
        registry.register("a", 1, constant(json!(1))).unwrap();
        assert!(registry.freeze());
        assert!(!registry.freeze());

        let err = registry.register("b", 1, constant(json!(1))).unwrap_err();
        assert_eq!(err, RegistrationError::Frozen("b".into()));
        assert_eq!(registry.list_order(), vec!["a"]);
    }

    #[test]
    fn deferred_registrations_flush_in_call_order_on_open() {
        let registry = SectionRegistry::new();
        assert_eq!(registry.lifecycle(), Lifecycle::Uninitialized);

        registry.register("x", 5, constant(json!(1))).unwrap();
        registry.register("y", 5, constant(json!(1))).unwrap();
        assert!(registry.is_empty());

        assert_eq!(registry.open(), 2);
        assert_eq!(registry.lifecycle(), Lifecycle::Accepting);
        assert_eq!(registry.list_order(), vec!["x", "y"]);
        assert_eq!(registry.open(), 0);
    }

    #[test]
    fn failing_deferred_registration_does_not_block_later_ones() {
        let registry = SectionRegistry::new();
        registry.register("x", 1, constant(json!("kept"))).unwrap();
        registry.register("x", 1, constant(json!("dropped"))).unwrap();
        registry.register("y", 1, constant(json!(1))).unwrap();

        assert_eq!(registry.open(), 2);
        assert_eq!(registry.list_order(), vec!["x", "y"]);
        assert_eq!(run_all(&registry)["x"], json!("kept"));
    }

    #[test]
    fn freezing_uninitialized_registry_keeps_buffered_providers() {
        let registry = SectionRegistry::new();
        registry.register("queued", 1, constant(json!(1))).unwrap();

        registry.freeze();
        assert!(registry.is_frozen());
        assert!(registry.contains("queued"));
    }

    #[test]
    fn weak_handle_does_not_keep_registry_alive() {
        let registry = accepting();
        registry.register("a", 1, constant(json!(1))).unwrap();
        let weak = registry.downgrade();

        assert_eq!(weak.upgrade().unwrap().list_order(), vec!["a"]);

        drop(registry);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn invoke_records_stats_for_success() {
        let registry = accepting();
        registry.register("ok", 1, constant(json!({ "v": 1 }))).unwrap();

        let sections = run_all(&registry);
        assert_eq!(sections["ok"], json!({ "v": 1 }));

        let stats = registry.stats().get("ok").unwrap();
        assert_eq!(stats.build_count, 1);
        assert!(stats.last_error.is_none());
        assert!(stats.last_changed);
        assert!(stats.max_time_ms >= stats.last_time_ms);
    }

    #[test]
    fn returned_fault_becomes_error_section() {
        let registry = accepting();
        registry
            .register("bad", 1, |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
                Err(ProviderFault::new("routing table missing"))
            })
            .unwrap();

        let sections = run_all(&registry);
        assert_eq!(
            sections["bad"],
            json!({ "error": true, "message": "routing table missing" })
        );

        let stats = registry.stats().get("bad").unwrap();
        assert_eq!(stats.last_error.as_deref(), Some("routing table missing"));
        assert_eq!(stats.build_count, 1);
    }

    #[test]
    fn panic_is_contained_and_siblings_still_run() {
        let registry = accepting();
        registry
            .register("boom", 1, |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
                panic!("provider exploded")
            })
            .unwrap();
        registry.register("after", 2, constant(json!(7))).unwrap();

        let sections = run_all(&registry);
        assert_eq!(
            sections["boom"],
            json!({ "error": true, "message": "provider exploded" })
        );
        assert_eq!(sections["after"], json!(7));
    }

    #[test]
    fn success_clears_previous_error() {
        let registry = accepting();
        let mut fail = true;
        registry
            .register("flaky", 1, move |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
                let result = if fail { Err("once".into()) } else { Ok(json!(1)) };
                fail = false;
                result
            })
            .unwrap();

        run_all(&registry);
        assert!(registry.stats().get("flaky").unwrap().is_failing());

        run_all(&registry);
        let stats = registry.stats().get("flaky").unwrap();
        assert!(!stats.is_failing());
        assert_eq!(stats.build_count, 2);
    }

    #[test]
    fn registering_from_inside_a_build_does_not_deadlock() {
        let registry = accepting();
        let handle = registry.clone();
        registry
            .register("registrar", 1, move |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
                let result = handle.register("nested", 1, constant(json!(1)));
                Ok(json!({ "rejected": result.is_err() }))
            })
            .unwrap();
        registry.freeze();

        let sections = run_all(&registry);
        assert_eq!(sections["registrar"], json!({ "rejected": true }));
        assert!(!registry.contains("nested"));
    }
}
