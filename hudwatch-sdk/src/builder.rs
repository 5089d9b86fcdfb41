//! Snapshot builder: walks the frozen registry and assembles a snapshot.

use std::time::Instant;

use hudwatch_types::{SchemaVersion, Snapshot, SnapshotMeta};
use tracing::trace;

use crate::format::{duration_ms, iso_time};
use crate::provider::{BuildContext, Environment};
use crate::registry::SectionRegistry;

/// Inputs for one snapshot build.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    /// The snapshot from the previous build, `None` for the first one.
    pub previous: Option<&'a Snapshot>,
    pub environment: &'a Environment,
    /// Build time in milliseconds since the Unix epoch.
    ///
    /// Supplied by the caller so tests can build deterministic snapshots.
    pub now_ms: u64,
}

/// Produces snapshots from a [`SectionRegistry`].
///
/// The first build freezes the registry. Every build invokes each provider
/// exactly once, in registry order, handing it the previous snapshot only.
/// Provider failures turn into error sections; `build` itself cannot fail.
///
/// Use one builder per registry.
///
/// # Example
///
/// ```rust
/// use hudwatch_sdk::{
///     BuildContext, BuildRequest, Environment, ProviderFault, SectionRegistry, SnapshotBuilder,
/// };
/// use serde_json::{json, Value};
///
/// let registry = SectionRegistry::new();
/// registry
///     .register("uptime", 10, |ctx: &BuildContext<'_>| -> Result<Value, ProviderFault> {
///         Ok(json!({ "at": ctx.now_ms }))
///     })
///     .unwrap();
///
/// let mut builder = SnapshotBuilder::new(registry.clone());
/// let env = Environment::default();
/// let snapshot = builder.build(BuildRequest { previous: None, environment: &env, now_ms: 42 });
///
/// assert!(registry.is_frozen());
/// assert_eq!(snapshot.section("uptime"), Some(&json!({ "at": 42 })));
/// ```
#[derive(Debug)]
pub struct SnapshotBuilder {
    registry: SectionRegistry,
    builds: u64,
}

impl SnapshotBuilder {
    /// Create a builder over `registry`.
    pub fn new(registry: SectionRegistry) -> Self {
        Self {
            registry,
            builds: 0,
        }
    }

    /// The registry this builder walks.
    pub fn registry(&self) -> &SectionRegistry {
        &self.registry
    }

    /// Number of snapshots built so far.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Build a new snapshot.
    pub fn build(&mut self, request: BuildRequest<'_>) -> Snapshot {
        let started = Instant::now();
        self.registry.freeze();
        self.builds += 1;

        let env = request.environment;
        let mut snapshot = Snapshot::new(SnapshotMeta {
            schema_version: SchemaVersion::current(),
            timestamp_ms: request.now_ms,
            iso_time: iso_time(request.now_ms),
            build: self.builds,
            provider_order: Vec::new(),
            capabilities: Vec::new(),
            paused: env.paused,
            interval_ms: env.interval.as_millis() as u64,
            version: env.version.clone(),
        });

        let stats = self.registry.stats();
        let mut providers = self.registry.providers();
        for provider in providers.iter_mut() {
            let ctx = BuildContext {
                previous_section: request.previous.and_then(|s| s.section(&provider.id)),
                previous_snapshot: request.previous,
                environment: env,
                now_ms: request.now_ms,
            };
            let value = provider.invoke(&ctx, &stats);

            snapshot.meta.provider_order.push(provider.id.clone());
            snapshot.insert(provider.id.clone(), value);
        }
        drop(providers);

        trace!(
            build = self.builds,
            sections = snapshot.len(),
            elapsed_ms = duration_ms(started.elapsed()),
            "snapshot built"
        );
        snapshot
    }
}
