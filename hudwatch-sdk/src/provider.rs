//! The section provider capability and the context handed to each build.

use std::collections::BTreeMap;
use std::time::Duration;

use hudwatch_types::Snapshot;
use serde_json::Value;

use crate::error::ProviderFault;

/// Read-only description of the host, passed to every provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    /// Host application version.
    pub version: String,
    /// Cadence between snapshot builds.
    pub interval: Duration,
    /// Whether cadence builds are paused.
    pub paused: bool,
    /// Consumer-set filters (for example a routing channel filter).
    ///
    /// The engine never interprets these; providers decide what they mean.
    pub filters: BTreeMap<String, String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            version: String::new(),
            interval: Duration::from_secs(1),
            paused: false,
            filters: BTreeMap::new(),
        }
    }
}

impl Environment {
    /// Look up a filter value.
    pub fn filter(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }
}

/// Everything a provider may look at while building its section.
///
/// Providers only ever see the *previous* snapshot. Results from siblings in
/// the build that is currently running are not visible, which keeps the
/// outcome independent of provider order.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    /// This provider's section from the previous snapshot.
    pub previous_section: Option<&'a Value>,
    /// The whole previous snapshot, if there was one.
    pub previous_snapshot: Option<&'a Snapshot>,
    pub environment: &'a Environment,
    /// Caller-supplied build time in milliseconds since the Unix epoch.
    pub now_ms: u64,
}

impl<'a> BuildContext<'a> {
    /// A section from the previous snapshot, by id.
    pub fn previous(&self, id: &str) -> Option<&'a Value> {
        self.previous_snapshot.and_then(|s| s.section(id))
    }
}

/// Anything that can produce one snapshot section per build.
///
/// Implemented for closures, so simple providers need no type of their own:
///
/// ```rust
/// use hudwatch_sdk::{BuildContext, ProviderFault, SectionProvider};
/// use serde_json::{json, Value};
///
/// fn takes_provider(_p: impl SectionProvider) {}
///
/// takes_provider(|ctx: &BuildContext<'_>| -> Result<Value, ProviderFault> {
///     Ok(json!({ "builtAt": ctx.now_ms }))
/// });
/// ```
pub trait SectionProvider: Send {
    /// Produce this build's section value.
    fn build(&mut self, ctx: &BuildContext<'_>) -> Result<Value, ProviderFault>;
}

impl<F> SectionProvider for F
where
    F: FnMut(&BuildContext<'_>) -> Result<Value, ProviderFault> + Send,
{
    fn build(&mut self, ctx: &BuildContext<'_>) -> Result<Value, ProviderFault> {
        self(ctx)
    }
}
