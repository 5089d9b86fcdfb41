//! Snapshot - a point-in-time view of every diagnostics section.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{section_error, SchemaVersion, SectionId};

/// Metadata describing how and when a snapshot was built.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    /// Schema version for forward compatibility.
    pub schema_version: SchemaVersion,

    /// Unix timestamp in milliseconds supplied by the caller of the build.
    pub timestamp_ms: u64,

    /// `timestamp_ms` rendered as RFC 3339.
    pub iso_time: String,

    /// Build sequence number, starting at 1 for the first snapshot.
    pub build: u64,

    /// Provider ids in execution order.
    pub provider_order: Vec<SectionId>,

    /// Section ids actually present in this snapshot, in execution order.
    ///
    /// Consumers use this for capability discovery.
    pub capabilities: Vec<SectionId>,

    /// Whether cadence builds were paused when this snapshot was taken.
    pub paused: bool,

    /// Configured cadence between builds.
    pub interval_ms: u64,

    /// Host application version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// A point-in-time snapshot of all diagnostics sections.
///
/// Snapshots are immutable once built; every build produces a new one, and
/// the engine hands them out behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use hudwatch_types::{error_section, Snapshot, SnapshotMeta};
/// use serde_json::json;
///
/// let mut snapshot = Snapshot::new(SnapshotMeta::default());
/// snapshot.insert("routes", json!({ "count": 12 }));
/// snapshot.insert("rules", error_section("rules engine not loaded"));
///
/// assert_eq!(snapshot.meta.capabilities, vec!["routes", "rules"]);
/// assert_eq!(snapshot.failed_sections().count(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub sections: BTreeMap<SectionId, Value>,
}

impl Snapshot {
    /// Create an empty snapshot with the given metadata.
    pub fn new(meta: SnapshotMeta) -> Self {
        Self {
            meta,
            sections: BTreeMap::new(),
        }
    }

    /// Add a section, recording it in `meta.capabilities`.
    ///
    /// Re-inserting an id replaces the value but keeps its original position.
    pub fn insert(&mut self, id: impl Into<SectionId>, value: Value) {
        let id = id.into();
        if !self.meta.capabilities.contains(&id) {
            self.meta.capabilities.push(id.clone());
        }
        self.sections.insert(id, value);
    }

    /// Check if the snapshot has no sections.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Number of sections in the snapshot.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Get a section by id.
    pub fn section(&self, id: &str) -> Option<&Value> {
        self.sections.get(id)
    }

    /// Whether a section was produced.
    pub fn has_section(&self, id: &str) -> bool {
        self.sections.contains_key(id)
    }

    /// Iterate over sections in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.meta
            .capabilities
            .iter()
            .filter_map(|id| self.sections.get(id).map(|v| (id.as_str(), v)))
    }

    /// Sections that hold the error shape, with their messages.
    pub fn failed_sections(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .filter_map(|(id, value)| section_error(value).map(|msg| (id, msg)))
    }
}
