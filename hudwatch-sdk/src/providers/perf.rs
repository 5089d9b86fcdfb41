use serde_json::Value;

use crate::error::ProviderFault;
use crate::perf::PerfStore;
use crate::provider::{BuildContext, SectionProvider};

/// Publishes every perf counter as `{ key: Counter }`.
#[derive(Debug, Clone)]
pub struct PerfProvider {
    perf: PerfStore,
}

impl PerfProvider {
    pub fn new(perf: PerfStore) -> Self {
        Self { perf }
    }
}

impl SectionProvider for PerfProvider {
    fn build(&mut self, _ctx: &BuildContext<'_>) -> Result<Value, ProviderFault> {
        Ok(serde_json::to_value(self.perf.dump())?)
    }
}
