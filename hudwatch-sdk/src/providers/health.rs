//! Self-observing provider: the registry's build stats as a section.

use serde::Serialize;
use serde_json::Value;

use crate::error::ProviderFault;
use crate::provider::{BuildContext, SectionProvider};
use crate::registry::{SectionRegistry, WeakRegistry};

/// Builds slower than this are reported as `slow`.
pub const DEFAULT_SLOW_THRESHOLD_MS: f64 = 50.0;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProviderHealth<'a> {
    id: &'a str,
    last_time_ms: f64,
    avg_time_ms: f64,
    max_time_ms: f64,
    total_time_ms: f64,
    build_count: u64,
    last_error: Option<&'a str>,
    last_changed: bool,
    status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthSection<'a> {
    providers: Vec<ProviderHealth<'a>>,
    failing: Vec<&'a str>,
    slowest: Option<&'a str>,
    slow_threshold_ms: f64,
}

/// Republishes per-provider stats in registry order.
///
/// Stats for a provider reflect its most recent completed build; providers
/// that run after this one in the current build show last build's numbers.
/// Providers that have never run are listed with zeroed stats.
///
/// Holds only a weak handle, so registering it in the registry it reports
/// on does not keep that registry alive.
#[derive(Debug, Clone)]
pub struct HealthProvider {
    registry: WeakRegistry,
    slow_threshold_ms: f64,
}

impl HealthProvider {
    pub fn new(registry: &SectionRegistry) -> Self {
        Self::with_threshold(registry, DEFAULT_SLOW_THRESHOLD_MS)
    }

    pub fn with_threshold(registry: &SectionRegistry, slow_threshold_ms: f64) -> Self {
        Self {
            registry: registry.downgrade(),
            slow_threshold_ms,
        }
    }
}

impl SectionProvider for HealthProvider {
    fn build(&mut self, _ctx: &BuildContext<'_>) -> Result<Value, ProviderFault> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| ProviderFault::new("registry dropped"))?;
        let order = registry.list_order();
        let stats = registry.stats().all();

        let mut providers = Vec::with_capacity(order.len());
        let mut slowest: Option<(&str, f64)> = None;

        for id in &order {
            let Some(s) = stats.get(id) else {
                providers.push(ProviderHealth {
                    id,
                    last_time_ms: 0.0,
                    avg_time_ms: 0.0,
                    max_time_ms: 0.0,
                    total_time_ms: 0.0,
                    build_count: 0,
                    last_error: None,
                    last_changed: false,
                    status: "ok",
                });
                continue;
            };

            let status = if s.is_failing() {
                "error"
            } else if s.last_time_ms > self.slow_threshold_ms {
                "slow"
            } else {
                "ok"
            };

            if s.build_count > 0 && slowest.map_or(true, |(_, ms)| s.last_time_ms > ms) {
                slowest = Some((id.as_str(), s.last_time_ms));
            }

            providers.push(ProviderHealth {
                id,
                last_time_ms: s.last_time_ms,
                avg_time_ms: s.avg_time_ms(),
                max_time_ms: s.max_time_ms,
                total_time_ms: s.total_time_ms,
                build_count: s.build_count,
                last_error: s.last_error.as_deref(),
                last_changed: s.last_changed,
                status,
            });
        }

        let failing = providers
            .iter()
            .filter(|p| p.status == "error")
            .map(|p| p.id)
            .collect();

        Ok(serde_json::to_value(HealthSection {
            providers,
            failing,
            slowest: slowest.map(|(id, _)| id),
            slow_threshold_ms: self.slow_threshold_ms,
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildRequest, SnapshotBuilder};
    use crate::provider::Environment;
    use hudwatch_types::Snapshot;
    use serde_json::json;

    fn build(builder: &mut SnapshotBuilder, previous: Option<&Snapshot>) -> Snapshot {
        let env = Environment::default();
        builder.build(BuildRequest {
            previous,
            environment: &env,
            now_ms: 0,
        })
    }

    #[test]
    fn reports_providers_in_registry_order() {
        let registry = SectionRegistry::new();
        registry
            .register("b", 2, |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
                Ok(json!(1))
            })
            .unwrap();
        registry
            .register("a", 1, |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
                Err(ProviderFault::new("offline"))
            })
            .unwrap();
        registry
            .register("health", 100, HealthProvider::new(&registry))
            .unwrap();

        let mut builder = SnapshotBuilder::new(registry);
        let snapshot = build(&mut builder, None);
        let health = snapshot.section("health").unwrap();

        let ids: Vec<&str> = health["providers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "health"]);

        assert_eq!(health["providers"][0]["status"], json!("error"));
        assert_eq!(health["providers"][0]["lastError"], json!("offline"));
        assert_eq!(health["providers"][0]["buildCount"], json!(1));
        assert_eq!(health["providers"][1]["status"], json!("ok"));
        assert_eq!(health["providers"][2]["buildCount"], json!(0));
        assert_eq!(health["failing"], json!(["a"]));
    }

    #[test]
    fn slow_providers_are_flagged() {
        let registry = SectionRegistry::new();
        registry
            .register("sleepy", 1, |_: &BuildContext<'_>| -> Result<Value, ProviderFault> {
                std::thread::sleep(std::time::Duration::from_millis(5));
                Ok(json!(null))
            })
            .unwrap();
        registry
            .register("health", 2, HealthProvider::with_threshold(&registry, 1.0))
            .unwrap();

        let mut builder = SnapshotBuilder::new(registry);
        let snapshot = build(&mut builder, None);
        let health = snapshot.section("health").unwrap();

        assert_eq!(health["providers"][0]["status"], json!("slow"));
        assert_eq!(health["slowest"], json!("sleepy"));
        assert_eq!(health["slowThresholdMs"], json!(1.0));
    }

    #[test]
    fn empty_registry_reports_nothing() {
        let registry = SectionRegistry::new();
        let mut provider = HealthProvider::new(&registry);
        let env = Environment::default();
        let ctx = BuildContext {
            previous_section: None,
            previous_snapshot: None,
            environment: &env,
            now_ms: 0,
        };

        let section = provider.build(&ctx).unwrap();
        assert_eq!(section["providers"], json!([]));
        assert_eq!(section["slowest"], Value::Null);
    }

    #[test]
    fn dropped_registry_reports_fault() {
        let registry = SectionRegistry::new();
        let mut provider = HealthProvider::new(&registry);
        drop(registry);

        let env = Environment::default();
        let ctx = BuildContext {
            previous_section: None,
            previous_snapshot: None,
            environment: &env,
            now_ms: 0,
        };
        assert_eq!(provider.build(&ctx).unwrap_err().to_string(), "registry dropped");
    }
}
