//! Prometheus exposition format support.
//!
//! Exposes the engine's view of itself: per-provider build stats, perf
//! counters and which sections are currently failing. Section payloads are
//! not exported; they have no fixed schema.
//!
//! ## Example
//!
//! ```rust,no_run
//! use hudwatch_sdk::{DiagnosticsEngine, Output};
//! use hudwatch_sdk::prometheus::PrometheusConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = PrometheusConfig::builder()
//!         .listen_addr("0.0.0.0:9090")
//!         .metrics_path("/metrics")
//!         .build();
//!
//!     let engine = DiagnosticsEngine::builder()
//!         .output(Output::prometheus(config))
//!         .build();
//!
//!     let _emission = engine.start();
//!
//!     // Metrics available at http://localhost:9090/metrics
//! }
//! ```

use std::convert::Infallible;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hudwatch_types::is_error_section;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::output::Emission;

/// Configuration for the Prometheus metrics endpoint.
#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    /// Address to listen on (e.g., "0.0.0.0:9090")
    pub listen_addr: String,
    /// Path for metrics endpoint (e.g., "/metrics")
    pub metrics_path: String,
    /// Optional namespace prefix for all metrics
    pub namespace: Option<String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090".to_string(),
            metrics_path: "/metrics".to_string(),
            namespace: None,
        }
    }
}

impl PrometheusConfig {
    pub fn builder() -> PrometheusConfigBuilder {
        PrometheusConfigBuilder::default()
    }
}

/// Builder for [`PrometheusConfig`].
#[derive(Debug, Default)]
pub struct PrometheusConfigBuilder {
    listen_addr: Option<String>,
    metrics_path: Option<String>,
    namespace: Option<String>,
}

impl PrometheusConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = Some(path.into());
        self
    }

    /// Set the namespace prefix for all metrics.
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn build(self) -> PrometheusConfig {
        let defaults = PrometheusConfig::default();
        PrometheusConfig {
            listen_addr: self.listen_addr.unwrap_or(defaults.listen_addr),
            metrics_path: self.metrics_path.unwrap_or(defaults.metrics_path),
            namespace: self.namespace,
        }
    }
}

type Latest = Arc<RwLock<Option<Emission>>>;

/// Serves the latest emission over HTTP.
#[derive(Debug)]
pub struct PrometheusExporter {
    config: PrometheusConfig,
    latest: Latest,
}

impl PrometheusExporter {
    pub fn new(config: PrometheusConfig) -> Self {
        Self {
            config,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &PrometheusConfig {
        &self.config
    }

    /// Replace the emission served to scrapers.
    pub fn record(&self, emission: &Emission) {
        *self.latest.write() = Some(emission.clone());
    }

    /// The current metrics in exposition format, empty before the first
    /// emission.
    pub fn render(&self) -> String {
        match self.latest.read().as_ref() {
            Some(e) => format_prometheus(e, self.config.namespace.as_deref()),
            None => String::new(),
        }
    }

    /// Start the HTTP server in a background task.
    ///
    /// Serves metrics at the configured path and `OK` at `/health` and
    /// `/healthz`. Runs until the runtime shuts down or the returned handle
    /// is aborted.
    pub fn start_server(&self) -> tokio::task::JoinHandle<()> {
        let listen_addr = self.config.listen_addr.clone();
        let metrics_path = self.config.metrics_path.clone();
        let namespace = self.config.namespace.clone();
        let latest = self.latest.clone();

        tokio::spawn(async move {
            if let Err(e) = run_server(&listen_addr, metrics_path, namespace, latest).await {
                warn!(addr = %listen_addr, error = %e, "prometheus server stopped");
            }
        })
    }
}

async fn run_server(
    listen_addr: &str,
    metrics_path: String,
    namespace: Option<String>,
    latest: Latest,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = listen_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    debug!(%addr, path = %metrics_path, "prometheus server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let metrics_path = metrics_path.clone();
        let namespace = namespace.clone();
        let latest = latest.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let body = respond(req.uri().path(), &metrics_path, namespace.as_deref(), &latest);
                async move { Ok::<_, Infallible>(body) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %e, "prometheus connection error");
            }
        });
    }
}

fn respond(
    path: &str,
    metrics_path: &str,
    namespace: Option<&str>,
    latest: &Latest,
) -> Response<Full<Bytes>> {
    let (status, content_type, body) = if path == metrics_path {
        let body = match latest.read().as_ref() {
            Some(e) => format_prometheus(e, namespace),
            None => String::new(),
        };
        (StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
    } else if path == "/health" || path == "/healthz" {
        (StatusCode::OK, "text/plain", "OK".to_string())
    } else {
        (StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string())
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}

fn family(out: &mut String, prefix: &str, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {prefix}{name} {help}");
    let _ = writeln!(out, "# TYPE {prefix}{name} {kind}");
}

/// Format an emission in Prometheus exposition format.
pub fn format_prometheus(emission: &Emission, namespace: Option<&str>) -> String {
    let mut out = String::new();
    let prefix = namespace.map(|n| format!("{}_", n)).unwrap_or_default();
    let p = prefix.as_str();

    family(
        &mut out,
        p,
        "hudwatch_provider_builds_total",
        "counter",
        "Number of builds of a section provider",
    );
    for (id, s) in &emission.stats {
        let _ = writeln!(
            out,
            "{p}hudwatch_provider_builds_total{{provider=\"{}\"}} {}",
            escape_label_value(id),
            s.build_count
        );
    }

    family(
        &mut out,
        p,
        "hudwatch_provider_last_build_seconds",
        "gauge",
        "Duration of the latest build of a section provider",
    );
    for (id, s) in &emission.stats {
        let _ = writeln!(
            out,
            "{p}hudwatch_provider_last_build_seconds{{provider=\"{}\"}} {:.6}",
            escape_label_value(id),
            s.last_time_ms / 1000.0
        );
    }

    family(
        &mut out,
        p,
        "hudwatch_provider_max_build_seconds",
        "gauge",
        "Longest build of a section provider",
    );
    for (id, s) in &emission.stats {
        let _ = writeln!(
            out,
            "{p}hudwatch_provider_max_build_seconds{{provider=\"{}\"}} {:.6}",
            escape_label_value(id),
            s.max_time_ms / 1000.0
        );
    }

    family(
        &mut out,
        p,
        "hudwatch_provider_failing",
        "gauge",
        "1 if the latest build of a section provider failed",
    );
    for (id, s) in &emission.stats {
        let _ = writeln!(
            out,
            "{p}hudwatch_provider_failing{{provider=\"{}\"}} {}",
            escape_label_value(id),
            u8::from(s.is_failing())
        );
    }

    family(
        &mut out,
        p,
        "hudwatch_section_error",
        "gauge",
        "1 if a section in the latest snapshot is an error section",
    );
    for (id, value) in emission.snapshot.iter() {
        let _ = writeln!(
            out,
            "{p}hudwatch_section_error{{section=\"{}\"}} {}",
            escape_label_value(id),
            u8::from(is_error_section(value))
        );
    }

    family(
        &mut out,
        p,
        "hudwatch_perf_count",
        "counter",
        "Number of samples of a perf counter",
    );
    for (key, c) in &emission.counters {
        let _ = writeln!(
            out,
            "{p}hudwatch_perf_count{{key=\"{}\"}} {}",
            escape_label_value(key),
            c.count
        );
    }

    family(
        &mut out,
        p,
        "hudwatch_perf_avg_seconds",
        "gauge",
        "Mean duration of a perf counter",
    );
    for (key, c) in &emission.counters {
        let _ = writeln!(
            out,
            "{p}hudwatch_perf_avg_seconds{{key=\"{}\"}} {:.6}",
            escape_label_value(key),
            c.avg_ms / 1000.0
        );
    }

    family(
        &mut out,
        p,
        "hudwatch_snapshot_build",
        "counter",
        "Sequence number of the latest snapshot",
    );
    let _ = writeln!(
        out,
        "{p}hudwatch_snapshot_build {}",
        emission.snapshot.meta.build
    );

    family(
        &mut out,
        p,
        "hudwatch_snapshot_timestamp_seconds",
        "gauge",
        "Unix timestamp of the latest snapshot",
    );
    let _ = writeln!(
        out,
        "{p}hudwatch_snapshot_timestamp_seconds {:.3}",
        emission.snapshot.meta.timestamp_ms as f64 / 1000.0
    );

    out
}

/// Escape a label value for Prometheus format.
/// Backslash, double-quote, and newline must be escaped.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hudwatch_types::{error_section, Counter, ProviderStats, Snapshot, SnapshotMeta};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn create_test_emission() -> Emission {
        let mut snapshot = Snapshot::new(SnapshotMeta {
            timestamp_ms: 1_703_160_000_000,
            build: 7,
            ..Default::default()
        });
        snapshot.insert("channels", json!({ "kitchen": 1 }));
        snapshot.insert("routes", error_section("no route table"));

        let mut stats = BTreeMap::new();
        stats.insert(
            "channels".to_string(),
            ProviderStats {
                last_time_ms: 2.5,
                total_time_ms: 10.0,
                build_count: 4,
                max_time_ms: 4.0,
                last_error: None,
                last_changed: true,
            },
        );
        stats.insert(
            "routes".to_string(),
            ProviderStats {
                build_count: 4,
                last_error: Some("no route table".into()),
                ..Default::default()
            },
        );

        let mut counters = BTreeMap::new();
        let mut build = Counter::default();
        build.record(3.0);
        counters.insert("snapshot.build".to_string(), build);

        Emission {
            snapshot: Arc::new(snapshot),
            stats,
            counters,
        }
    }

    #[test]
    fn formats_provider_stats() {
        let output = format_prometheus(&create_test_emission(), None);

        assert!(output.contains("hudwatch_provider_builds_total{provider=\"channels\"} 4"));
        assert!(output
            .contains("hudwatch_provider_last_build_seconds{provider=\"channels\"} 0.002500"));
        assert!(output
            .contains("hudwatch_provider_max_build_seconds{provider=\"channels\"} 0.004000"));
        assert!(output.contains("hudwatch_provider_failing{provider=\"channels\"} 0"));
        assert!(output.contains("hudwatch_provider_failing{provider=\"routes\"} 1"));
    }

    #[test]
    fn formats_section_errors_and_perf() {
        let output = format_prometheus(&create_test_emission(), None);

        assert!(output.contains("hudwatch_section_error{section=\"channels\"} 0"));
        assert!(output.contains("hudwatch_section_error{section=\"routes\"} 1"));
        assert!(output.contains("hudwatch_perf_count{key=\"snapshot.build\"} 1"));
        assert!(output.contains("hudwatch_perf_avg_seconds{key=\"snapshot.build\"} 0.003000"));
        assert!(output.contains("hudwatch_snapshot_build 7"));
        assert!(output.contains("hudwatch_snapshot_timestamp_seconds 1703160000.000"));
    }

    #[test]
    fn namespace_prefixes_every_family() {
        let output = format_prometheus(&create_test_emission(), Some("myapp"));

        assert!(output.contains("# HELP myapp_hudwatch_provider_builds_total"));
        assert!(output.contains("# TYPE myapp_hudwatch_provider_builds_total counter"));
        assert!(output.contains("myapp_hudwatch_perf_count{key=\"snapshot.build\"} 1"));
        assert!(!output.contains("\nhudwatch_"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_prometheus_config_builder() {
        let config = PrometheusConfig::builder()
            .listen_addr("127.0.0.1:8080")
            .metrics_path("/custom-metrics")
            .namespace("myapp")
            .build();

        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.metrics_path, "/custom-metrics");
        assert_eq!(config.namespace, Some("myapp".to_string()));
    }

    #[test]
    fn exporter_renders_latest_emission() {
        let exporter = PrometheusExporter::new(PrometheusConfig::default());
        assert_eq!(exporter.render(), "");

        exporter.record(&create_test_emission());
        assert!(exporter.render().contains("hudwatch_snapshot_build 7"));
    }

    #[test]
    fn unknown_paths_are_not_found() {
        let latest: Latest = Arc::new(RwLock::new(None));

        assert_eq!(respond("/metrics", "/metrics", None, &latest).status(), StatusCode::OK);
        assert_eq!(respond("/healthz", "/metrics", None, &latest).status(), StatusCode::OK);
        assert_eq!(respond("/nope", "/metrics", None, &latest).status(), StatusCode::NOT_FOUND);
    }
}
