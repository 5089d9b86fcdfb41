//! Output backends for emitted snapshots.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use hudwatch_types::{Counter, ProviderStats, Snapshot};

#[cfg(feature = "prometheus")]
use crate::prometheus::{PrometheusConfig, PrometheusExporter};

/// Where the engine sends snapshots on each emission tick.
#[derive(Debug)]
pub enum Output {
    /// Write snapshots to a JSON file.
    ///
    /// The file is overwritten with each snapshot.
    File(PathBuf),

    /// Send snapshots to a TCP server.
    ///
    /// Each snapshot is sent as a newline-delimited JSON message.
    Tcp(String),

    /// Send snapshots through a channel.
    ///
    /// Use `Output::channel()` to create this variant and get the receiver.
    #[cfg(feature = "tokio")]
    Channel(tokio::sync::mpsc::Sender<Arc<Snapshot>>),

    /// Serve provider stats, perf counters and section health over HTTP in
    /// the Prometheus text format.
    ///
    /// Use `Output::prometheus()` to create this variant.
    #[cfg(feature = "prometheus")]
    Prometheus(Arc<PrometheusExporter>),
}

/// Everything one emission hands to the outputs.
#[derive(Debug, Clone)]
pub struct Emission {
    pub snapshot: Arc<Snapshot>,
    pub stats: BTreeMap<String, ProviderStats>,
    pub counters: BTreeMap<String, Counter>,
}

impl Output {
    /// Create a file output.
    ///
    /// # Example
    ///
    /// ```rust
    /// use hudwatch_sdk::Output;
    ///
    /// let output = Output::file("hud.json");
    /// ```
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Output::File(path.into())
    }

    /// Create a TCP output.
    pub fn tcp(addr: impl Into<String>) -> Self {
        Output::Tcp(addr.into())
    }

    /// Create a channel output and return both the output and receiver.
    ///
    /// Sends never block: when the receiver falls behind, snapshots are
    /// dropped.
    ///
    /// # Example
    ///
    /// ```rust
    /// use hudwatch_sdk::Output;
    ///
    /// let (output, mut rx) = Output::channel(16);
    ///
    /// // while let Some(snapshot) = rx.recv().await {
    /// //     println!("build {} has {} sections", snapshot.meta.build, snapshot.len());
    /// // }
    /// ```
    #[cfg(feature = "tokio")]
    pub fn channel(buffer: usize) -> (Self, tokio::sync::mpsc::Receiver<Arc<Snapshot>>) {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer);
        (Output::Channel(tx), rx)
    }

    /// Create a Prometheus output.
    ///
    /// The HTTP server starts with the engine's background emission.
    #[cfg(feature = "prometheus")]
    pub fn prometheus(config: PrometheusConfig) -> Self {
        Output::Prometheus(Arc::new(PrometheusExporter::new(config)))
    }

    /// Emit one snapshot to this output.
    #[cfg(feature = "tokio")]
    pub(crate) async fn emit(&self, emission: &Emission) -> std::io::Result<()> {
        match self {
            Output::File(path) => {
                let json = serde_json::to_string_pretty(emission.snapshot.as_ref())?;
                tokio::fs::write(path, json).await?;
            }
            Output::Tcp(addr) => {
                use tokio::io::AsyncWriteExt;
                use tokio::net::TcpStream;

                // Best effort: an absent listener is not an error.
                if let Ok(mut stream) = TcpStream::connect(addr).await {
                    let json = serde_json::to_string(emission.snapshot.as_ref())?;
                    stream.write_all(json.as_bytes()).await?;
                    stream.write_all(b"\n").await?;
                }
            }
            Output::Channel(tx) => {
                let _ = tx.try_send(emission.snapshot.clone());
            }
            #[cfg(feature = "prometheus")]
            Output::Prometheus(exporter) => {
                exporter.record(emission);
            }
        }
        Ok(())
    }
}
