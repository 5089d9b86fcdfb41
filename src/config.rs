//! Layered settings: defaults, an optional config file, then `HUDWATCH_*`
//! environment variables.
//!
//! Nested keys use a double underscore in the environment, for example
//! `HUDWATCH_TREND__TOP_N=3`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use hudwatch_sdk::{DEFAULT_SLOW_THRESHOLD_MS, DEFAULT_TOP_N, DEFAULT_TREND_CAPACITY};
use serde::Deserialize;
use thiserror::Error;

use crate::data::duration;

/// Environment variable prefix for settings.
pub const ENV_PREFIX: &str = "HUDWATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Host version reported in every snapshot.
    pub version: String,
    #[serde(deserialize_with = "duration::deserialize")]
    pub interval: Duration,
    pub paused: bool,
    #[serde(deserialize_with = "duration::deserialize")]
    pub frame_interval: Duration,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// JSON file with current value per channel.
    pub channels_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub trend: TrendSettings,
    pub health: HealthSettings,
    pub prometheus: Option<PrometheusSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            interval: Duration::from_secs(1),
            paused: false,
            frame_interval: Duration::from_millis(16),
            log_level: "info".to_string(),
            channels_file: None,
            output_file: None,
            trend: TrendSettings::default(),
            health: HealthSettings::default(),
            prometheus: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrendSettings {
    pub top_n: usize,
    pub capacity: usize,
    /// Section the trend is computed over.
    pub source: String,
    /// JSON pointer into the source section.
    pub pointer: Option<String>,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            capacity: DEFAULT_TREND_CAPACITY,
            source: crate::host::CHANNELS_SECTION.to_string(),
            pointer: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub slow_threshold_ms: f64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            slow_threshold_ms: DEFAULT_SLOW_THRESHOLD_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PrometheusSettings {
    pub listen_addr: String,
    pub metrics_path: String,
}

impl Default for PrometheusSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9090".to_string(),
            metrics_path: "/metrics".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), reading environment variables from `env`
    /// instead of the process when given.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "interval",
                reason: "must be greater than zero".into(),
            });
        }
        if self.trend.top_n == 0 {
            return Err(ConfigError::Invalid {
                key: "trend.top_n",
                reason: "must be at least 1".into(),
            });
        }
        if self.health.slow_threshold_ms < 0.0 {
            return Err(ConfigError::Invalid {
                key: "health.slow_threshold_ms",
                reason: "must not be negative".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn empty_env() -> Option<config::Map<String, String>> {
        Some(config::Map::new())
    }

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn defaults_without_sources() {
        let settings = Settings::load_with_env(None, empty_env()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.trend.source, "channels");
    }

    #[test]
    fn file_values_override_defaults() {
        let file = toml_file(
            r#"
            interval = "250ms"
            paused = true
            channels_file = "channels.json"

            [trend]
            top_n = 3
            pointer = "/occupancy"

            [prometheus]
            listen_addr = "127.0.0.1:9191"
            "#,
        );

        let settings = Settings::load_with_env(Some(file.path()), empty_env()).unwrap();
        assert_eq!(settings.interval, Duration::from_millis(250));
        assert!(settings.paused);
        assert_eq!(settings.channels_file, Some(PathBuf::from("channels.json")));
        assert_eq!(settings.trend.top_n, 3);
        assert_eq!(settings.trend.capacity, DEFAULT_TREND_CAPACITY);
        assert_eq!(settings.trend.pointer.as_deref(), Some("/occupancy"));

        let prometheus = settings.prometheus.unwrap();
        assert_eq!(prometheus.listen_addr, "127.0.0.1:9191");
        assert_eq!(prometheus.metrics_path, "/metrics");
    }

    #[test]
    fn environment_overrides_file() {
        let file = toml_file("interval = \"2s\"\n");
        let mut env = config::Map::new();
        env.insert("HUDWATCH_INTERVAL".to_string(), "5s".to_string());
        env.insert("HUDWATCH_TREND__CAPACITY".to_string(), "10".to_string());

        let settings = Settings::load_with_env(Some(file.path()), Some(env)).unwrap();
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.trend.capacity, 10);
    }

    #[test]
    fn bad_duration_is_rejected() {
        let file = toml_file("interval = \"often\"\n");
        let err = Settings::load_with_env(Some(file.path()), empty_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn zero_interval_is_invalid() {
        let file = toml_file("interval = \"0s\"\n");
        let err = Settings::load_with_env(Some(file.path()), empty_env()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "interval", .. }));
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = Path::new("/nonexistent/hudwatch.toml");
        let err = Settings::load_with_env(Some(missing), empty_env());
        assert!(err.is_err());
    }
}
