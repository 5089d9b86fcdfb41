//! File-backed `channels` section.
//!
//! Reads a JSON object mapping channel names to their current value.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use hudwatch_sdk::{BuildContext, ProviderFault, SectionProvider};
use serde_json::{Map, Value};
use tracing::debug;

/// Filter key selecting a single channel.
pub const CHANNEL_FILTER: &str = "channel";

/// A provider that publishes the contents of a channel file.
///
/// The file is only re-read when its modification time moves forward, so
/// steady-state builds cost a `stat`. Read and parse failures surface as
/// provider faults and leave the cached contents in place for the next
/// successful build.
///
/// When the `channel` filter is set, only that channel is published.
#[derive(Debug)]
pub struct ChannelFileProvider {
    path: PathBuf,
    description: String,
    last_modified: Option<SystemTime>,
    cached: Option<Map<String, Value>>,
    reads: u64,
}

impl ChannelFileProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let description = format!("file: {}", path.display());
        Self {
            path,
            description,
            last_modified: None,
            cached: None,
            reads: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Number of times the file was actually read and parsed.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    fn modified_time(&self) -> Result<SystemTime, ProviderFault> {
        fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .map_err(|e| ProviderFault::new(format!("read error: {}", e)))
    }

    fn read_file(&mut self) -> Result<Map<String, Value>, ProviderFault> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| ProviderFault::new(format!("read error: {}", e)))?;
        self.reads += 1;
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ProviderFault::new(
                "parse error: expected an object of channel values",
            )),
            Err(e) => Err(ProviderFault::new(format!("parse error: {}", e))),
        }
    }

    fn refresh_cache(&mut self) -> Result<&Map<String, Value>, ProviderFault> {
        let current = self.modified_time()?;
        let changed = match (&self.cached, self.last_modified) {
            (None, _) | (_, None) => true,
            (Some(_), Some(last)) => current > last,
        };

        if changed {
            let map = self.read_file()?;
            debug!(path = %self.path.display(), channels = map.len(), "channel file reloaded");
            self.last_modified = Some(current);
            self.cached = Some(map);
        }

        self.cached
            .as_ref()
            .ok_or_else(|| ProviderFault::new("channel file not loaded"))
    }
}

impl SectionProvider for ChannelFileProvider {
    fn build(&mut self, ctx: &BuildContext<'_>) -> Result<Value, ProviderFault> {
        let filter = ctx.environment.filter(CHANNEL_FILTER).map(str::to_owned);
        let channels = self.refresh_cache()?;

        let section = match filter {
            Some(name) => channels
                .iter()
                .filter(|(channel, _)| **channel == name)
                .map(|(channel, value)| (channel.clone(), value.clone()))
                .collect(),
            None => channels.clone(),
        };
        Ok(Value::Object(section))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hudwatch_sdk::Environment;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_json() -> &'static str {
        r#"{ "kitchen": 4, "hall": 2, "attic": 0 }"#
    }

    fn build(
        provider: &mut ChannelFileProvider,
        env: &Environment,
    ) -> Result<Value, ProviderFault> {
        let ctx = BuildContext {
            previous_section: None,
            previous_snapshot: None,
            environment: env,
            now_ms: 0,
        };
        provider.build(&ctx)
    }

    #[test]
    fn test_new_describes_path() {
        let provider = ChannelFileProvider::new("/tmp/channels.json");
        assert_eq!(provider.path(), Path::new("/tmp/channels.json"));
        assert_eq!(provider.description(), "file: /tmp/channels.json");
        assert_eq!(provider.reads(), 0);
    }

    #[test]
    fn test_publishes_file_contents() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", sample_json()).unwrap();

        let mut provider = ChannelFileProvider::new(file.path());
        let section = build(&mut provider, &Environment::default()).unwrap();
        assert_eq!(section, json!({ "kitchen": 4, "hall": 2, "attic": 0 }));
    }

    #[test]
    fn test_unchanged_file_is_not_reread() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", sample_json()).unwrap();

        let mut provider = ChannelFileProvider::new(file.path());
        let env = Environment::default();
        let first = build(&mut provider, &env).unwrap();
        let second = build(&mut provider, &env).unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.reads(), 1);
    }

    #[test]
    fn test_channel_filter_narrows_section() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", sample_json()).unwrap();

        let mut provider = ChannelFileProvider::new(file.path());
        let mut env = Environment::default();
        env.filters.insert(CHANNEL_FILTER.into(), "hall".into());
        assert_eq!(build(&mut provider, &env).unwrap(), json!({ "hall": 2 }));

        env.filters.insert(CHANNEL_FILTER.into(), "cellar".into());
        assert_eq!(build(&mut provider, &env).unwrap(), json!({}));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let mut provider = ChannelFileProvider::new("/nonexistent/path/channels.json");

        let fault = build(&mut provider, &Environment::default()).unwrap_err();
        assert!(fault.message().starts_with("read error"));
    }

    #[test]
    fn test_invalid_json_is_a_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid json").unwrap();

        let mut provider = ChannelFileProvider::new(file.path());
        let fault = build(&mut provider, &Environment::default()).unwrap_err();
        assert!(fault.message().starts_with("parse error"));
    }

    #[test]
    fn test_non_object_is_a_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[1, 2, 3]").unwrap();

        let mut provider = ChannelFileProvider::new(file.path());
        let fault = build(&mut provider, &Environment::default()).unwrap_err();
        assert_eq!(
            fault.message(),
            "parse error: expected an object of channel values"
        );
    }
}
