//! Engine configuration
//!
//! One file, any of `.toml`, `.json`, `.yaml`/`.yml`, every section optional:
//!
//! ```toml
//! [analyzer]
//! strategy = "timestamp_checksum"
//!
//! [runner]
//! timeout_ms = 30000
//! max_retries = 3
//!
//! [destination]
//! min_free_bytes = 10485760
//!
//! [[hooks]]
//! event = "afterSync"
//! command = "git"
//! args = ["status", "--short"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use lerian_fs::{ConfigStore, FsOptions};

use crate::Result;
use crate::safety::{DestinationConfig, RunnerConfig, SourceConfig};
use crate::sync::{AnalyzerConfig, ApplyOptions, HookConfig};

/// Git subprocess settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub command_timeout_ms: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 10_000,
        }
    }
}

impl GitConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fs: FsOptions,
    pub analyzer: AnalyzerConfig,
    pub runner: RunnerConfig,
    pub destination: DestinationConfig,
    pub source: SourceConfig,
    pub git: GitConfig,
    pub apply: ApplyOptions,
    pub hooks: Vec<HookConfig>,
}

impl EngineConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(ConfigStore::new().load_or_default(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        Ok(ConfigStore::new().save(path, self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{ComparisonStrategy, HookType};
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&temp.path().join("lerian-sync.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.runner.timeout_ms, 30_000);
        assert_eq!(config.runner.max_retries, 3);
        assert_eq!(config.runner.cache_ttl_secs, 120);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("lerian-sync.toml");
        std::fs::write(
            &path,
            r#"
[analyzer]
strategy = "checksum"

[runner]
max_retries = 5

[[hooks]]
event = "onComplete"
command = "echo"
args = ["${SYNC_SESSION}"]
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();

        assert_eq!(config.analyzer.strategy, ComparisonStrategy::Checksum);
        assert_eq!(config.runner.max_retries, 5);
        assert_eq!(config.runner.timeout_ms, 30_000);
        assert_eq!(config.hooks.len(), 1);
        assert_eq!(config.hooks[0].event, HookType::OnComplete);
        assert_eq!(config.destination, DestinationConfig::default());
    }

    #[test]
    fn yaml_and_json_are_accepted() {
        let temp = tempfile::tempdir().unwrap();
        let yaml = temp.path().join("sync.yml");
        std::fs::write(&yaml, "apply:\n  dry_run: true\ngit:\n  command_timeout_ms: 250\n").unwrap();
        let json = temp.path().join("sync.json");
        std::fs::write(&json, r#"{"source": {"package_name": "acme-templates"}}"#).unwrap();

        let from_yaml = EngineConfig::load(&yaml).unwrap();
        assert!(from_yaml.apply.dry_run);
        assert_eq!(from_yaml.git.command_timeout(), Duration::from_millis(250));

        let from_json = EngineConfig::load(&json).unwrap();
        assert_eq!(from_json.source.package_name, "acme-templates");
        assert_eq!(from_json.source.required_entries, vec!["templates".to_string()]);
    }

    #[test]
    fn save_then_load_preserves_changes() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("sync.toml");
        let mut config = EngineConfig::default();
        config.runner.parallel = false;
        config.analyzer.checksum_cache = false;

        config.save(&path).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("sync.toml");
        std::fs::write(&path, "[runner\nmax_retries = ").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
