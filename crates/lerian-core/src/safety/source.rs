//! Locating the installed template source tree
//!
//! Candidates are tried in a fixed order and validated against a
//! fingerprint: a descriptor file (`package.json`) whose identity field
//! names the expected package, plus required entries. The first valid
//! candidate is cached in memory and persisted to a small metadata file so
//! later runs start there.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lerian_fs::io::{RobustnessConfig, write_atomic};

use super::checker::SafetyChecker;
use super::result::CheckResult;
use crate::cache::TtlCache;
use crate::{Error, Result};

pub const SOURCE_CHECKER_ID: &str = "source";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub package_name: String,
    /// Descriptor file inside a candidate
    pub descriptor: String,
    /// Field of the descriptor that must equal `package_name`
    pub identity_field: String,
    pub required_entries: Vec<String>,
    /// Checked before every other location
    pub explicit_path: Option<PathBuf>,
    /// Where the last detection is persisted; defaults under the user cache dir
    pub metadata_file: Option<PathBuf>,
    pub install_locations: Vec<PathBuf>,
    /// Include the built-in per-user and system install locations
    pub default_locations: bool,
    /// Ask the package manager for its global root
    pub query_package_manager: bool,
    pub package_manager_timeout_ms: u64,
    pub max_ancestor_depth: usize,
    pub cache_ttl_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            package_name: "lerian-templates".to_string(),
            descriptor: "package.json".to_string(),
            identity_field: "name".to_string(),
            required_entries: vec!["templates".to_string()],
            explicit_path: None,
            metadata_file: None,
            install_locations: Vec::new(),
            default_locations: true,
            query_package_manager: true,
            package_manager_timeout_ms: 5_000,
            max_ancestor_depth: 8,
            cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    Configured,
    Cached,
    Ancestor,
    WellKnown,
    PackageManager,
    ModuleResolution,
    Manual,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Configured => "configured",
            Self::Cached => "cached",
            Self::Ancestor => "ancestor",
            Self::WellKnown => "well-known",
            Self::PackageManager => "package-manager",
            Self::ModuleResolution => "module-resolution",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedSource {
    pub path: PathBuf,
    pub method: DetectionMethod,
    /// Raw version string from the descriptor
    pub version: Option<String>,
}

impl DetectedSource {
    pub fn semver(&self) -> Option<semver::Version> {
        self.version
            .as_deref()
            .and_then(|v| semver::Version::parse(v.trim_start_matches('v')).ok())
    }
}

/// Persisted form of the last successful detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    pub source_path: PathBuf,
    pub detected_at: DateTime<Utc>,
    pub detection_method: DetectionMethod,
    #[serde(default)]
    pub version: Option<String>,
}

/// Every candidate examined by a failed detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchTrail {
    pub searched: Vec<PathBuf>,
}

pub struct SourcePathDetector {
    config: SourceConfig,
    start_dir: PathBuf,
    cache: TtlCache<DetectedSource>,
}

impl SourcePathDetector {
    pub fn new(config: SourceConfig, start_dir: impl Into<PathBuf>) -> Self {
        let cache = TtlCache::new(Duration::from_secs(config.cache_ttl_secs));
        Self {
            config,
            start_dir: start_dir.into(),
            cache,
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn metadata_file(&self) -> Option<PathBuf> {
        self.config.metadata_file.clone().or_else(|| {
            dirs::cache_dir().map(|d| d.join("lerian-sync").join("source-path.json"))
        })
    }

    /// Check `candidate` against the fingerprint.
    ///
    /// Returns the descriptor's version, if any, or why it was rejected.
    pub fn validate(&self, candidate: &Path) -> std::result::Result<Option<String>, String> {
        if !candidate.is_dir() {
            return Err("not a directory".to_string());
        }
        let descriptor_path = candidate.join(&self.config.descriptor);
        let content = std::fs::read_to_string(&descriptor_path)
            .map_err(|e| format!("{}: {e}", self.config.descriptor))?;
        let descriptor: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| format!("{} is not valid JSON: {e}", self.config.descriptor))?;

        let identity = descriptor
            .get(&self.config.identity_field)
            .and_then(|v| v.as_str());
        if identity != Some(self.config.package_name.as_str()) {
            return Err(format!(
                "{} `{}` is {:?}, expected {:?}",
                self.config.descriptor, self.config.identity_field, identity, self.config.package_name
            ));
        }
        if let Some(missing) = self
            .config
            .required_entries
            .iter()
            .find(|entry| !candidate.join(entry).exists())
        {
            return Err(format!("missing required entry `{missing}`"));
        }

        Ok(descriptor
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Run the fallback chain.
    pub async fn detect(&self) -> std::result::Result<DetectedSource, SearchTrail> {
        if let Some(cached) = self.cache.get() {
            return Ok(cached);
        }

        let mut trail = SearchTrail::default();
        for (candidate, method) in self.candidates().await {
            if trail.searched.contains(&candidate) {
                continue;
            }
            match self.validate(&candidate) {
                Ok(version) => {
                    let detected = DetectedSource {
                        path: candidate,
                        method,
                        version,
                    };
                    tracing::debug!(path = %detected.path.display(), method = %method, "Found source tree");
                    self.remember(&detected);
                    return Ok(detected);
                }
                Err(reason) => {
                    tracing::trace!(path = %candidate.display(), reason, "Rejected source candidate");
                    trail.searched.push(candidate);
                }
            }
        }
        Err(trail)
    }

    /// Accept a path supplied by the operator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] when the path fails the fingerprint.
    pub fn set_manual(&self, path: &Path) -> Result<DetectedSource> {
        let version = self.validate(path).map_err(|reason| Error::SourceUnavailable {
            message: format!("{} is not a valid source tree: {reason}", path.display()),
        })?;
        let detected = DetectedSource {
            path: path.to_path_buf(),
            method: DetectionMethod::Manual,
            version,
        };
        self.remember(&detected);
        Ok(detected)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    fn remember(&self, detected: &DetectedSource) {
        self.cache.set(detected.clone());
        if detected.method == DetectionMethod::Cached {
            return;
        }
        let Some(file) = self.metadata_file() else {
            return;
        };
        let metadata = SourceMetadata {
            source_path: detected.path.clone(),
            detected_at: Utc::now(),
            detection_method: detected.method,
            version: detected.version.clone(),
        };
        let written = serde_json::to_vec_pretty(&metadata)
            .map_err(Error::from)
            .and_then(|json| {
                write_atomic(&file, &json, RobustnessConfig::default()).map_err(Error::from)
            });
        if let Err(e) = written {
            tracing::warn!(path = %file.display(), error = %e, "Failed to persist source metadata");
        }
    }

    fn read_metadata(&self) -> Option<SourceMetadata> {
        let file = self.metadata_file()?;
        let content = std::fs::read_to_string(&file).ok()?;
        match serde_json::from_str(&content) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!(path = %file.display(), error = %e, "Ignoring unreadable source metadata");
                None
            }
        }
    }

    async fn candidates(&self) -> Vec<(PathBuf, DetectionMethod)> {
        let mut out = Vec::new();
        let package = &self.config.package_name;

        if let Some(explicit) = &self.config.explicit_path {
            out.push((explicit.clone(), DetectionMethod::Configured));
        }
        if let Some(metadata) = self.read_metadata() {
            out.push((metadata.source_path, DetectionMethod::Cached));
        }

        for dir in self.start_dir.ancestors().take(self.config.max_ancestor_depth + 1) {
            out.push((dir.to_path_buf(), DetectionMethod::Ancestor));
        }

        for location in &self.config.install_locations {
            out.push((location.clone(), DetectionMethod::WellKnown));
        }
        if self.config.default_locations {
            for location in default_install_locations(package) {
                out.push((location, DetectionMethod::WellKnown));
            }
        }

        if self.config.query_package_manager
            && let Some(root) = self.package_manager_root().await
        {
            out.push((root.join(package), DetectionMethod::PackageManager));
        }

        for dir in self.start_dir.ancestors().take(self.config.max_ancestor_depth + 1) {
            out.push((dir.join("node_modules").join(package), DetectionMethod::ModuleResolution));
        }
        if let Some(node_path) = std::env::var_os("NODE_PATH") {
            for dir in std::env::split_paths(&node_path) {
                out.push((dir.join(package), DetectionMethod::ModuleResolution));
            }
        }
        out
    }

    /// `npm root -g`, bounded by a timeout.
    async fn package_manager_root(&self) -> Option<PathBuf> {
        let program = if cfg!(windows) { "npm.cmd" } else { "npm" };
        let timeout = Duration::from_millis(self.config.package_manager_timeout_ms);
        let output = tokio::process::Command::new(program)
            .args(["root", "-g"])
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, output).await {
            Ok(Ok(output)) if output.status.success() => {
                let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
                (!root.is_empty()).then(|| PathBuf::from(root))
            }
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Package manager unavailable");
                None
            }
            Err(_) => {
                tracing::warn!(?timeout, "Package manager root query timed out");
                None
            }
        }
    }
}

fn default_install_locations(package: &str) -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".lerian").join(package));
        locations.push(home.join(".npm-global").join("lib").join("node_modules").join(package));
    }
    if let Some(data) = dirs::data_dir() {
        locations.push(data.join(package));
        if cfg!(windows) {
            locations.push(data.join("npm").join("node_modules").join(package));
        }
    }
    if cfg!(unix) {
        locations.push(PathBuf::from("/usr/local/lib/node_modules").join(package));
        locations.push(PathBuf::from("/usr/lib/node_modules").join(package));
        locations.push(PathBuf::from("/opt/homebrew/lib/node_modules").join(package));
    }
    locations
}

/// Reports the detected source tree and its version.
pub struct SourceChecker {
    detector: Arc<SourcePathDetector>,
}

impl SourceChecker {
    pub fn new(detector: Arc<SourcePathDetector>) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &Arc<SourcePathDetector> {
        &self.detector
    }
}

#[async_trait]
impl SafetyChecker for SourceChecker {
    fn id(&self) -> &str {
        SOURCE_CHECKER_ID
    }

    async fn perform_checks(&self) -> Result<Vec<CheckResult>> {
        let detected = match self.detector.detect().await {
            Ok(detected) => detected,
            Err(trail) => {
                return Ok(vec![
                    CheckResult::fail(
                        "source-path",
                        format!(
                            "Could not find an installed {} source tree",
                            self.detector.config().package_name
                        ),
                    )
                    .with_details(trail.searched.iter().map(|p| format!("searched {}", p.display())))
                    .with_metadata("searched", trail.searched.len()),
                ]);
            }
        };

        let path_result = CheckResult::pass(
            "source-path",
            format!("Using source tree at {}", detected.path.display()),
        )
        .with_path(&detected.path)
        .with_metadata("method", detected.method.to_string());

        let version_result = match (&detected.version, detected.semver()) {
            (Some(raw), Some(version)) => {
                CheckResult::pass("source-version", format!("Source version {version}"))
                    .with_metadata("version", raw.as_str())
            }
            (Some(raw), None) => CheckResult::warn(
                "source-version",
                format!("Source version `{raw}` is not a valid semantic version"),
            ),
            (None, _) => CheckResult::warn("source-version", "Source descriptor has no version"),
        };
        Ok(vec![path_result, version_result.with_path(&detected.path)])
    }
}
