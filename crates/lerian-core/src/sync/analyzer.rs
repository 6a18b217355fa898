//! Incremental change analysis
//!
//! Wraps [`ChangeDetector`] with a selectable comparison strategy, a
//! persisted digest cache for the source side, user sync rules, lifecycle
//! hooks and the audit log.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use lerian_fs::{FileSystemOps, HashAlgorithm, NormalizedPath, SyncPath};

use super::audit::{AuditLog, AuditResult, DEFAULT_AUDIT_MAX_BYTES};
use super::change::{ChangeType, FileChange};
use super::checksum::ChecksumCache;
use super::detector::{ChangeComparator, ChangeDetector, ScannedFile};
use super::hooks::{HookContext, HookRegistry, HookStats, HookType, SyncPlugin, execute_hooks};
use super::rules::{RuleContext, RuleSet};
use super::strategy::ComparisonStrategy;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub strategy: ComparisonStrategy,
    pub algorithm: HashAlgorithm,
    /// Persist source digests between runs
    pub checksum_cache: bool,
    pub hook_timeout_ms: u64,
    pub audit: bool,
    pub audit_max_bytes: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            strategy: ComparisonStrategy::default(),
            algorithm: HashAlgorithm::default(),
            checksum_cache: true,
            hook_timeout_ms: 5_000,
            audit: true,
            audit_max_bytes: DEFAULT_AUDIT_MAX_BYTES,
        }
    }
}

/// Digest work done by the analyzer so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyzerStats {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub files_hashed: usize,
}

/// Output of one analysis pass
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    /// Changes that survived the sync rules, in rule order
    pub changes: Vec<FileChange>,
    pub unchanged: usize,
    /// Detected changes removed by rules or default excludes
    pub filtered: usize,
    pub strategy: ComparisonStrategy,
    pub stats: AnalyzerStats,
}

impl AnalysisReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, change_type: ChangeType) -> usize {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .count()
    }
}

pub struct IncrementalSyncAnalyzer {
    fs: Arc<FileSystemOps>,
    config: AnalyzerConfig,
    source: PathBuf,
    destination: PathBuf,
    detector: ChangeDetector,
    cache: Mutex<ChecksumCache>,
    rules: RuleSet,
    hooks: HookRegistry,
    audit: AuditLog,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    files_hashed: AtomicUsize,
}

impl std::fmt::Debug for IncrementalSyncAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalSyncAnalyzer")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl IncrementalSyncAnalyzer {
    /// Load the digest cache and sync rules for `destination`.
    ///
    /// # Errors
    ///
    /// Fails when the destination's rules file is invalid. A corrupted
    /// digest cache only logs a warning.
    pub fn new(
        fs: Arc<FileSystemOps>,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        config: AnalyzerConfig,
        session_id: &str,
    ) -> Result<Self> {
        let source = source.into();
        let destination = destination.into();
        let cache = if config.checksum_cache {
            ChecksumCache::load(destination.join(SyncPath::ChecksumFile))
        } else {
            ChecksumCache::default()
        };
        let rules = RuleSet::load(&destination)?;
        let audit = if config.audit {
            AuditLog::for_destination(&destination, session_id, config.audit_max_bytes)
        } else {
            AuditLog::disabled()
        };

        Ok(Self {
            detector: ChangeDetector::new(Arc::clone(&fs)),
            fs,
            config,
            source,
            destination,
            cache: Mutex::new(cache),
            rules,
            hooks: HookRegistry::new(),
            audit,
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
            files_hashed: AtomicUsize::new(0),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn install_plugin(&mut self, plugin: &dyn SyncPlugin) {
        self.hooks.install(plugin);
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn stats(&self) -> AnalyzerStats {
        AnalyzerStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            files_hashed: self.files_hashed.load(Ordering::Relaxed),
        }
    }

    /// Compare the trees, apply sync rules and persist the digest cache.
    pub async fn analyze(&self, rule_ctx: &RuleContext) -> Result<AnalysisReport> {
        self.audit
            .record(
                "analysis_started",
                json!({
                    "source": self.source.display().to_string(),
                    "destination": self.destination.display().to_string(),
                    "strategy": self.config.strategy,
                }),
                AuditResult::Success,
            )
            .await;

        let detected = match self.detector.detect(&self.source, &self.destination, self).await {
            Ok(set) => set,
            Err(e) => {
                self.audit
                    .record("analysis_failed", json!({ "error": e.to_string() }), AuditResult::Failure)
                    .await;
                return Err(e);
            }
        };

        let detected_count = detected.changes.len();
        let changes = self.apply_sync_rules(detected.changes, rule_ctx);
        self.save_cache().await;

        let report = AnalysisReport {
            filtered: detected_count - changes.len(),
            changes,
            unchanged: detected.unchanged,
            strategy: self.config.strategy,
            stats: self.stats(),
        };

        tracing::info!(
            changes = report.changes.len(),
            unchanged = report.unchanged,
            filtered = report.filtered,
            cache_hits = report.stats.cache_hits,
            files_hashed = report.stats.files_hashed,
            "Analysis complete"
        );
        self.audit
            .record(
                "analysis_completed",
                json!({
                    "new": report.count(ChangeType::New),
                    "modified": report.count(ChangeType::Modified),
                    "deleted": report.count(ChangeType::Deleted),
                    "unchanged": report.unchanged,
                    "filtered": report.filtered,
                }),
                AuditResult::Success,
            )
            .await;
        Ok(report)
    }

    pub fn apply_sync_rules(&self, files: Vec<FileChange>, ctx: &RuleContext) -> Vec<FileChange> {
        self.rules.apply(files, ctx)
    }

    pub async fn execute_hooks(&self, hook_type: HookType, ctx: &HookContext) -> HookStats {
        let timeout = Duration::from_millis(self.config.hook_timeout_ms);
        execute_hooks(&self.hooks, hook_type, ctx, timeout).await
    }

    /// Prune digests of vanished source files and persist the cache.
    ///
    /// Runs on the blocking pool since the atomic write may back off.
    async fn save_cache(&self) {
        if !self.config.checksum_cache {
            return;
        }
        let mut cache = self.cache.lock().await;
        if cache.is_empty() {
            return;
        }
        let mut snapshot = cache.clone();
        let source = self.source.clone();
        let saved = tokio::task::spawn_blocking(move || {
            snapshot.retain_paths(|relative| NormalizedPath::new(relative).under(&source).is_file());
            snapshot.save().map(|()| snapshot)
        })
        .await;
        match saved {
            Ok(Ok(snapshot)) => *cache = snapshot,
            Ok(Err(e)) => {
                tracing::warn!(path = %cache.path().display(), error = %e, "Failed to save checksum cache");
            }
            Err(e) => {
                tracing::warn!(path = %cache.path().display(), error = %e, "Checksum cache save task failed");
            }
        }
    }

    async fn source_digest(&self, relative: &str, file: &ScannedFile) -> Result<String> {
        let (mtime_ms, size) = (file.meta.mtime_ms, file.meta.size);
        if let Some(hex) = self.cache.lock().await.get(relative, mtime_ms, size) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hex.to_string());
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let digest = self.hash(&file.full_path).await?;
        // Key by the stat the detector saw; a concurrent edit simply misses next run
        self.cache
            .lock()
            .await
            .insert(relative, mtime_ms, size, digest.clone());
        Ok(digest)
    }

    async fn hash(&self, path: &Path) -> Result<String> {
        let digest = self.fs.hash(path, self.config.algorithm).await?;
        self.files_hashed.fetch_add(1, Ordering::Relaxed);
        Ok(digest.hex)
    }

    async fn digests_differ(&self, relative: &str, source: &ScannedFile, destination: &ScannedFile) -> Result<bool> {
        let source_hex = self.source_digest(relative, source).await?;
        let dest_hex = self.hash(&destination.full_path).await?;
        Ok(source_hex != dest_hex)
    }
}

#[async_trait]
impl ChangeComparator for IncrementalSyncAnalyzer {
    async fn compare(
        &self,
        relative: &str,
        source: &ScannedFile,
        destination: &ScannedFile,
    ) -> Result<Option<String>> {
        let (src, dst) = (&source.meta, &destination.meta);
        let reason = match self.config.strategy {
            ComparisonStrategy::Timestamp => {
                (src.mtime_ms > dst.mtime_ms).then(|| "source is newer".to_string())
            }
            ComparisonStrategy::Checksum => self
                .digests_differ(relative, source, destination)
                .await?
                .then(|| "content differs".to_string()),
            ComparisonStrategy::TimestampChecksum => {
                if src.size != dst.size {
                    Some("size differs".to_string())
                } else if src.mtime_ms <= dst.mtime_ms {
                    None
                } else {
                    self.digests_differ(relative, source, destination)
                        .await?
                        .then(|| "content differs".to_string())
                }
            }
        };
        Ok(reason)
    }
}
