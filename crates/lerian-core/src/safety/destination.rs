//! Destination validation: existence, write access, free space and
//! filesystem limitations
//!
//! Write access is established by actually writing, reading back, renaming
//! and deleting a throwaway file. Permission bits are never consulted.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use lerian_fs::FileSystemOps;

use super::checker::SafetyChecker;
use super::result::CheckResult;
use crate::{Error, Result};

pub const DESTINATION_CHECKER_ID: &str = "destination";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    /// Below this many free bytes the check fails
    pub min_free_bytes: u64,
    /// Below this many free bytes the check warns
    pub warn_free_bytes: u64,
    /// Size of the fallback write when free space cannot be queried
    pub test_write_bytes: u64,
    /// File name length the long-name probe tries
    pub long_name_len: usize,
    pub probe_filesystem: bool,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            min_free_bytes: 10 * MIB,
            warn_free_bytes: 100 * MIB,
            test_write_bytes: MIB,
            long_name_len: 200,
            probe_filesystem: true,
        }
    }
}

pub struct DestinationValidator {
    destination: PathBuf,
    fs: Arc<FileSystemOps>,
    config: DestinationConfig,
    after: Vec<String>,
}

impl DestinationValidator {
    pub fn new(
        destination: impl Into<PathBuf>,
        fs: Arc<FileSystemOps>,
        config: DestinationConfig,
    ) -> Self {
        Self {
            destination: destination.into(),
            fs,
            config,
            after: Vec::new(),
        }
    }

    /// Run only once `checker_id` has finished, keeping probe files out of
    /// its view of the working tree.
    pub fn after(mut self, checker_id: impl Into<String>) -> Self {
        self.after.push(checker_id.into());
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    fn probe_name(&self, tag: &str) -> String {
        format!(".lerian-probe-{tag}-{}", uuid::Uuid::new_v4().simple())
    }

    /// Returns the directory the remaining probes should run in, if any.
    fn exists_check(&self) -> (CheckResult, Option<PathBuf>) {
        if self.destination.is_dir() {
            return (
                CheckResult::pass("destination-exists", "Destination directory exists")
                    .with_path(&self.destination),
                Some(self.destination.clone()),
            );
        }
        if self.destination.exists() {
            return (
                CheckResult::fail("destination-exists", "Destination exists but is not a directory")
                    .with_path(&self.destination),
                None,
            );
        }
        match self.destination.parent().filter(|p| p.is_dir()) {
            Some(parent) => (
                CheckResult::warn(
                    "destination-exists",
                    "Destination does not exist yet and will be created",
                )
                .with_path(&self.destination)
                .with_detail(format!("Parent directory: {}", parent.display())),
                Some(parent.to_path_buf()),
            ),
            None => (
                CheckResult::fail(
                    "destination-exists",
                    "Neither the destination nor its parent directory exists",
                )
                .with_path(&self.destination),
                None,
            ),
        }
    }

    async fn writable_check(&self, dir: &Path) -> Result<CheckResult> {
        let probe = dir.join(self.probe_name("write"));
        let renamed = dir.join(self.probe_name("rename"));
        let payload = b"lerian-sync write probe";

        let outcome = async {
            tokio::fs::write(&probe, payload).await?;
            let read_back = tokio::fs::read(&probe).await?;
            if read_back != payload {
                return Err(std::io::Error::other("read-back differs from written content"));
            }
            tokio::fs::rename(&probe, &renamed).await?;
            tokio::fs::remove_file(&renamed).await
        }
        .await;

        // Never leave probe files behind, whichever step failed
        let _ = tokio::fs::remove_file(&probe).await;
        let _ = tokio::fs::remove_file(&renamed).await;

        match outcome {
            Ok(()) => Ok(CheckResult::pass("destination-writable", "Destination is writable")
                .with_path(dir)),
            Err(e) if is_transient_io(&e) => Err(Error::Io(e)),
            Err(e) => {
                let mut result = CheckResult::fail(
                    "destination-writable",
                    format!("Cannot write to destination: {e}"),
                )
                .with_path(dir);
                if e.kind() == ErrorKind::PermissionDenied {
                    result = result.with_detail("Grant your user write permission on the directory");
                }
                Ok(result)
            }
        }
    }

    async fn disk_space_check(&self, dir: &Path) -> CheckResult {
        let available = match self.fs.available_space(dir).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "Free space query failed, trying a test write");
                return self.test_write_fallback(dir).await;
            }
        };

        let result = if available < self.config.min_free_bytes {
            CheckResult::fail(
                "destination-disk-space",
                format!("Only {} free on the destination filesystem", human_bytes(available)),
            )
            .with_detail(format!(
                "At least {} is required",
                human_bytes(self.config.min_free_bytes)
            ))
        } else if available < self.config.warn_free_bytes {
            CheckResult::warn(
                "destination-disk-space",
                format!("Low disk space: {} free", human_bytes(available)),
            )
        } else {
            CheckResult::pass(
                "destination-disk-space",
                format!("{} free", human_bytes(available)),
            )
        };
        result.with_path(dir).with_metadata("available", available)
    }

    async fn test_write_fallback(&self, dir: &Path) -> CheckResult {
        let probe = dir.join(self.probe_name("space"));
        let len = usize::try_from(self.config.test_write_bytes).unwrap_or(usize::MAX);
        let written = tokio::fs::write(&probe, vec![0u8; len]).await;
        let _ = tokio::fs::remove_file(&probe).await;

        let result = match written {
            Ok(()) => CheckResult::warn(
                "destination-disk-space",
                format!(
                    "Free space unknown; a {} test write succeeded",
                    human_bytes(self.config.test_write_bytes)
                ),
            ),
            Err(e) => CheckResult::fail(
                "destination-disk-space",
                format!("Free space unknown and a test write failed: {e}"),
            ),
        };
        result.with_path(dir)
    }

    async fn filesystem_check(&self, dir: &Path) -> CheckResult {
        let mut limitations = Vec::new();

        if let Some(limitation) = self.probe_read_only(dir).await {
            return CheckResult::fail("destination-filesystem", limitation).with_path(dir);
        }
        if !self.probe_case_sensitive(dir).await {
            limitations.push("File names are case-insensitive".to_string());
        }
        if !self.probe_name_ok(dir, &"l".repeat(self.config.long_name_len)).await {
            limitations.push(format!(
                "File names of {} characters are rejected",
                self.config.long_name_len
            ));
        }
        if !self.probe_name_ok(dir, "lerian probe (ü) #1").await {
            limitations.push("Special characters in file names are rejected".to_string());
        }

        if limitations.is_empty() {
            CheckResult::pass("destination-filesystem", "No filesystem limitations detected")
                .with_path(dir)
        } else {
            CheckResult::warn(
                "destination-filesystem",
                format!("{} filesystem limitation(s) detected", limitations.len()),
            )
            .with_details(limitations)
            .with_path(dir)
        }
    }

    async fn probe_read_only(&self, dir: &Path) -> Option<String> {
        let probe = dir.join(self.probe_name("ro"));
        let result = tokio::fs::write(&probe, b"").await;
        let _ = tokio::fs::remove_file(&probe).await;
        match result {
            Err(e) if e.kind() == ErrorKind::ReadOnlyFilesystem => {
                Some("Destination is on a read-only filesystem".to_string())
            }
            _ => None,
        }
    }

    async fn probe_case_sensitive(&self, dir: &Path) -> bool {
        let lower = self.probe_name("case");
        let upper = lower.to_uppercase();
        let lower_path = dir.join(&lower);
        if tokio::fs::write(&lower_path, b"").await.is_err() {
            return true;
        }
        let collides = tokio::fs::try_exists(dir.join(&upper)).await.unwrap_or(false);
        let _ = tokio::fs::remove_file(&lower_path).await;
        !collides
    }

    async fn probe_name_ok(&self, dir: &Path, stem: &str) -> bool {
        let path = dir.join(stem);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return true;
        }
        let ok = tokio::fs::write(&path, b"").await.is_ok();
        let _ = tokio::fs::remove_file(&path).await;
        ok
    }
}

#[async_trait]
impl SafetyChecker for DestinationValidator {
    fn id(&self) -> &str {
        DESTINATION_CHECKER_ID
    }

    fn dependencies(&self) -> Vec<String> {
        self.after.clone()
    }

    async fn perform_checks(&self) -> Result<Vec<CheckResult>> {
        let (exists, probe_dir) = self.exists_check();
        let Some(dir) = probe_dir else {
            return Ok(vec![exists]);
        };

        let mut results = vec![exists];
        let writable = self.writable_check(&dir).await?;
        let can_write = !writable.is_blocking();
        results.push(writable);
        results.push(self.disk_space_check(&dir).await);
        if self.config.probe_filesystem && can_write {
            results.push(self.filesystem_check(&dir).await);
        }
        Ok(results)
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::ResourceBusy
    )
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::CheckStatus;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn validator(path: &Path, config: DestinationConfig) -> DestinationValidator {
        DestinationValidator::new(path, Arc::new(FileSystemOps::default()), config)
    }

    fn ids(results: &[CheckResult]) -> Vec<&str> {
        results.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn healthy_destination_passes_every_check() {
        let temp = tempfile::tempdir().unwrap();
        let config = DestinationConfig {
            min_free_bytes: 0,
            warn_free_bytes: 0,
            ..Default::default()
        };
        let results = validator(temp.path(), config).perform_checks().await.unwrap();

        assert_eq!(
            ids(&results),
            vec![
                "destination-exists",
                "destination-writable",
                "destination-disk-space",
                "destination-filesystem",
            ]
        );
        assert!(results.iter().all(|r| r.path.is_some()));
        assert!(results.iter().all(|r| !r.is_blocking()));
        // Probe files are cleaned up
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn ordering_is_opt_in() {
        let temp = tempfile::tempdir().unwrap();
        assert!(validator(temp.path(), DestinationConfig::default()).dependencies().is_empty());
        let ordered = validator(temp.path(), DestinationConfig::default()).after("git");
        assert_eq!(ordered.dependencies(), vec!["git".to_string()]);
    }

    #[tokio::test]
    async fn missing_destination_with_parent_warns() {
        let temp = tempfile::tempdir().unwrap();
        let results = validator(&temp.path().join("new"), DestinationConfig::default())
            .perform_checks()
            .await
            .unwrap();
        assert_eq!(results[0].status, CheckStatus::Warn);
        assert_eq!(results[1].path.as_deref(), Some(temp.path()));
    }

    #[tokio::test]
    async fn missing_parent_fails_alone() {
        let temp = tempfile::tempdir().unwrap();
        let results = validator(&temp.path().join("a/b/c"), DestinationConfig::default())
            .perform_checks()
            .await
            .unwrap();
        assert_eq!(ids(&results), vec!["destination-exists"]);
        assert_eq!(results[0].status, CheckStatus::Fail);
    }

    #[tokio::test]
    async fn file_in_place_of_destination_fails() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("dest");
        std::fs::write(&file, "x").unwrap();
        let results = validator(&file, DestinationConfig::default())
            .perform_checks()
            .await
            .unwrap();
        assert_eq!(results[0].status, CheckStatus::Fail);
    }

    #[rstest]
    #[case(u64::MAX, u64::MAX, CheckStatus::Fail)]
    #[case(0, u64::MAX, CheckStatus::Warn)]
    #[case(0, 0, CheckStatus::Pass)]
    #[tokio::test]
    async fn disk_space_thresholds(
        #[case] min_free_bytes: u64,
        #[case] warn_free_bytes: u64,
        #[case] expected: CheckStatus,
    ) {
        let temp = tempfile::tempdir().unwrap();
        let config = DestinationConfig {
            min_free_bytes,
            warn_free_bytes,
            probe_filesystem: false,
            ..Default::default()
        };
        let results = validator(temp.path(), config).perform_checks().await.unwrap();
        let space = results.iter().find(|r| r.id == "destination-disk-space").unwrap();
        assert_eq!(space.status, expected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_only_directory_is_not_writable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("locked");
        std::fs::create_dir(&dir).unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Root bypasses permission bits
        let probe = dir.join("probe");
        let privileged = std::fs::write(&probe, "x").is_ok();
        let _ = std::fs::remove_file(&probe);

        let results = validator(&dir, DestinationConfig::default())
            .perform_checks()
            .await
            .unwrap();
        let writable = results.iter().find(|r| r.id == "destination-writable").unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        if privileged {
            assert_eq!(writable.status, CheckStatus::Pass);
        } else {
            assert_eq!(writable.status, CheckStatus::Fail);
            assert!(!results.iter().any(|r| r.id == "destination-filesystem"));
        }
    }

    #[test]
    fn human_bytes_scales_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(10 * MIB), "10.0 MiB");
        assert_eq!(human_bytes(3 * 1024 * MIB / 2), "1.5 GiB");
    }
}
