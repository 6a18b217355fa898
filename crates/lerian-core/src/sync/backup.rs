//! Timestamped copies of destination files taken before they are replaced

use std::path::{Path, PathBuf};

use chrono::Local;

use lerian_fs::{CopyOptions, FileSystemOps, NormalizedPath, SyncPath};

use crate::Result;

/// Backups under `<destination>/.lerian-sync-cache/backups/`, mirroring the
/// relative directory of each original.
#[derive(Debug, Clone)]
pub struct BackupStore {
    destination: PathBuf,
    root: PathBuf,
}

impl BackupStore {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        let root = destination.join(SyncPath::BackupsDir);
        Self { destination, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy the destination file at `relative` aside.
    ///
    /// Returns `None` when there is nothing to back up.
    pub async fn backup(&self, fs: &FileSystemOps, relative: &str) -> Result<Option<PathBuf>> {
        let rel = NormalizedPath::new(relative);
        let original = rel.under(&self.destination);
        if !tokio::fs::try_exists(&original).await.unwrap_or(false) {
            return Ok(None);
        }

        let name = rel.file_name().unwrap_or("file");
        let dir = match rel.parent() {
            Some(parent) => parent.under(&self.root),
            None => self.root.clone(),
        };
        let stamp = Local::now().format("%Y%m%d_%H%M%S");

        let mut target = dir.join(format!("{name}.{stamp}.bak"));
        let mut attempt = 1;
        while tokio::fs::try_exists(&target).await.unwrap_or(false) {
            target = dir.join(format!("{name}.{stamp}-{attempt}.bak"));
            attempt += 1;
        }

        fs.copy_atomic(
            &original,
            &target,
            CopyOptions {
                overwrite: false,
                preserve_timestamps: true,
            },
        )
        .await?;
        tracing::debug!(original = %original.display(), backup = %target.display(), "Backed up file");
        Ok(Some(target))
    }

    /// Backups taken for `relative`, oldest first.
    pub async fn list(&self, relative: &str) -> Result<Vec<PathBuf>> {
        let rel = NormalizedPath::new(relative);
        let Some(name) = rel.file_name() else {
            return Ok(Vec::new());
        };
        let dir = match rel.parent() {
            Some(parent) => parent.under(&self.root),
            None => self.root.clone(),
        };
        let prefix = format!("{name}.");

        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with(&prefix) && file_name.ends_with(".bak") {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lerian_test_utils::tree::SyncFixture;

    #[tokio::test]
    async fn backup_mirrors_relative_directory() {
        let fixture = SyncFixture::new();
        fixture.write_destination("agents/a.md", "original");
        let store = BackupStore::new(fixture.destination());
        let fs = FileSystemOps::default();

        let first = store.backup(&fs, "agents/a.md").await.unwrap().unwrap();
        let second = store.backup(&fs, "agents/a.md").await.unwrap().unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with(fixture.destination().join(".lerian-sync-cache/backups/agents")));
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("a.md.") && name.ends_with(".bak"));
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "original");
        assert_eq!(store.list("agents/a.md").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_original_is_not_backed_up() {
        let fixture = SyncFixture::new();
        let store = BackupStore::new(fixture.destination());
        let fs = FileSystemOps::default();

        assert_eq!(store.backup(&fs, "nope.md").await.unwrap(), None);
        assert!(store.list("nope.md").await.unwrap().is_empty());
    }
}
