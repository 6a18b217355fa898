//! Tree comparison
//!
//! Both trees are walked concurrently with the default excludes pruned.
//! Paths on one side only are new or deleted; paths on both sides are
//! handed to a [`ChangeComparator`] that decides whether content differs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use lerian_fs::{FileMetadata, FileSystemOps};

use super::change::{ChangeSet, ChangeType, FileChange};
use super::rules::default_exclude_filter;
use crate::Result;

/// A file found while scanning one side.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    pub full_path: PathBuf,
    pub meta: FileMetadata,
}

/// Decides whether a path present on both sides differs.
#[async_trait]
pub trait ChangeComparator: Send + Sync {
    /// `Some(reason)` when the content differs.
    async fn compare(
        &self,
        relative: &str,
        source: &ScannedFile,
        destination: &ScannedFile,
    ) -> Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    fs: Arc<FileSystemOps>,
}

impl ChangeDetector {
    pub fn new(fs: Arc<FileSystemOps>) -> Self {
        Self { fs }
    }

    /// Regular files under `root`, keyed by relative path.
    ///
    /// A missing root is an empty tree.
    pub async fn scan(&self, root: &Path) -> Result<BTreeMap<String, ScannedFile>> {
        let mut files = BTreeMap::new();
        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            return Ok(files);
        }

        let options = self.fs.traverse_options().with_filter(default_exclude_filter());
        let mut traversal = self.fs.traverse(root, options);
        while let Some(entry) = traversal.next().await {
            let entry = entry?;
            if !entry.is_file() {
                continue;
            }
            let meta = self.fs.metadata(&entry.full_path).await?;
            files.insert(
                entry.path.as_str().to_string(),
                ScannedFile {
                    full_path: entry.full_path,
                    meta,
                },
            );
        }
        Ok(files)
    }

    /// Classify every path under either root.
    ///
    /// # Errors
    ///
    /// Fails with the first traversal or comparison error; no partial
    /// change set is returned.
    pub async fn detect<C>(&self, source: &Path, destination: &Path, comparator: &C) -> Result<ChangeSet>
    where
        C: ChangeComparator + ?Sized,
    {
        let (source_files, dest_files) = tokio::join!(self.scan(source), self.scan(destination));
        let (source_files, dest_files) = (source_files?, dest_files?);

        let all_paths: BTreeSet<&String> = source_files.keys().chain(dest_files.keys()).collect();
        let mut set = ChangeSet::default();

        for relative in all_paths {
            match (source_files.get(relative), dest_files.get(relative)) {
                (Some(src), None) => set.changes.push(
                    FileChange::new(relative.as_str(), ChangeType::New)
                        .with_source(src.meta.clone())
                        .with_reason("only in source"),
                ),
                (None, Some(dst)) => set.changes.push(
                    FileChange::new(relative.as_str(), ChangeType::Deleted)
                        .with_dest(dst.meta.clone())
                        .with_reason("only in destination"),
                ),
                (Some(src), Some(dst)) => match comparator.compare(relative, src, dst).await? {
                    Some(reason) => set.changes.push(
                        FileChange::new(relative.as_str(), ChangeType::Modified)
                            .with_source(src.meta.clone())
                            .with_dest(dst.meta.clone())
                            .with_reason(reason),
                    ),
                    None => set.unchanged += 1,
                },
                (None, None) => {}
            }
        }

        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            changes = set.changes.len(),
            unchanged = set.unchanged,
            "Detected changes"
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lerian_test_utils::tree::SyncFixture;
    use pretty_assertions::assert_eq;

    /// Treats files as equal when their sizes match.
    struct BySize;

    #[async_trait]
    impl ChangeComparator for BySize {
        async fn compare(&self, _: &str, s: &ScannedFile, d: &ScannedFile) -> Result<Option<String>> {
            Ok((s.meta.size != d.meta.size).then(|| "size differs".to_string()))
        }
    }

    fn detector() -> ChangeDetector {
        ChangeDetector::new(Arc::new(FileSystemOps::default()))
    }

    #[tokio::test]
    async fn classifies_each_path_once() {
        let fixture = SyncFixture::new();
        fixture.write_source("agents/a.md", "new agent");
        fixture.write_source("same.md", "same");
        fixture.write_destination("same.md", "same");
        fixture.write_source("config.yaml", "key: longer value");
        fixture.write_destination("config.yaml", "key: v");
        fixture.write_destination("agents/b.md", "stale");

        let set = detector()
            .detect(&fixture.source(), &fixture.destination(), &BySize)
            .await
            .unwrap();

        let summary: Vec<(&str, ChangeType)> = set
            .changes
            .iter()
            .map(|c| (c.relative_path.as_str(), c.change_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("agents/a.md", ChangeType::New),
                ("agents/b.md", ChangeType::Deleted),
                ("config.yaml", ChangeType::Modified),
            ]
        );
        assert_eq!(set.unchanged, 1);
    }

    #[tokio::test]
    async fn default_excludes_are_pruned() {
        let fixture = SyncFixture::new();
        fixture.write_destination(".git/HEAD", "ref: refs/heads/main");
        fixture.write_destination(".lerian-sync-cache/checksums.json", "{}");
        fixture.write_source("node_modules/pkg/index.js", "x");
        fixture.write_source("docs/guide.md", "guide");

        let set = detector()
            .detect(&fixture.source(), &fixture.destination(), &BySize)
            .await
            .unwrap();

        assert_eq!(set.paths(ChangeType::New), vec!["docs/guide.md"]);
        assert_eq!(set.count(ChangeType::Deleted), 0);
    }

    #[tokio::test]
    async fn missing_destination_makes_everything_new() {
        let fixture = SyncFixture::new();
        fixture.write_source("a.md", "a");
        let missing = fixture.root().join("nowhere");

        let set = detector()
            .detect(&fixture.source(), &missing, &BySize)
            .await
            .unwrap();

        assert_eq!(set.paths(ChangeType::New), vec!["a.md"]);
    }
}
