//! Change records produced by a detection pass

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use lerian_fs::FileMetadata;

/// How a relative path differs between source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    New,
    Modified,
    Deleted,
    /// Never produced by detection; moves surface as a delete plus a new.
    Moved,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
        };
        f.write_str(name)
    }
}

/// One differing path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// `/`-separated path relative to both roots
    pub relative_path: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_meta: Option<FileMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_meta: Option<FileMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Data attached by transform rules
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl FileChange {
    pub fn new(relative_path: impl Into<String>, change_type: ChangeType) -> Self {
        Self {
            relative_path: relative_path.into(),
            change_type,
            source_meta: None,
            dest_meta: None,
            reason: None,
            metadata: Map::new(),
        }
    }

    pub fn with_source(mut self, meta: FileMetadata) -> Self {
        self.source_meta = Some(meta);
        self
    }

    pub fn with_dest(mut self, meta: FileMetadata) -> Self {
        self.dest_meta = Some(meta);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Whether applying this change replaces or removes a destination file.
    pub fn is_destructive(&self) -> bool {
        matches!(self.change_type, ChangeType::Modified | ChangeType::Deleted)
    }
}

/// Result of comparing two trees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Sorted by relative path
    pub changes: Vec<FileChange>,
    /// Paths present on both sides with equal content
    pub unchanged: usize,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn count(&self, change_type: ChangeType) -> usize {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .count()
    }

    pub fn paths(&self, change_type: ChangeType) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .map(|c| c.relative_path.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_serializes_camel_case() {
        let change = FileChange::new("agents/a.md", ChangeType::New).with_reason("only in source");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["relativePath"], "agents/a.md");
        assert_eq!(json["changeType"], "new");
        assert_eq!(json["reason"], "only in source");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn change_set_counts() {
        let set = ChangeSet {
            changes: vec![
                FileChange::new("a", ChangeType::New),
                FileChange::new("b", ChangeType::Deleted),
                FileChange::new("c", ChangeType::New),
            ],
            unchanged: 4,
        };
        assert_eq!(set.count(ChangeType::New), 2);
        assert_eq!(set.paths(ChangeType::Deleted), vec!["b"]);
        assert!(!set.is_empty());
    }
}
