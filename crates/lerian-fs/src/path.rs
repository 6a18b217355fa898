//! Forward-slash relative paths shared by traversal, the checksum cache and rules

use std::path::{Component, Path, PathBuf};

/// A path normalized to forward slashes.
///
/// Sync bookkeeping (cache keys, rule matching, change lists) must produce the
/// same string for the same file on every platform, so relative paths are
/// always stored with `/` separators and converted back to native form only
/// at I/O boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NormalizedPath {
    inner: String,
}

impl NormalizedPath {
    /// Create a new NormalizedPath from any path-like input.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path_str = path.as_ref().to_string_lossy();
        let normalized = path_str.replace('\\', "/");
        Self { inner: normalized }
    }

    /// Build the root-relative form of `full`.
    ///
    /// Returns `None` when `full` does not live under `root`. Current-dir
    /// components are dropped so `./a/b` and `a/b` compare equal.
    pub fn relative_to(full: &Path, root: &Path) -> Option<Self> {
        let rel = full.strip_prefix(root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        Some(Self {
            inner: parts.join("/"),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether resolving this path against a root stays below that root.
    ///
    /// False for empty paths and for any parent, root or drive-prefix
    /// component.
    pub fn is_contained(&self) -> bool {
        let mut named = false;
        for component in Path::new(&self.inner).components() {
            match component {
                Component::Normal(part) => {
                    // `C:` style segments are prefixes on Windows
                    if part.to_string_lossy().contains(':') {
                        return false;
                    }
                    named = true;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
            }
        }
        named
    }

    /// Resolve this (relative) path against `root` in platform-native form.
    pub fn under(&self, root: &Path) -> PathBuf {
        self.inner
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(root.to_path_buf(), |acc, seg| acc.join(seg))
    }

    pub fn to_native(&self) -> PathBuf {
        PathBuf::from(&self.inner)
    }

    pub fn join(&self, segment: &str) -> Self {
        let segment_normalized = segment.replace('\\', "/");
        let joined = if self.inner.is_empty() {
            segment_normalized
        } else if self.inner.ends_with('/') {
            format!("{}{}", self.inner, segment_normalized)
        } else {
            format!("{}/{}", self.inner, segment_normalized)
        };
        Self { inner: joined }
    }

    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.inner.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) if idx > 0 => Some(Self {
                inner: trimmed[..idx].to_string(),
            }),
            Some(0) => Some(Self {
                inner: "/".to_string(),
            }),
            _ => None,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        let trimmed = self.inner.trim_end_matches('/');
        trimmed.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Number of `/`-separated segments.
    pub fn depth(&self) -> usize {
        self.inner.split('/').filter(|s| !s.is_empty()).count()
    }

    /// Whether this path equals `dir` or lives below it (segment-wise).
    pub fn is_within(&self, dir: &str) -> bool {
        let dir = dir.trim_end_matches('/');
        dir.is_empty()
            || self.inner == dir
            || (self.inner.starts_with(dir) && self.inner[dir.len()..].starts_with('/'))
    }

    /// Lowercased extension without the dot; dotfiles have none.
    pub fn extension(&self) -> Option<String> {
        self.file_name().and_then(|name| {
            let idx = name.rfind('.')?;
            if idx == 0 {
                None
            } else {
                Some(name[idx + 1..].to_lowercase())
            }
        })
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        Path::new(&self.inner)
    }
}

impl std::fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl From<&str> for NormalizedPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NormalizedPath {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&Path> for NormalizedPath {
    fn from(p: &Path) -> Self {
        Self::new(p)
    }
}
