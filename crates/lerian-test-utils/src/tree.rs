//! [`SyncFixture`]: paired source/destination trees for sync scenarios.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

/// Package name written by [`SyncFixture::make_installable_source`].
pub const FIXTURE_PACKAGE: &str = "lerian-templates";

/// A temporary workspace holding a `source/` and a `destination/` tree.
pub struct SyncFixture {
    temp_dir: TempDir,
}

impl Default for SyncFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncFixture {
    /// Create empty `source/` and `destination/` directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("source")).unwrap();
        fs::create_dir_all(temp_dir.path().join("destination")).unwrap();
        Self { temp_dir }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn source(&self) -> PathBuf {
        self.root().join("source")
    }

    pub fn destination(&self) -> PathBuf {
        self.root().join("destination")
    }

    /// Write `content` to `rel` under the source tree, creating parents.
    pub fn write_source(&self, rel: &str, content: &str) -> PathBuf {
        write(&self.source(), rel, content)
    }

    /// Write `content` to `rel` under the destination tree, creating parents.
    pub fn write_destination(&self, rel: &str, content: &str) -> PathBuf {
        write(&self.destination(), rel, content)
    }

    /// Turn the source tree into something the source-path detector accepts:
    /// a `package.json` naming [`FIXTURE_PACKAGE`] plus a `templates/` dir.
    pub fn make_installable_source(&self, version: &str) {
        let descriptor = serde_json::json!({
            "name": FIXTURE_PACKAGE,
            "version": version,
        });
        self.write_source("package.json", &descriptor.to_string());
        fs::create_dir_all(self.source().join("templates")).unwrap();
    }

    /// Assert the destination file `rel` exists with exactly `content`.
    ///
    /// # Panics
    /// Panics if the file is missing or differs.
    pub fn assert_destination(&self, rel: &str, content: &str) {
        let path = self.destination().join(rel);
        let actual = fs::read_to_string(&path)
            .unwrap_or_else(|_| panic!("Could not read file: {}", path.display()));
        assert_eq!(actual, content, "unexpected content in {}", path.display());
    }

    /// Assert the destination path `rel` does not exist.
    ///
    /// # Panics
    /// Panics if the path exists.
    pub fn assert_destination_missing(&self, rel: &str) {
        let path = self.destination().join(rel);
        assert!(!path.exists(), "Expected file NOT to exist: {}", path.display());
    }
}

fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Set the modification time of `path`.
///
/// # Panics
/// Panics if the file cannot be opened or updated.
pub fn set_mtime(path: &Path, time: SystemTime) {
    let file = fs::File::options()
        .write(true)
        .open(path)
        .unwrap_or_else(|e| panic!("set_mtime: failed to open {}: {e}", path.display()));
    file.set_modified(time)
        .unwrap_or_else(|e| panic!("set_mtime: failed to update {}: {e}", path.display()));
}

/// A fixed timestamp `days` days before now, for deterministic mtime setups.
pub fn days_ago(days: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(days * 24 * 3600)
}
