//! Atomic write, copy and removal primitives

use std::fs::{self, FileTimes, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;

use crate::{Error, Result};

/// Tuning for [`write_atomic`].
#[derive(Debug, Clone, Copy)]
pub struct RobustnessConfig {
    /// How long a failing rename is retried before giving up. Renames onto a
    /// file held open by another process fail transiently on some platforms.
    pub rename_timeout: Duration,
    /// Flush the temp file to disk before renaming it into place.
    pub enable_fsync: bool,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            rename_timeout: Duration::from_secs(2),
            enable_fsync: true,
        }
    }
}

/// Options for [`copy_atomic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Replace an existing destination file.
    pub overwrite: bool,
    /// Carry the source access/modification times over to the copy.
    pub preserve_timestamps: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            preserve_timestamps: true,
        }
    }
}

/// Randomized hidden sibling of `path` used as a staging file.
///
/// Living in the same directory keeps the final rename on one filesystem.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{}.{}.tmp",
        name,
        uuid::Uuid::new_v4().simple()
    ))
}

/// Write content atomically to a file.
///
/// Writes a temp sibling, optionally fsyncs it, then renames it over `path`.
/// Transient rename failures are retried with exponential backoff until
/// `config.rename_timeout` elapses.
pub fn write_atomic(path: &Path, content: &[u8], config: RobustnessConfig) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let temp_path = temp_sibling(path);
    let written = (|| -> Result<()> {
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| Error::io(&temp_path, e))?;
        temp_file
            .write_all(content)
            .map_err(|e| Error::io(&temp_path, e))?;
        if config.enable_fsync {
            temp_file
                .sync_all()
                .map_err(|e| Error::io(&temp_path, e))?;
        }
        Ok(())
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(10))
        .with_max_interval(Duration::from_millis(250))
        .with_max_elapsed_time(Some(config.rename_timeout))
        .build();

    let renamed = backoff::retry(policy, || {
        fs::rename(&temp_path, path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied | ErrorKind::ResourceBusy | ErrorKind::Interrupted => {
                backoff::Error::transient(e)
            }
            _ => backoff::Error::Permanent(e),
        })
    });

    match renamed {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(&temp_path);
            let source = match err {
                backoff::Error::Permanent(e) => e,
                backoff::Error::Transient { err, .. } => err,
            };
            Err(Error::io(path, source))
        }
    }
}

/// Read a UTF-8 file.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Copy `src` to `dst` through a randomized temp sibling and an atomic rename.
///
/// On any failure the temp file is removed and the original error returned;
/// `dst` is never left half-written. Returns the number of bytes copied.
pub async fn copy_atomic(src: &Path, dst: &Path, options: CopyOptions) -> Result<u64> {
    if !options.overwrite && tokio::fs::try_exists(dst).await.unwrap_or(false) {
        return Err(Error::AlreadyExists {
            path: dst.to_path_buf(),
        });
    }

    if let Some(parent) = dst.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }

    let temp = temp_sibling(dst);
    let result = async {
        let bytes = tokio::fs::copy(src, &temp)
            .await
            .map_err(|e| Error::io(src, e))?;
        if options.preserve_timestamps {
            copy_timestamps(src, &temp).await?;
        }
        tokio::fs::rename(&temp, dst)
            .await
            .map_err(|e| Error::io(dst, e))?;
        Ok::<u64, Error>(bytes)
    }
    .await;

    if result.is_err()
        && let Err(e) = tokio::fs::remove_file(&temp).await
        && e.kind() != ErrorKind::NotFound
    {
        tracing::warn!(temp = %temp.display(), error = %e, "Failed to clean up temp file");
    }
    result
}

async fn copy_timestamps(src: &Path, dst: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(src)
        .await
        .map_err(|e| Error::io(src, e))?;
    let modified = meta.modified().map_err(|e| Error::io(src, e))?;
    let mut times = FileTimes::new().set_modified(modified);
    if let Ok(accessed) = meta.accessed() {
        times = times.set_accessed(accessed);
    }

    let target = dst.to_path_buf();
    tokio::task::spawn_blocking(move || {
        // Read-only copies (permissions come across with the content) cannot
        // be opened for writing; the owner may still set times via a read fd.
        let file = OpenOptions::new()
            .write(true)
            .open(&target)
            .or_else(|_| fs::File::open(&target))?;
        file.set_times(times)
    })
    .await
    .map_err(|e| Error::io(dst, std::io::Error::other(e)))?
    .map_err(|e| Error::io(dst, e))
}

/// Delete a file, treating "does not exist" as success.
///
/// Returns `true` when a file was actually removed.
pub async fn remove_tolerant(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_sibling_is_hidden_and_unique() {
        let target = Path::new("/tmp/dest/config.yaml");
        let a = temp_sibling(target);
        let b = temp_sibling(target);
        assert_ne!(a, b);
        assert_eq!(a.parent(), target.parent());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".config.yaml."));
        assert!(name.ends_with(".tmp"));
    }
}
