//! Bounded-concurrency directory traversal
//!
//! A producer task lists directories through a [`JoinSet`], each listing
//! holding one [`Semaphore`] permit, and streams entries to the consumer over
//! a bounded channel. The stream is finite and cannot be restarted; use
//! [`Traversal::collect_sorted`] when order matters.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::path::NormalizedPath;
use crate::{Error, Result};

/// Kind of a traversed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    Directory,
    /// A symlink that was not followed.
    Symlink,
    Other,
}

/// One entry yielded by a [`Traversal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraverseEntry {
    /// Root-relative, `/`-separated.
    pub path: NormalizedPath,
    pub full_path: PathBuf,
    pub entry_type: EntryType,
    pub name: String,
    pub is_symlink: bool,
}

impl TraverseEntry {
    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }
}

/// Predicate deciding whether an entry is yielded (and, for directories,
/// descended into).
pub type EntryFilter = Arc<dyn Fn(&TraverseEntry) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct TraverseOptions {
    pub recursive: bool,
    pub follow_symlinks: bool,
    pub filter: Option<EntryFilter>,
    pub include_directories: bool,
    /// Deepest entry level yielded; direct children of the root are level 1.
    pub max_depth: Option<usize>,
    /// Directory listings in flight at once.
    pub max_concurrency: usize,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_symlinks: false,
            filter: None,
            include_directories: false,
            max_depth: None,
            max_concurrency: 8,
        }
    }
}

impl std::fmt::Debug for TraverseOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraverseOptions")
            .field("recursive", &self.recursive)
            .field("follow_symlinks", &self.follow_symlinks)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("include_directories", &self.include_directories)
            .field("max_depth", &self.max_depth)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

impl TraverseOptions {
    pub fn with_filter(mut self, filter: impl Fn(&TraverseEntry) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    fn accepts(&self, entry: &TraverseEntry) -> bool {
        self.filter.as_ref().is_none_or(|f| f(entry))
    }

    fn descends_below(&self, depth: usize) -> bool {
        self.recursive && self.max_depth.is_none_or(|max| depth < max)
    }
}

/// Lazy stream of [`TraverseEntry`] values.
///
/// Dropping it stops the producer and any outstanding directory reads.
pub struct Traversal {
    rx: mpsc::Receiver<Result<TraverseEntry>>,
    producer: JoinHandle<()>,
}

impl Traversal {
    /// Next entry, an error that ended the traversal, or `None` when done.
    pub async fn next(&mut self) -> Option<Result<TraverseEntry>> {
        self.rx.recv().await
    }

    /// Drain the traversal and sort by relative path.
    ///
    /// The first error aborts the collection.
    pub async fn collect_sorted(mut self) -> Result<Vec<TraverseEntry>> {
        let mut entries = Vec::new();
        while let Some(item) = self.next().await {
            entries.push(item?);
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

impl Drop for Traversal {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

/// Start traversing `root`. Must be called from within a tokio runtime.
pub fn traverse(root: &Path, options: TraverseOptions) -> Traversal {
    traverse_with(root, options, |dir: PathBuf, rel: NormalizedPath, follow_symlinks| async move {
        list_dir(&dir, &rel, follow_symlinks).await
    })
}

fn traverse_with<L, F>(root: &Path, options: TraverseOptions, lister: L) -> Traversal
where
    L: Fn(PathBuf, NormalizedPath, bool) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = Result<Vec<Listed>>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(256);
    let producer = tokio::spawn(produce(root.to_path_buf(), options, lister, tx));
    Traversal { rx, producer }
}

struct Listed {
    entry: TraverseEntry,
    canonical: Option<PathBuf>,
}

struct Listing {
    dir: PathBuf,
    depth: usize,
    result: Result<Vec<Listed>>,
}

async fn produce<L, F>(
    root: PathBuf,
    options: TraverseOptions,
    lister: L,
    tx: mpsc::Sender<Result<TraverseEntry>>,
) where
    L: Fn(PathBuf, NormalizedPath, bool) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = Result<Vec<Listed>>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
    let mut visited: HashSet<PathBuf> = HashSet::new();
    if options.follow_symlinks
        && let Ok(canonical) = dunce::canonicalize(&root)
    {
        visited.insert(canonical);
    }

    let mut listings = JoinSet::new();
    spawn_listing(
        &mut listings,
        &semaphore,
        &lister,
        root.clone(),
        NormalizedPath::new(""),
        0,
        options.follow_symlinks,
    );

    while let Some(joined) = listings.join_next().await {
        let listing = match joined {
            Ok(listing) => listing,
            Err(e) => {
                let _ = tx
                    .send(Err(Error::Traversal {
                        path: root.clone(),
                        message: e.to_string(),
                    }))
                    .await;
                return;
            }
        };

        let children = match listing.result {
            Ok(children) => children,
            Err(e) => {
                tracing::debug!(dir = %listing.dir.display(), error = %e, "Directory listing failed");
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        let depth = listing.depth + 1;
        for Listed { entry, canonical } in children {
            if !options.accepts(&entry) {
                continue;
            }

            if entry.is_dir() {
                if options.descends_below(depth) {
                    let fresh = match canonical {
                        Some(canonical) => visited.insert(canonical),
                        None => true,
                    };
                    if fresh {
                        spawn_listing(
                            &mut listings,
                            &semaphore,
                            &lister,
                            entry.full_path.clone(),
                            entry.path.clone(),
                            depth,
                            options.follow_symlinks,
                        );
                    } else {
                        tracing::warn!(path = %entry.full_path.display(), "Skipping symlink cycle");
                    }
                }
                if !options.include_directories {
                    continue;
                }
            }

            if tx.send(Ok(entry)).await.is_err() {
                return;
            }
        }
    }
}

fn spawn_listing<L, F>(
    listings: &mut JoinSet<Listing>,
    semaphore: &Arc<Semaphore>,
    lister: &L,
    dir: PathBuf,
    rel: NormalizedPath,
    depth: usize,
    follow_symlinks: bool,
) where
    L: Fn(PathBuf, NormalizedPath, bool) -> F + Clone + Send + Sync + 'static,
    F: Future<Output = Result<Vec<Listed>>> + Send + 'static,
{
    let semaphore = Arc::clone(semaphore);
    let lister = lister.clone();
    listings.spawn(async move {
        let result = match semaphore.acquire_owned().await {
            Ok(_permit) => lister(dir.clone(), rel, follow_symlinks).await,
            Err(e) => Err(Error::Traversal {
                path: dir.clone(),
                message: e.to_string(),
            }),
        };
        Listing { dir, depth, result }
    });
}

async fn list_dir(dir: &Path, rel: &NormalizedPath, follow_symlinks: bool) -> Result<Vec<Listed>> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io(dir, e))?;
    let mut out = Vec::new();

    while let Some(dirent) = reader.next_entry().await.map_err(|e| Error::io(dir, e))? {
        let name = dirent.file_name().to_string_lossy().into_owned();
        let full_path = dirent.path();
        let file_type = dirent
            .file_type()
            .await
            .map_err(|e| Error::io(&full_path, e))?;
        let is_symlink = file_type.is_symlink();

        let entry_type = if is_symlink {
            match tokio::fs::metadata(&full_path).await {
                Ok(_) if !follow_symlinks => EntryType::Symlink,
                Ok(target) if target.is_dir() => EntryType::Directory,
                Ok(target) if target.is_file() => EntryType::File,
                Ok(_) => EntryType::Other,
                Err(e) => {
                    tracing::warn!(path = %full_path.display(), error = %e, "Skipping broken symlink");
                    continue;
                }
            }
        } else if file_type.is_dir() {
            EntryType::Directory
        } else if file_type.is_file() {
            EntryType::File
        } else {
            EntryType::Other
        };

        let canonical = if follow_symlinks && entry_type == EntryType::Directory {
            dunce::canonicalize(&full_path).ok()
        } else {
            None
        };

        out.push(Listed {
            entry: TraverseEntry {
                path: rel.join(&name),
                full_path,
                entry_type,
                name,
                is_symlink,
            },
            canonical,
        });
    }
    Ok(out)
}
