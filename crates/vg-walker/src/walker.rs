//! Streaming directory traversal.
//!
//! [`Walker`] is a builder for a traversal; [`Walker::stream`] spawns the
//! listing task and hands back a [`WalkStream`] receiver. Entries are
//! produced lazily through a bounded channel, so a slow consumer applies
//! backpressure and a dropped consumer cancels the traversal.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use vg_core::{FileKind, PathStats};

use crate::error::WalkError;

/// Default channel capacity between the traversal task and the consumer.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Which entries a traversal yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryType {
    /// Regular files (and anything that is not a directory).
    #[default]
    Files,
    /// Directories only.
    Directories,
    /// Files and directories.
    FilesAndDirs,
    /// Everything, including symlinks when `lstat` is enabled.
    All,
}

/// A single listed entry.
///
/// `path` is relative to the traversal root; `full_path` is the root joined
/// with it. `stats` is present when `always_stat` is enabled.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Path relative to the traversal root.
    pub path: Utf8PathBuf,
    /// The root joined with `path`.
    pub full_path: Utf8PathBuf,
    /// Final path component.
    pub basename: String,
    /// What kind of object this entry is (symlink when `lstat` is on).
    pub kind: FileKind,
    /// Metadata snapshot, when `always_stat` is enabled.
    pub stats: Option<PathStats>,
}

/// Predicate applied to entries or directories during traversal.
pub type EntryFilter = Arc<dyn Fn(&WalkEntry) -> bool + Send + Sync>;

/// Builder for a directory traversal.
///
/// # Examples
///
/// ```no_run
/// use vg_walker::{EntryType, Walker};
/// use camino::Utf8Path;
///
/// let walker = Walker::new(Utf8Path::new("./src"))
///     .entry_type(EntryType::FilesAndDirs)
///     .max_depth(2)
///     .always_stat(true)
///     .lstat(true);
/// let _stream = walker.stream();
/// ```
pub struct Walker {
    root: Utf8PathBuf,
    file_filter: Option<EntryFilter>,
    dir_filter: Option<EntryFilter>,
    entry_type: EntryType,
    max_depth: u64,
    lstat: bool,
    always_stat: bool,
    capacity: usize,
}

impl std::fmt::Debug for Walker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walker")
            .field("root", &self.root)
            .field("entry_type", &self.entry_type)
            .field("max_depth", &self.max_depth)
            .field("lstat", &self.lstat)
            .field("always_stat", &self.always_stat)
            .finish_non_exhaustive()
    }
}

impl Walker {
    /// Creates a traversal rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_filter: None,
            dir_filter: None,
            entry_type: EntryType::default(),
            max_depth: u64::MAX,
            lstat: false,
            always_stat: false,
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Filter applied to non-directory entries before they are yielded.
    #[must_use]
    pub fn file_filter(mut self, filter: EntryFilter) -> Self {
        self.file_filter = Some(filter);
        self
    }

    /// Filter applied to directories; a rejected directory is neither
    /// yielded nor descended into.
    #[must_use]
    pub fn dir_filter(mut self, filter: EntryFilter) -> Self {
        self.dir_filter = Some(filter);
        self
    }

    /// Which entry kinds to yield.
    #[must_use]
    pub const fn entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    /// Maximum recursion depth: `0` lists only the root's direct children.
    #[must_use]
    pub const fn max_depth(mut self, depth: u64) -> Self {
        self.max_depth = depth;
        self
    }

    /// Use symlink-friendly stats (do not follow links when stat'ing).
    #[must_use]
    pub const fn lstat(mut self, lstat: bool) -> Self {
        self.lstat = lstat;
        self
    }

    /// Attach a [`PathStats`] snapshot to every yielded entry.
    #[must_use]
    pub const fn always_stat(mut self, always_stat: bool) -> Self {
        self.always_stat = always_stat;
        self
    }

    /// Capacity of the entry channel.
    #[must_use]
    pub const fn channel_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Spawns the traversal task and returns the entry stream.
    ///
    /// Each call starts a fresh traversal; the walker itself is reusable.
    #[must_use]
    pub fn stream(&self) -> WalkStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let task = TraversalTask {
            root: self.root.clone(),
            file_filter: self.file_filter.clone(),
            dir_filter: self.dir_filter.clone(),
            entry_type: self.entry_type,
            max_depth: self.max_depth,
            lstat: self.lstat,
            always_stat: self.always_stat,
            tx,
        };
        let handle = tokio::spawn(task.run());
        WalkStream { rx, handle }
    }
}

/// Receiving side of a traversal.
///
/// Dropping the stream (or calling [`WalkStream::destroy`]) cancels the
/// traversal task.
#[derive(Debug)]
pub struct WalkStream {
    rx: mpsc::Receiver<Result<WalkEntry, WalkError>>,
    handle: JoinHandle<()>,
}

impl WalkStream {
    /// Receives the next entry, or `None` when the listing is complete.
    pub async fn recv(&mut self) -> Option<Result<WalkEntry, WalkError>> {
        self.rx.recv().await
    }

    /// Cancels the traversal mid-stream.
    pub fn destroy(&mut self) {
        self.handle.abort();
        self.rx.close();
    }
}

impl Drop for WalkStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct TraversalTask {
    root: Utf8PathBuf,
    file_filter: Option<EntryFilter>,
    dir_filter: Option<EntryFilter>,
    entry_type: EntryType,
    max_depth: u64,
    lstat: bool,
    always_stat: bool,
    tx: mpsc::Sender<Result<WalkEntry, WalkError>>,
}

struct Frame {
    full: Utf8PathBuf,
    rel: Utf8PathBuf,
    depth: u64,
    /// Canonical paths of every ancestor directory, for symlink loop checks.
    ancestors: Arc<Vec<Utf8PathBuf>>,
}

impl TraversalTask {
    async fn run(self) {
        let root_ancestors = Arc::new(Vec::new());
        let mut stack = vec![Frame {
            full: self.root.clone(),
            rel: Utf8PathBuf::new(),
            depth: 0,
            ancestors: root_ancestors,
        }];

        while let Some(frame) = stack.pop() {
            if !self.list_dir(&frame, &mut stack).await {
                return;
            }
        }
    }

    /// Lists one directory. Returns `false` when the consumer went away.
    async fn list_dir(&self, frame: &Frame, stack: &mut Vec<Frame>) -> bool {
        let mut reader = match tokio::fs::read_dir(&frame.full).await {
            Ok(reader) => reader,
            Err(err) => {
                return self
                    .tx
                    .send(Err(WalkError::io(frame.full.clone(), err)))
                    .await
                    .is_ok();
            }
        };

        loop {
            let dirent = match reader.next_entry().await {
                Ok(Some(dirent)) => dirent,
                Ok(None) => return true,
                Err(err) => {
                    return self
                        .tx
                        .send(Err(WalkError::io(frame.full.clone(), err)))
                        .await
                        .is_ok();
                }
            };

            let Some(basename) = dirent.file_name().to_str().map(str::to_owned) else {
                warn!(path = %dirent.path().display(), "skipping non-UTF-8 entry");
                if self
                    .tx
                    .send(Err(WalkError::NonUtf8Path(dirent.path())))
                    .await
                    .is_err()
                {
                    return false;
                }
                continue;
            };

            let full_path = frame.full.join(&basename);
            let rel_path = if frame.rel.as_str().is_empty() {
                Utf8PathBuf::from(&basename)
            } else {
                frame.rel.join(&basename)
            };

            let (kind, stats) = match self.classify(&full_path, &dirent).await {
                Ok(classified) => classified,
                Err(err) => {
                    trace!(path = %full_path, error = %err, "entry vanished during listing");
                    if self.tx.send(Err(err)).await.is_err() {
                        return false;
                    }
                    continue;
                }
            };

            let entry = WalkEntry {
                path: rel_path,
                full_path,
                basename,
                kind,
                stats,
            };

            if entry.kind == FileKind::Directory {
                if !self.passes(&self.dir_filter, &entry) {
                    continue;
                }
                if self.wants_dirs() && !self.emit(entry.clone()).await {
                    return false;
                }
                if frame.depth < self.max_depth && !self.push_subdir(frame, entry, stack).await {
                    return false;
                }
            } else {
                if !self.passes(&self.file_filter, &entry) {
                    continue;
                }
                if self.wants_entry(entry.kind) && !self.emit(entry).await {
                    return false;
                }
            }
        }
    }

    async fn classify(
        &self,
        full_path: &Utf8Path,
        dirent: &tokio::fs::DirEntry,
    ) -> Result<(FileKind, Option<PathStats>), WalkError> {
        if self.always_stat {
            let meta = if self.lstat {
                tokio::fs::symlink_metadata(full_path).await
            } else {
                tokio::fs::metadata(full_path).await
            }
            .map_err(|err| WalkError::io(full_path.to_owned(), err))?;
            let stats = PathStats::from_metadata(&meta);
            return Ok((stats.kind, Some(stats)));
        }

        let file_type = dirent
            .file_type()
            .await
            .map_err(|err| WalkError::io(full_path.to_owned(), err))?;
        let kind = if file_type.is_symlink() {
            if self.lstat {
                FileKind::Symlink
            } else {
                // Following mode: resolve the link to classify the target.
                match tokio::fs::metadata(full_path).await {
                    Ok(meta) => PathStats::from_metadata(&meta).kind,
                    Err(_) => FileKind::Symlink, // broken link
                }
            }
        } else if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };
        Ok((kind, None))
    }

    /// Queues a subdirectory for listing, guarding against symlink loops
    /// when links are being followed.
    async fn push_subdir(&self, frame: &Frame, entry: WalkEntry, stack: &mut Vec<Frame>) -> bool {
        let mut ancestors = frame.ancestors.as_ref().clone();

        if !self.lstat {
            match tokio::fs::canonicalize(&entry.full_path).await {
                Ok(canon) => match Utf8PathBuf::from_path_buf(canon) {
                    Ok(canon) => {
                        if ancestors.iter().any(|seen| *seen == canon) {
                            return self
                                .tx
                                .send(Err(WalkError::CircularSymlink(entry.full_path)))
                                .await
                                .is_ok();
                        }
                        ancestors.push(canon);
                    }
                    Err(raw) => {
                        return self.tx.send(Err(WalkError::NonUtf8Path(raw))).await.is_ok();
                    }
                },
                Err(err) => {
                    return self
                        .tx
                        .send(Err(WalkError::io(entry.full_path, err)))
                        .await
                        .is_ok();
                }
            }
        }

        stack.push(Frame {
            full: entry.full_path,
            rel: entry.path,
            depth: frame.depth + 1,
            ancestors: Arc::new(ancestors),
        });
        true
    }

    fn passes(&self, filter: &Option<EntryFilter>, entry: &WalkEntry) -> bool {
        filter.as_ref().is_none_or(|f| f(entry))
    }

    const fn wants_dirs(&self) -> bool {
        matches!(
            self.entry_type,
            EntryType::Directories | EntryType::FilesAndDirs | EntryType::All
        )
    }

    const fn wants_entry(&self, kind: FileKind) -> bool {
        match self.entry_type {
            EntryType::Directories => false,
            EntryType::All => true,
            // Symlinks and specials count as "files" for listing purposes.
            EntryType::Files | EntryType::FilesAndDirs => !matches!(kind, FileKind::Directory),
        }
    }

    async fn emit(&self, entry: WalkEntry) -> bool {
        self.tx.send(Ok(entry)).await.is_ok()
    }
}
