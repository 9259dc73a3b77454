//! Per-path discovery and event intake.
//!
//! All mutation of watch state flows through one intake loop: backend
//! listeners, directory re-reads, and the public `add`/`unwatch` surface
//! enqueue [`IntakeMsg`] values, and [`EventHandler::run`] processes them
//! sequentially. Keeping the state machine single-threaded removes every
//! ordering race between a directory read and the events it triggers; the
//! pools' callback threads only ever send messages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use vg_core::{FileKind, FxHashMap, FxHashSet, PathStats, WatchOptions};
use vg_walker::{EntryType, WalkEntry, Walker};

use crate::dir_table::DirTable;
use crate::error::WatchError;
use crate::events::{EventKind, WatchEvent};
use crate::matcher::MatcherSet;
use crate::poll::{PollListener, PollPool, RawPollListener};
use crate::pool::{Closer, ErrorListener, EventListener, FsWatchPool, RawListener};
use crate::throttle::{ThrottleKind, ThrottleRegistry};

/// File extensions polled at `binary_interval_ms` instead of `interval_ms`.
const BINARY_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "ico", "webp", "mp3", "mp4", "mkv", "avi", "mov", "zip",
    "gz", "tar", "bz2", "xz", "7z", "rar", "pdf", "exe", "dll", "so", "dylib", "bin", "class",
    "o", "a", "wasm", "woff", "woff2", "ttf", "eot",
];

fn is_binary(path: &Utf8Path) -> bool {
    path.extension()
        .is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Work items for the intake loop.
#[derive(Debug)]
pub(crate) enum IntakeMsg {
    /// Stat a path and start watching whatever it turns out to be.
    Discover {
        path: Utf8PathBuf,
        initial_add: bool,
        depth: u32,
        /// When retrying a missing leaf through its parent directory, the
        /// leaf's basename; directory reads then act on that child only.
        target: Option<String>,
    },
    /// A watched directory reported activity; re-read it.
    DirChanged {
        dir: Utf8PathBuf,
        depth: u32,
        target: Option<String>,
    },
    /// A watched file reported activity.
    FileChanged {
        path: Utf8PathBuf,
        stats: Option<PathStats>,
    },
    /// Forget `item` under `directory`, cascading as needed.
    Remove {
        directory: Utf8PathBuf,
        item: String,
    },
    /// Stop the intake loop.
    Shutdown,
}

/// An `add`/`change` held back while its file is still being written.
pub(crate) struct PendingWrite {
    pub(crate) kind: EventKind,
    pub(crate) cancel: CancellationToken,
}

/// State shared between the public watcher handle, the intake loop, and
/// every backend callback.
pub(crate) struct Shared {
    pub(crate) opts: WatchOptions,
    pub(crate) ignored: Option<MatcherSet>,
    /// Roots removed via `unwatch`; everything under them is ignored.
    pub(crate) unwatched: Mutex<FxHashSet<Utf8PathBuf>>,
    pub(crate) throttles: ThrottleRegistry,
    pub(crate) dir_table: DirTable,
    pub(crate) fs_pool: Arc<FsWatchPool>,
    pub(crate) poll_pool: Arc<PollPool>,
    pub(crate) closers: Mutex<FxHashMap<Utf8PathBuf, SmallVec<[Closer; 2]>>>,
    /// Last observed stats per watched file, for change suppression.
    pub(crate) file_states: Mutex<FxHashMap<Utf8PathBuf, PathStats>>,
    /// Resolved target per known symlink; doubles as the cycle guard.
    pub(crate) symlink_targets: Mutex<FxHashMap<Utf8PathBuf, Utf8PathBuf>>,
    pub(crate) pending_writes: Mutex<FxHashMap<Utf8PathBuf, PendingWrite>>,
    pub(crate) pending_unlinks: Mutex<FxHashMap<Utf8PathBuf, tokio::task::JoinHandle<()>>>,
    pub(crate) closed: CancellationToken,
    pub(crate) ready_expected: AtomicUsize,
    pub(crate) ready_done: AtomicUsize,
    pub(crate) ready_emitted: AtomicBool,
    pub(crate) event_tx: mpsc::UnboundedSender<WatchEvent>,
    pub(crate) intake_tx: mpsc::UnboundedSender<IntakeMsg>,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) fn enqueue(&self, msg: IntakeMsg) {
        let _ = self.intake_tx.send(msg);
    }

    /// Enqueues a discovery and counts it toward readiness.
    pub(crate) fn enqueue_discover(
        &self,
        path: Utf8PathBuf,
        initial_add: bool,
        depth: u32,
        target: Option<String>,
    ) {
        self.ready_expected.fetch_add(1, Ordering::AcqRel);
        self.enqueue(IntakeMsg::Discover {
            path,
            initial_add,
            depth,
            target,
        });
    }

    /// Marks one discovery complete; fires `ready` exactly once when the
    /// count catches up with everything enqueued.
    pub(crate) fn signal_ready_progress(&self) {
        let done = self.ready_done.fetch_add(1, Ordering::AcqRel) + 1;
        let expected = self.ready_expected.load(Ordering::Acquire);
        if done >= expected && !self.ready_emitted.swap(true, Ordering::AcqRel) {
            debug!("initial scan complete");
            let _ = self.event_tx.send(WatchEvent::Ready);
        }
    }

    pub(crate) fn closers_has(&self, path: &Utf8Path) -> bool {
        self.closers.lock().contains_key(path)
    }

    /// Runs and forgets every closer registered for `path`.
    pub(crate) fn close_path(&self, path: &Utf8Path) {
        let list = self.closers.lock().remove(path);
        if let Some(list) = list {
            for closer in list {
                closer();
            }
        }
    }

    /// Whether events for `path` are suppressed, either by the configured
    /// matchers or because an enclosing root was unwatched.
    pub(crate) fn is_ignored(&self, path: &str, stats: Option<&PathStats>) -> bool {
        {
            let unwatched = self.unwatched.lock();
            if unwatched
                .iter()
                .any(|root| path == root.as_str() || is_under(path, root.as_str()))
            {
                return true;
            }
        }
        let Some(set) = &self.ignored else {
            return false;
        };
        if set.matches(path, stats) {
            return true;
        }
        if let Some(cwd) = &self.opts.cwd {
            if let Some(rel) = vg_core::paths::relative_to(path, cwd.as_str()) {
                return set.matches(rel, stats);
            }
        }
        false
    }

    /// Cancels a held-back write event, reporting what kind it was.
    pub(crate) fn cancel_pending_write(&self, path: &Utf8Path) -> Option<EventKind> {
        let pending = self.pending_writes.lock().remove(path)?;
        pending.cancel.cancel();
        Some(pending.kind)
    }
}

pub(crate) fn is_under(path: &str, root: &str) -> bool {
    path.strip_prefix(root)
        .is_some_and(|rest| rest.starts_with('/'))
}

enum WatchRole {
    File,
    Dir { depth: u32, target: Option<String> },
}

/// The intake loop and its per-path handlers.
pub(crate) struct EventHandler {
    shared: Arc<Shared>,
}

impl EventHandler {
    /// Consumes intake messages until shutdown.
    pub(crate) async fn run(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<IntakeMsg>) {
        let handler = Self { shared };
        while let Some(msg) = rx.recv().await {
            if matches!(msg, IntakeMsg::Shutdown) {
                break;
            }
            handler.dispatch(msg).await;
        }
        debug!("event intake loop stopped");
    }

    async fn dispatch(&self, msg: IntakeMsg) {
        if self.shared.is_closed() {
            // Keep the ready accounting honest for discoveries that were
            // in flight when close raced in.
            if matches!(msg, IntakeMsg::Discover { .. }) {
                self.shared.signal_ready_progress();
            }
            return;
        }
        match msg {
            IntakeMsg::Discover {
                path,
                initial_add,
                depth,
                target,
            } => {
                self.handle_discover(&path, initial_add, depth, target).await;
                self.shared.signal_ready_progress();
            }
            IntakeMsg::DirChanged { dir, depth, target } => {
                if self.shared.dir_table.contains(&dir) {
                    self.read_dir_contents(&dir, false, depth, target.as_deref())
                        .await;
                }
            }
            IntakeMsg::FileChanged { path, stats } => {
                self.handle_file_changed(path, stats).await;
            }
            IntakeMsg::Remove { directory, item } => {
                self.handle_remove(directory, item).await;
            }
            IntakeMsg::Shutdown => {}
        }
    }

    /// Stats a path and routes it to the right handler.
    async fn handle_discover(
        &self,
        path: &Utf8Path,
        initial_add: bool,
        depth: u32,
        target: Option<String>,
    ) {
        let s = &self.shared;
        if s.is_ignored(path.as_str(), None) {
            return;
        }

        let meta = if s.opts.follow_symlinks {
            tokio::fs::metadata(path).await
        } else {
            tokio::fs::symlink_metadata(path).await
        };

        let stats = match meta {
            Ok(meta) => PathStats::from_metadata(&meta),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if target.is_some() {
                    // Already a retry; the parent watch will try again.
                    return;
                }
                match (path.parent(), path.file_name()) {
                    (Some(parent), Some(name)) if parent != path => {
                        trace!(path = %path, "missing path, watching parent for its arrival");
                        s.enqueue_discover(
                            parent.to_owned(),
                            initial_add,
                            depth,
                            Some(name.to_owned()),
                        );
                    }
                    _ => {
                        s.emit(WatchEvent::Error(WatchError::PathNotFound(
                            path.to_owned(),
                        )))
                        .await;
                    }
                }
                return;
            }
            Err(err) => {
                let werr = WatchError::io(path.to_owned(), err);
                if !werr.ignorable_permission(s.opts.ignore_permission_errors) {
                    s.emit(WatchEvent::Error(werr)).await;
                }
                return;
            }
        };

        if s.is_ignored(path.as_str(), Some(&stats)) {
            return;
        }

        match stats.kind {
            FileKind::Directory => {
                self.handle_dir(path, stats, initial_add, depth, target).await;
            }
            FileKind::Symlink => {
                self.handle_standalone_symlink(path, stats, initial_add).await;
            }
            FileKind::File | FileKind::Other => {
                self.handle_file(path, stats, initial_add).await;
            }
        }
    }

    async fn handle_dir(
        &self,
        dir: &Utf8Path,
        stats: PathStats,
        initial_add: bool,
        depth: u32,
        target: Option<String>,
    ) {
        let s = &self.shared;
        if let (Some(parent), Some(name)) = (dir.parent(), dir.file_name()) {
            s.dir_table.add_child(parent, name);
        }
        let tracked = s.dir_table.contains(dir);
        s.dir_table.ensure(dir);

        if !tracked && target.is_none() && !(initial_add && s.opts.ignore_initial) {
            s.emit(WatchEvent::AddDir {
                path: dir.to_owned(),
                stats: Some(stats),
            })
            .await;
        }

        if s.opts.depth.is_none_or(|limit| depth <= limit) {
            self.read_dir_contents(dir, initial_add, depth, target.as_deref())
                .await;
        }

        if !s.closers_has(dir) {
            self.watch_path(dir, &WatchRole::Dir { depth, target }, Some(stats));
        }
    }

    /// Reads a directory's immediate children and diffs them against the
    /// table: unseen children are discovered, vanished ones removed. Reads
    /// are throttled per directory; when duplicates were suppressed the
    /// read re-runs once so nothing reported during it is lost.
    async fn read_dir_contents(
        &self,
        dir: &Utf8Path,
        initial_add: bool,
        depth: u32,
        target: Option<&str>,
    ) {
        let s = &self.shared;
        let Some(throttler) = s.throttles.throttle(ThrottleKind::ReadDir, dir) else {
            return;
        };

        let previous: FxHashSet<String> = s.dir_table.children(dir).into_iter().collect();
        let mut current: FxHashSet<String> = FxHashSet::default();

        let walker = Walker::new(dir.to_owned())
            .entry_type(EntryType::All)
            .max_depth(0)
            .lstat(true)
            .always_stat(true);
        let mut stream = walker.stream();
        let mut aborted = false;

        while let Some(item) = stream.recv().await {
            if s.is_closed() {
                aborted = true;
                break;
            }
            let entry = match item {
                Ok(entry) => entry,
                Err(err) if err.is_benign() => continue,
                Err(err) => {
                    warn!(dir = %dir, error = %err, "directory read failed");
                    continue;
                }
            };

            current.insert(entry.basename.clone());

            if entry.kind == FileKind::Symlink
                && self
                    .handle_symlink_entry(&entry, dir, initial_add, &previous)
                    .await
            {
                continue;
            }

            let wanted = target.map_or_else(
                || !previous.contains(&entry.basename),
                |t| entry.basename == t,
            );
            if wanted {
                if s.is_ignored(entry.full_path.as_str(), entry.stats.as_ref()) {
                    continue;
                }
                s.enqueue_discover(entry.full_path.clone(), initial_add, depth + 1, None);
            }
        }

        if aborted {
            let _ = throttler.clear();
            return;
        }

        for name in previous.iter().filter(|name| !current.contains(*name)) {
            s.enqueue(IntakeMsg::Remove {
                directory: dir.to_owned(),
                item: name.clone(),
            });
        }

        if throttler.clear() {
            s.enqueue(IntakeMsg::DirChanged {
                dir: dir.to_owned(),
                depth,
                target: target.map(str::to_owned),
            });
        }
    }

    /// Handles a symlink found during a directory read. Returns `true`
    /// when the entry is fully dealt with and must not be discovered.
    async fn handle_symlink_entry(
        &self,
        entry: &WalkEntry,
        dir: &Utf8Path,
        initial_add: bool,
        previous: &FxHashSet<String>,
    ) -> bool {
        let s = &self.shared;
        let full = &entry.full_path;

        let resolved = match tokio::fs::canonicalize(full).await {
            Ok(raw) => match Utf8PathBuf::from_path_buf(raw) {
                Ok(p) => p,
                Err(raw) => {
                    warn!(path = %raw.display(), "skipping symlink with non-UTF-8 target");
                    return true;
                }
            },
            // Broken link: nothing to follow, nothing to watch.
            Err(_) => return true,
        };

        if !s.opts.follow_symlinks {
            // The link itself is the watched object; the parent watch
            // drives re-reads and this diff reports retargets.
            let known = previous.contains(&entry.basename);
            let recorded = s.symlink_targets.lock().get(full).cloned();
            if known {
                if recorded.as_ref() != Some(&resolved) {
                    s.symlink_targets.lock().insert(full.clone(), resolved);
                    s.emit(WatchEvent::Change {
                        path: full.clone(),
                        stats: entry.stats,
                    })
                    .await;
                }
            } else {
                s.dir_table.add_child(dir, &entry.basename);
                s.symlink_targets.lock().insert(full.clone(), resolved);
                if !(initial_add && s.opts.ignore_initial) {
                    s.emit(WatchEvent::Add {
                        path: full.clone(),
                        stats: entry.stats,
                    })
                    .await;
                }
            }
            return true;
        }

        // Following: refuse to descend through a link twice, or into a
        // target that encloses the directory being read.
        let mut links = s.symlink_targets.lock();
        if links.contains_key(full) {
            return true;
        }
        let cycle = dir.as_str() == resolved.as_str() || is_under(dir.as_str(), resolved.as_str());
        links.insert(full.clone(), resolved);
        if cycle {
            trace!(path = %full, "symlink loop detected, not following");
            return true;
        }
        false
    }

    async fn handle_file(&self, file: &Utf8Path, stats: PathStats, initial_add: bool) {
        let s = &self.shared;
        if s.closers_has(file) {
            s.file_states.lock().insert(file.to_owned(), stats);
            return;
        }
        if let (Some(parent), Some(name)) = (file.parent(), file.file_name()) {
            s.dir_table.add_child(parent, name);
        }
        s.file_states.lock().insert(file.to_owned(), stats);
        self.watch_path(file, &WatchRole::File, Some(stats));

        if !(initial_add && s.opts.ignore_initial) {
            // Zero-width window: collapses duplicate adds from a single
            // burst of backend events.
            if s.throttles.throttle(ThrottleKind::Add, file).is_none() {
                return;
            }
            s.emit(WatchEvent::Add {
                path: file.to_owned(),
                stats: Some(stats),
            })
            .await;
        }
    }

    /// A symlink watched in its own right (`follow_symlinks` off): watch
    /// the link, report retargets as changes.
    async fn handle_standalone_symlink(
        &self,
        link: &Utf8Path,
        stats: PathStats,
        initial_add: bool,
    ) {
        let s = &self.shared;
        if s.closers_has(link) {
            return;
        }
        let target = match tokio::fs::read_link(link).await {
            Ok(raw) => match Utf8PathBuf::from_path_buf(raw) {
                Ok(p) => p,
                Err(raw) => {
                    warn!(path = %raw.display(), "skipping symlink with non-UTF-8 target");
                    return;
                }
            },
            Err(err) => {
                trace!(path = %link, error = %err, "symlink vanished before watch");
                return;
            }
        };

        if let (Some(parent), Some(name)) = (link.parent(), link.file_name()) {
            s.dir_table.add_child(parent, name);
        }
        s.symlink_targets.lock().insert(link.to_owned(), target);
        s.file_states.lock().insert(link.to_owned(), stats);
        self.watch_path(link, &WatchRole::File, Some(stats));

        if !(initial_add && s.opts.ignore_initial) {
            s.emit(WatchEvent::Add {
                path: link.to_owned(),
                stats: Some(stats),
            })
            .await;
        }
    }

    async fn handle_file_changed(&self, path: Utf8PathBuf, stats: Option<PathStats>) {
        let s = &self.shared;

        // A link watched in no-follow mode changes when it points
        // somewhere new, not when its target's contents do.
        if !s.opts.follow_symlinks {
            let recorded = s.symlink_targets.lock().get(&path).cloned();
            if let Some(recorded) = recorded {
                self.handle_link_changed(&path, &recorded).await;
                return;
            }
        }

        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        let parent = parent.to_owned();
        let name = name.to_owned();
        if !s.dir_table.has_child(&parent, &name) {
            return;
        }

        let prev = s.file_states.lock().get(&path).copied();
        let mut curr = match stats {
            Some(st) => st,
            None => match tokio::fs::metadata(&path).await {
                Ok(meta) => PathStats::from_metadata(&meta),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    s.enqueue(IntakeMsg::Remove {
                        directory: parent,
                        item: name,
                    });
                    return;
                }
                Err(err) => {
                    let werr = WatchError::io(path, err);
                    if !werr.ignorable_permission(s.opts.ignore_permission_errors) {
                        s.emit(WatchEvent::Error(werr)).await;
                    }
                    return;
                }
            },
        };

        if curr.mtime_ms == 0 {
            // Deletion-in-progress sentinel: a fresh stat settles whether
            // the file is gone or was swapped back in.
            match tokio::fs::metadata(&path).await {
                Ok(meta) => curr = PathStats::from_metadata(&meta),
                Err(_) => {
                    s.enqueue(IntakeMsg::Remove {
                        directory: parent,
                        item: name,
                    });
                    return;
                }
            }
        }

        if cfg!(unix)
            && prev.is_some_and(|p| p.ino != 0 && curr.ino != 0 && p.ino != curr.ino)
        {
            // The path was re-created; the old handle tracks the old
            // inode, so move the watch to the new one.
            debug!(path = %path, "inode changed, re-subscribing");
            s.close_path(&path);
            self.watch_path(&path, &WatchRole::File, Some(curr));
        }

        let report = prev.is_none_or(|p| {
            curr.atime_ms == 0
                || curr.atime_ms <= curr.mtime_ms
                || curr.mtime_ms != p.mtime_ms
                || curr.size != p.size
        });
        s.file_states.lock().insert(path.clone(), curr);

        if report {
            s.emit(WatchEvent::Change {
                path,
                stats: Some(curr),
            })
            .await;
        } else {
            trace!(path = %path, "access-time-only change suppressed");
        }
    }

    async fn handle_link_changed(&self, link: &Utf8Path, recorded: &Utf8Path) {
        let s = &self.shared;
        match tokio::fs::read_link(link).await {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if let (Some(parent), Some(name)) = (link.parent(), link.file_name()) {
                    s.enqueue(IntakeMsg::Remove {
                        directory: parent.to_owned(),
                        item: name.to_owned(),
                    });
                }
            }
            Err(_) => {}
            Ok(raw) => {
                let Ok(target) = Utf8PathBuf::from_path_buf(raw) else {
                    return;
                };
                if target.as_path() != recorded {
                    s.symlink_targets
                        .lock()
                        .insert(link.to_owned(), target);
                    let stats = tokio::fs::symlink_metadata(link)
                        .await
                        .ok()
                        .map(|m| PathStats::from_metadata(&m));
                    s.emit(WatchEvent::Change {
                        path: link.to_owned(),
                        stats,
                    })
                    .await;
                }
            }
        }
    }

    /// Forgets `item` under `directory`: recurses into a tracked
    /// directory's children, closes watches, updates the table, and emits
    /// the unlink. When the parent directory itself turns out to be gone,
    /// its own removal is enqueued so `rm -r` drains every level.
    async fn handle_remove(&self, directory: Utf8PathBuf, item: String) {
        let s = &self.shared;
        let full = directory.join(&item);

        // Backends report the same removal several ways in quick
        // succession; first one wins.
        if s.throttles.throttle(ThrottleKind::Remove, &full).is_none() {
            return;
        }

        let was_tracked = s.dir_table.has_child(&directory, &item);
        let is_dir = s.dir_table.contains(&full);

        if is_dir {
            for child in s.dir_table.children(&full) {
                Box::pin(self.handle_remove(full.clone(), child)).await;
            }
            s.dir_table.remove(&full);
        }

        s.file_states.lock().remove(&full);
        s.symlink_targets.lock().remove(&full);
        s.close_path(&full);

        let cascade = s.dir_table.remove_child(&directory, &item).await;

        if was_tracked && !s.is_ignored(full.as_str(), None) {
            let event = if is_dir {
                WatchEvent::UnlinkDir { path: full }
            } else {
                WatchEvent::Unlink { path: full }
            };
            s.emit(event).await;
        }

        if cascade {
            if let (Some(parent), Some(name)) = (directory.parent(), directory.file_name()) {
                s.enqueue(IntakeMsg::Remove {
                    directory: parent.to_owned(),
                    item: name.to_owned(),
                });
            }
        }
    }

    /// Establishes the backend watch for one path and records its closer.
    /// `seed` is the freshest stat the caller holds; it becomes the polling
    /// baseline so changes landing before the first tick are not lost.
    fn watch_path(&self, path: &Utf8Path, role: &WatchRole, seed: Option<PathStats>) {
        let s = &self.shared;
        if s.is_closed() {
            return;
        }
        let path_owned = path.to_owned();
        let intake = s.intake_tx.clone();
        let events = s.event_tx.clone();
        let persistent = s.opts.persistent;

        let closer: Option<Closer> = if s.opts.use_polling {
            let interval = match role {
                WatchRole::File if is_binary(path) => s.opts.binary_interval_ms,
                _ => s.opts.interval_ms,
            };
            let listener: PollListener = match role {
                WatchRole::File => {
                    let watched = path_owned.clone();
                    Arc::new(move |_path, stats| {
                        let _ = intake.send(IntakeMsg::FileChanged {
                            path: watched.clone(),
                            stats: Some(*stats),
                        });
                    })
                }
                WatchRole::Dir { depth, target } => {
                    let dir = path_owned.clone();
                    let depth = *depth;
                    let target = target.clone();
                    Arc::new(move |_path, _stats| {
                        let _ = intake.send(IntakeMsg::DirChanged {
                            dir: dir.clone(),
                            depth,
                            target: target.clone(),
                        });
                    })
                }
            };
            let raw_path = path_owned.clone();
            let raw: RawPollListener = Arc::new(move |prev, curr| {
                let _ = events.send(WatchEvent::Raw {
                    path: raw_path.clone(),
                    details: format!("poll mtime {} -> {}", prev.mtime_ms, curr.mtime_ms),
                });
            });
            Some(s.poll_pool.subscribe(
                &path_owned,
                persistent,
                interval,
                seed,
                listener,
                Some(raw),
            ))
        } else {
            // Backends can report one action as a burst of identical
            // watch requests; open at most one handle per window.
            if s.throttles.throttle(ThrottleKind::Watch, path).is_none() {
                return;
            }
            let listener: EventListener = match role {
                WatchRole::File => {
                    let watched = path_owned.clone();
                    Arc::new(move |_event_path: &Utf8Path| {
                        let _ = intake.send(IntakeMsg::FileChanged {
                            path: watched.clone(),
                            stats: None,
                        });
                    })
                }
                WatchRole::Dir { depth, target } => {
                    let dir = path_owned.clone();
                    let depth = *depth;
                    let target = target.clone();
                    Arc::new(move |_event_path: &Utf8Path| {
                        let _ = intake.send(IntakeMsg::DirChanged {
                            dir: dir.clone(),
                            depth,
                            target: target.clone(),
                        });
                    })
                }
            };
            let err_path = path_owned.clone();
            let err_events = s.event_tx.clone();
            let ignore_perm = s.opts.ignore_permission_errors;
            let error: ErrorListener = Arc::new(move |err: &WatchError| {
                if err.ignorable_permission(ignore_perm) {
                    return;
                }
                let forwarded =
                    WatchError::io(err_path.clone(), std::io::Error::other(err.to_string()));
                let _ = err_events.send(WatchEvent::Error(forwarded));
            });
            let raw_events = s.event_tx.clone();
            let raw: RawListener = Arc::new(move |event_path: &Utf8Path, event| {
                let _ = raw_events.send(WatchEvent::Raw {
                    path: event_path.to_owned(),
                    details: format!("{:?}", event.kind),
                });
            });
            match s
                .fs_pool
                .subscribe(&path_owned, persistent, listener, error, Some(raw))
            {
                Ok(closer) => Some(closer),
                Err(err) if err.is_benign() => {
                    trace!(path = %path_owned, "path vanished before watch");
                    None
                }
                Err(err) => {
                    if !err.ignorable_permission(s.opts.ignore_permission_errors) {
                        let _ = s.event_tx.send(WatchEvent::Error(err));
                    }
                    None
                }
            }
        };

        if let Some(closer) = closer {
            s.closers
                .lock()
                .entry(path_owned)
                .or_default()
                .push(closer);
        }
    }
}
