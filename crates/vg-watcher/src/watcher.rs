//! The public watcher handle and the event emission pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ Backend callbacks (notify threads / poll tasks)                │
//! │        │ IntakeMsg                                             │
//! │        ▼                                                       │
//! │ Intake loop (handler) ── discover / re-read / remove           │
//! │        │ emit()                                                │
//! │        ▼                                                       │
//! │ Emission pipeline:                                             │
//! │   editor artifacts → atomic unlink+add debounce →              │
//! │   write-finish stabilization → change dedupe →                 │
//! │   always_stat backfill → cwd-relative paths                    │
//! │        │                                                       │
//! │        ▼                                                       │
//! │ mpsc::UnboundedReceiver<WatchEvent>  →  consumer               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use vg_watcher::{FsWatcher, WatchEvent, WatchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vg_watcher::WatchError> {
//!     let mut watcher = FsWatcher::watch(["./src"], WatchOptions::default())?;
//!
//!     while let Some(event) = watcher.recv().await {
//!         match event {
//!             WatchEvent::Ready => println!("initial scan done"),
//!             WatchEvent::Change { path, .. } => println!("changed: {path}"),
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use vg_core::paths::{absolute, is_absolute, normalize_path, relative_to};
use vg_core::{FxHashMap, FxHashSet, PathStats, WatchOptions, WriteFinishOptions};

use crate::dir_table::DirTable;
use crate::error::WatchError;
use crate::events::{EventKind, WatchEvent};
use crate::handler::{EventHandler, IntakeMsg, PendingWrite, Shared, is_under};
use crate::matcher::{Matcher, MatcherSet};
use crate::poll::PollPool;
use crate::pool::FsWatchPool;
use crate::throttle::{ThrottleKind, ThrottleRegistry};

/// Transient files editors leave next to the real one while saving.
static EDITOR_ARTIFACTS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\..*\.(sw[px])$|~$|\.subl.*\.tmp").expect("editor artifact pattern is valid")
});

fn is_editor_artifact(path: &str) -> bool {
    EDITOR_ARTIFACTS.is_match(path)
}

impl Shared {
    /// Entry point of the emission pipeline.
    pub(crate) async fn emit(self: &Arc<Self>, event: WatchEvent) {
        if self.is_closed() {
            return;
        }

        let atomic_delay = self.opts.atomic_delay_ms();
        if atomic_delay.is_some()
            && matches!(
                event.kind(),
                EventKind::Add | EventKind::Change | EventKind::Unlink
            )
            && event.path().is_some_and(|p| is_editor_artifact(p.as_str()))
        {
            trace!(path = ?event.path(), "ignoring editor save artifact");
            return;
        }

        let event = if let Some(delay) = atomic_delay {
            match event {
                WatchEvent::Unlink { path } => {
                    self.debounce_unlink(path, delay);
                    return;
                }
                WatchEvent::Add { path, stats } if self.cancel_pending_unlink(&path) => {
                    // Delete-then-recreate inside the window is how many
                    // editors save; report it as one change.
                    WatchEvent::Change { path, stats }
                }
                other => other,
            }
        } else {
            event
        };

        self.emit_after_atomic(event).await;
    }

    /// Holds an unlink for the atomic window before letting it through.
    fn debounce_unlink(self: &Arc<Self>, path: Utf8PathBuf, delay_ms: u64) {
        let mut pending = self.pending_unlinks.lock();
        if pending.contains_key(&path) {
            return;
        }
        let shared = Arc::clone(self);
        let key = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if shared.pending_unlinks.lock().remove(&key).is_some() {
                shared.emit_after_atomic(WatchEvent::Unlink { path: key }).await;
            }
        });
        pending.insert(path, handle);
    }

    fn cancel_pending_unlink(&self, path: &Utf8Path) -> bool {
        match self.pending_unlinks.lock().remove(path) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Pipeline stages after atomic handling.
    pub(crate) async fn emit_after_atomic(self: &Arc<Self>, event: WatchEvent) {
        if let Some(awf) = self.opts.await_write_finish {
            match &event {
                WatchEvent::Add { path, .. } | WatchEvent::Change { path, .. } => {
                    self.hold_for_write_finish(path.clone(), event.kind(), awf);
                    return;
                }
                WatchEvent::Unlink { path } => {
                    // A file deleted before its add stabilized was never
                    // announced; its unlink stays silent too.
                    if self.cancel_pending_write(path) == Some(EventKind::Add) {
                        return;
                    }
                }
                _ => {}
            }
        }
        self.emit_final(event).await;
    }

    /// Delays an `add`/`change` until the file's size has stopped moving.
    /// Further events for the path are absorbed while it waits; the event
    /// eventually emitted keeps the original kind.
    fn hold_for_write_finish(
        self: &Arc<Self>,
        path: Utf8PathBuf,
        kind: EventKind,
        awf: WriteFinishOptions,
    ) {
        {
            let mut pending = self.pending_writes.lock();
            if pending.contains_key(&path) {
                return;
            }
            let cancel = self.closed.child_token();
            pending.insert(
                path.clone(),
                PendingWrite {
                    kind,
                    cancel: cancel.clone(),
                },
            );
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let cancel = {
                let pending = shared.pending_writes.lock();
                match pending.get(&path) {
                    Some(pw) => pw.cancel.clone(),
                    None => return,
                }
            };
            let poll = Duration::from_millis(awf.poll_interval_ms.max(1));
            let threshold = Duration::from_millis(awf.stability_threshold_ms);
            let mut last_size: Option<u64> = None;
            let mut stable_since = Instant::now();

            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(poll) => {}
                }
                match tokio::fs::metadata(&path).await {
                    Err(_) => {
                        shared.pending_writes.lock().remove(&path);
                        return;
                    }
                    Ok(meta) => {
                        let size = meta.len();
                        if last_size == Some(size) {
                            if stable_since.elapsed() >= threshold {
                                shared.pending_writes.lock().remove(&path);
                                let stats = Some(PathStats::from_metadata(&meta));
                                let event = if kind == EventKind::Add {
                                    WatchEvent::Add {
                                        path: path.clone(),
                                        stats,
                                    }
                                } else {
                                    WatchEvent::Change {
                                        path: path.clone(),
                                        stats,
                                    }
                                };
                                shared.emit_final(event).await;
                                return;
                            }
                        } else {
                            last_size = Some(size);
                            stable_since = Instant::now();
                        }
                    }
                }
            }
        });
    }

    /// Final stages: change dedupe, stats backfill, cwd-relative paths.
    pub(crate) async fn emit_final(self: &Arc<Self>, mut event: WatchEvent) {
        if self.is_closed() {
            return;
        }

        if let WatchEvent::Change { path, .. } = &event {
            if self.throttles.throttle(ThrottleKind::Change, path).is_none() {
                trace!(path = %path, "change collapsed into the previous one");
                return;
            }
        }

        if self.opts.always_stat {
            if let WatchEvent::Add { path, stats }
            | WatchEvent::AddDir { path, stats }
            | WatchEvent::Change { path, stats } = &mut event
            {
                if stats.is_none() {
                    if let Ok(meta) = tokio::fs::metadata(path.as_std_path()).await {
                        *stats = Some(PathStats::from_metadata(&meta));
                    }
                }
            }
        }

        if let Some(cwd) = &self.opts.cwd {
            relativize(&mut event, cwd);
        }

        let _ = self.event_tx.send(event);
    }
}

/// Builds the shared state and spawns the intake loop.
fn spawn_engine(
    options: WatchOptions,
    ignored: Option<MatcherSet>,
) -> (
    Arc<Shared>,
    mpsc::UnboundedReceiver<WatchEvent>,
    JoinHandle<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (intake_tx, intake_rx) = mpsc::unbounded_channel();

    let shared = Arc::new(Shared {
        opts: options,
        ignored,
        unwatched: Mutex::new(FxHashSet::default()),
        throttles: ThrottleRegistry::new(),
        dir_table: DirTable::new(),
        fs_pool: Arc::new(FsWatchPool::new()),
        poll_pool: Arc::new(PollPool::new()),
        closers: Mutex::new(FxHashMap::default()),
        file_states: Mutex::new(FxHashMap::default()),
        symlink_targets: Mutex::new(FxHashMap::default()),
        pending_writes: Mutex::new(FxHashMap::default()),
        pending_unlinks: Mutex::new(FxHashMap::default()),
        closed: CancellationToken::new(),
        ready_expected: AtomicUsize::new(0),
        ready_done: AtomicUsize::new(0),
        ready_emitted: AtomicBool::new(false),
        event_tx,
        intake_tx,
    });

    let driver = tokio::spawn(EventHandler::run(Arc::clone(&shared), intake_rx));
    (shared, event_rx, driver)
}

fn relativize(event: &mut WatchEvent, cwd: &Utf8Path) {
    let path = match event {
        WatchEvent::Add { path, .. }
        | WatchEvent::AddDir { path, .. }
        | WatchEvent::Change { path, .. }
        | WatchEvent::Unlink { path }
        | WatchEvent::UnlinkDir { path }
        | WatchEvent::Raw { path, .. } => path,
        WatchEvent::Ready | WatchEvent::Error(_) => return,
    };
    if let Some(rel) = relative_to(path.as_str(), cwd.as_str()) {
        *path = Utf8PathBuf::from(rel);
    }
}

/// A filesystem watcher.
///
/// Construct one with [`FsWatcher::new`] (or the [`FsWatcher::watch`]
/// convenience), feed it roots with [`FsWatcher::add`], and consume
/// [`WatchEvent`]s via [`FsWatcher::recv`]. After construction the watcher
/// never panics: failures surface as [`WatchEvent::Error`] items.
///
/// # Lifecycle
///
/// 1. **Creation** spawns the intake loop on the current tokio runtime.
/// 2. **`add`** enqueues discovery of each root; one [`WatchEvent::Ready`]
///    fires when every initial scan has completed.
/// 3. **`close`** is idempotent; afterwards the watcher is silent and
///    `recv` drains whatever was already queued, then returns `None`.
///    A later `add` re-opens the watcher with the same options.
///    Dropping the watcher tears everything down as well.
pub struct FsWatcher {
    shared: Arc<Shared>,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    driver: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for FsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatcher")
            .field("closed", &self.shared.is_closed())
            .field("use_polling", &self.shared.opts.use_polling)
            .finish_non_exhaustive()
    }
}

impl FsWatcher {
    /// Creates a watcher with no ignore matchers.
    ///
    /// Must be called within a tokio runtime. Environment overrides
    /// (`VIGIA_USE_POLLING`, `VIGIA_INTERVAL`) are applied on top of
    /// `options`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] when an environment override cannot
    /// be parsed.
    pub fn new(options: WatchOptions) -> Result<Self, WatchError> {
        Self::build(options, None)
    }

    /// Creates a watcher that suppresses events for matched paths.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] for an empty matcher list or an
    /// unparsable environment override.
    pub fn with_ignored(
        options: WatchOptions,
        ignored: Vec<Matcher>,
    ) -> Result<Self, WatchError> {
        Self::build(options, Some(MatcherSet::compile(ignored)?))
    }

    /// Creates a watcher and immediately adds `paths`.
    ///
    /// # Errors
    ///
    /// Same as [`FsWatcher::new`].
    pub fn watch<I, P>(paths: I, options: WatchOptions) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        let mut watcher = Self::new(options)?;
        watcher.add(paths);
        Ok(watcher)
    }

    fn build(mut options: WatchOptions, ignored: Option<MatcherSet>) -> Result<Self, WatchError> {
        options
            .apply_env_overrides()
            .map_err(|err| WatchError::config(err.to_string()))?;

        let (shared, event_rx, driver) = spawn_engine(options, ignored);
        info!(
            use_polling = shared.opts.use_polling,
            persistent = shared.opts.persistent,
            "watcher started"
        );

        Ok(Self {
            shared,
            event_rx,
            driver: Some(driver),
        })
    }

    /// Replaces the torn-down engine with a fresh one, keeping the
    /// configuration. Called when paths are added to a closed watcher.
    fn reopen(&mut self) {
        let options = self.shared.opts.clone();
        let ignored = self.shared.ignored.clone();
        let (shared, event_rx, driver) = spawn_engine(options, ignored);
        self.shared = shared;
        self.event_rx = event_rx;
        self.driver = Some(driver);
        info!("watcher re-opened");
    }

    /// Starts watching each path. Relative paths resolve against the
    /// configured `cwd`, falling back to the process working directory.
    ///
    /// Safe to call at any time; paths added after the initial scan are
    /// discovered the same way. Adding to a closed watcher re-opens it
    /// with the same options and a fresh initial scan.
    pub fn add<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        if self.shared.is_closed() {
            self.reopen();
        }
        for path in paths {
            match self.resolve(&path.into()) {
                Ok(abs) => {
                    // Re-adding a previously unwatched root revives it.
                    self.shared.unwatched.lock().remove(&abs);
                    self.shared.enqueue_discover(abs, true, 0, None);
                }
                Err(err) => {
                    let _ = self.shared.event_tx.send(WatchEvent::Error(err));
                }
            }
        }
    }

    /// Stops watching each path and everything beneath it. Siblings and
    /// other roots are unaffected.
    pub fn unwatch<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        if self.shared.is_closed() {
            return;
        }
        for path in paths {
            let Ok(root) = self.resolve(&path.into()) else {
                continue;
            };
            self.shared.unwatched.lock().insert(root.clone());

            let keys: Vec<Utf8PathBuf> = {
                let closers = self.shared.closers.lock();
                closers
                    .keys()
                    .filter(|k| **k == root || is_under(k.as_str(), root.as_str()))
                    .cloned()
                    .collect()
            };
            for key in keys {
                self.shared.close_path(&key);
            }

            for (dir, _) in self.shared.dir_table.snapshot() {
                if dir == root || is_under(dir.as_str(), root.as_str()) {
                    self.shared.dir_table.remove(&dir);
                }
            }
            if let (Some(parent), Some(name)) = (root.parent(), root.file_name()) {
                self.shared.dir_table.forget_child(parent, name);
            }

            self.shared
                .file_states
                .lock()
                .retain(|k, _| !(*k == root || is_under(k.as_str(), root.as_str())));
            self.shared
                .symlink_targets
                .lock()
                .retain(|k, _| !(*k == root || is_under(k.as_str(), root.as_str())));

            info!(path = %root, "unwatched");
        }
    }

    fn resolve(&self, path: &Utf8Path) -> Result<Utf8PathBuf, WatchError> {
        let normalized = normalize_path(path.as_str());
        if is_absolute(&normalized) {
            return Ok(Utf8PathBuf::from(normalized));
        }
        let base = match &self.shared.opts.cwd {
            Some(cwd) => cwd.clone(),
            None => {
                let cwd = std::env::current_dir()
                    .map_err(|err| WatchError::io(path.to_owned(), err))?;
                Utf8PathBuf::from_path_buf(cwd).map_err(WatchError::NonUtf8Path)?
            }
        };
        Ok(absolute(Utf8Path::new(&normalized), &base))
    }

    /// Receives the next event, or `None` once the watcher is closed and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }

    /// Receives an event without blocking.
    ///
    /// # Errors
    ///
    /// `TryRecvError::Empty` when nothing is queued,
    /// `TryRecvError::Disconnected` after close.
    pub fn try_recv(&mut self) -> Result<WatchEvent, mpsc::error::TryRecvError> {
        self.event_rx.try_recv()
    }

    /// Direct access to the event receiver, for `tokio::select!`.
    pub fn events(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }

    /// Every watched directory with its known children, sorted, with
    /// paths made cwd-relative when a `cwd` is configured.
    #[must_use]
    pub fn get_watched(&self) -> Vec<(Utf8PathBuf, Vec<String>)> {
        let mut snapshot = self.shared.dir_table.snapshot();
        if let Some(cwd) = &self.shared.opts.cwd {
            for (path, _) in &mut snapshot {
                if let Some(rel) = relative_to(path.as_str(), cwd.as_str()) {
                    *path = Utf8PathBuf::from(rel);
                }
            }
        }
        snapshot
    }

    /// Whether [`FsWatcher::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Shuts the watcher down: stops the intake loop, cancels held-back
    /// events, closes every OS handle and polling task, and drops all
    /// bookkeeping. Idempotent; events already queued can still be drained
    /// from `recv`.
    pub async fn close(&mut self) {
        if self.shared.is_closed() {
            return;
        }
        self.shared.closed.cancel();
        self.shared.enqueue(IntakeMsg::Shutdown);

        for (_, pending) in self.shared.pending_writes.lock().drain() {
            pending.cancel.cancel();
        }
        for (_, handle) in self.shared.pending_unlinks.lock().drain() {
            handle.abort();
        }
        self.shared.throttles.clear_all();

        let closers: Vec<_> = {
            let mut map = self.shared.closers.lock();
            map.drain().map(|(_, list)| list).collect()
        };
        for list in closers {
            for closer in list {
                closer();
            }
        }
        self.shared.poll_pool.shutdown();
        self.shared.dir_table.dispose_all();
        self.event_rx.close();

        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        info!("watcher closed");
    }
}

impl Drop for FsWatcher {
    fn drop(&mut self) {
        self.shared.closed.cancel();
        let _ = self.shared.intake_tx.send(IntakeMsg::Shutdown);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
