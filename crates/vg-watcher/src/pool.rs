//! Pooled native OS watches.
//!
//! OS watch handles are a scarce resource, so one [`notify`] watcher is
//! opened per physical path and shared by every subscriber interested in
//! it. Subscribers register listener/error/raw callbacks keyed by a
//! subscription id and get back a [`Closer`]; the last closer to run drops
//! the OS handle and evicts the pool entry.
//!
//! Non-persistent subscriptions bypass the pool entirely: they get a
//! dedicated handle whose lifetime is exactly the subscription's.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use notify::{RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use vg_core::FxHashMap;

use crate::error::WatchError;

/// Tears down one subscription when invoked.
pub type Closer = Box<dyn FnOnce() + Send>;

/// Called with the path an event names.
pub type EventListener = Arc<dyn Fn(&Utf8Path) + Send + Sync>;

/// Called with errors from the backing OS handle.
pub type ErrorListener = Arc<dyn Fn(&WatchError) + Send + Sync>;

/// Called with the unprocessed backend event.
pub type RawListener = Arc<dyn Fn(&Utf8Path, &notify::Event) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    listeners: FxHashMap<u64, EventListener>,
    errors: FxHashMap<u64, ErrorListener>,
    raws: FxHashMap<u64, RawListener>,
}

impl Subscribers {
    fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.errors.is_empty() && self.raws.is_empty()
    }
}

struct PoolEntry {
    watch_path: Utf8PathBuf,
    watcher: Mutex<Option<notify::RecommendedWatcher>>,
    subs: Mutex<Subscribers>,
    /// Set when the OS handle reported an unrecoverable error.
    broken: AtomicBool,
}

impl PoolEntry {
    fn broadcast_event(&self, path: &Utf8Path, raw: Option<&notify::Event>) {
        let subs = self.subs.lock();
        for listener in subs.listeners.values() {
            listener(path);
        }
        if let Some(event) = raw {
            for emitter in subs.raws.values() {
                emitter(path, event);
            }
        }
    }

    fn broadcast_error(&self, err: &WatchError) {
        let subs = self.subs.lock();
        for handler in subs.errors.values() {
            handler(err);
        }
    }

    fn handle_backend_error(&self, err: notify::Error) {
        if cfg!(windows) && is_permission_denied(&err) {
            // Windows reports EPERM when the handle is closed while the
            // watched entity is being deleted. Probe the path: if it is
            // already gone this is the close race, not a live failure.
            if std::fs::metadata(self.watch_path.as_std_path()).is_err() {
                debug!(path = %self.watch_path, "ignoring EPERM from a closing handle");
                return;
            }
        }

        self.broken.store(true, Ordering::Release);
        warn!(path = %self.watch_path, error = %err, "native watch handle failed");
        self.broadcast_error(&WatchError::Backend(err));
    }
}

fn is_permission_denied(err: &notify::Error) -> bool {
    matches!(
        &err.kind,
        notify::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied
    )
}

/// Pool of shared, per-path native watch handles.
pub struct FsWatchPool {
    entries: Mutex<FxHashMap<Utf8PathBuf, Arc<PoolEntry>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for FsWatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsWatchPool")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for FsWatchPool {
    fn default() -> Self {
        Self::new()
    }
}

impl FsWatchPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of live pooled handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when no handles are pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Subscribes to native events for `full_path`.
    ///
    /// Persistent subscriptions share one OS handle per path; a
    /// non-persistent subscription gets a private handle that never enters
    /// the pool. The returned [`Closer`] tears the subscription down; for
    /// pooled handles the last teardown closes the OS handle.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Backend`] when the OS watch cannot be
    /// established.
    pub fn subscribe(
        self: &Arc<Self>,
        full_path: &Utf8Path,
        persistent: bool,
        listener: EventListener,
        error: ErrorListener,
        raw: Option<RawListener>,
    ) -> Result<Closer, WatchError> {
        if !persistent {
            return subscribe_unpooled(full_path, &listener, &error, raw.as_ref());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = self.entry_for(full_path)?;
        {
            let mut subs = entry.subs.lock();
            subs.listeners.insert(id, listener);
            subs.errors.insert(id, error);
            if let Some(raw) = raw {
                subs.raws.insert(id, raw);
            }
        }
        trace!(path = %full_path, id, "pooled watch subscription added");

        let pool = Arc::downgrade(self);
        let key = full_path.to_owned();
        Ok(Box::new(move || {
            let Some(pool) = pool.upgrade() else { return };
            let mut entries = pool.entries.lock();
            let Some(entry) = entries.get(&key) else {
                return;
            };
            let last = {
                let mut subs = entry.subs.lock();
                subs.listeners.remove(&id);
                subs.errors.remove(&id);
                subs.raws.remove(&id);
                subs.is_empty()
            };
            if last {
                if let Some(entry) = entries.remove(&key) {
                    // Dropping the notify watcher closes the OS handle.
                    *entry.watcher.lock() = None;
                    trace!(path = %key, "last subscriber gone, handle closed");
                }
            }
        }))
    }

    /// Gets the live entry for a path, replacing a broken one.
    fn entry_for(self: &Arc<Self>, full_path: &Utf8Path) -> Result<Arc<PoolEntry>, WatchError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(full_path) {
            if existing.broken.load(Ordering::Acquire) {
                entries.remove(full_path);
            } else {
                return Ok(Arc::clone(existing));
            }
        }

        let entry = Arc::new(PoolEntry {
            watch_path: full_path.to_owned(),
            watcher: Mutex::new(None),
            subs: Mutex::new(Subscribers::default()),
            broken: AtomicBool::new(false),
        });

        let weak_entry = Arc::downgrade(&entry);
        let weak_pool = Arc::downgrade(self);
        let watch_path = full_path.to_owned();
        let mut watcher = notify::recommended_watcher(
            move |res: Result<notify::Event, notify::Error>| {
                let Some(entry) = weak_entry.upgrade() else {
                    return;
                };
                match res {
                    Ok(event) => {
                        let event_path = event
                            .paths
                            .first()
                            .and_then(|p| Utf8Path::from_path(p))
                            .map_or_else(|| watch_path.clone(), Utf8Path::to_path_buf);

                        // An event naming a child that has its own pooled
                        // handle is forwarded to that entry's subscribers
                        // as well.
                        if event_path != watch_path {
                            let child = weak_pool
                                .upgrade()
                                .and_then(|pool| pool.entries.lock().get(&event_path).cloned());
                            if let Some(child) = child {
                                child.broadcast_event(&event_path, Some(&event));
                            }
                        }
                        entry.broadcast_event(&event_path, Some(&event));
                    }
                    Err(err) => entry.handle_backend_error(err),
                }
            },
        )?;
        watcher.watch(full_path.as_std_path(), RecursiveMode::NonRecursive)?;
        *entry.watcher.lock() = Some(watcher);

        entries.insert(full_path.to_owned(), Arc::clone(&entry));
        debug!(path = %full_path, "native watch handle opened");
        Ok(entry)
    }
}

/// Dedicated handle for a non-persistent subscription.
fn subscribe_unpooled(
    full_path: &Utf8Path,
    listener: &EventListener,
    error: &ErrorListener,
    raw: Option<&RawListener>,
) -> Result<Closer, WatchError> {
    let listener = Arc::clone(listener);
    let error = Arc::clone(error);
    let raw = raw.map(Arc::clone);
    let watch_path = full_path.to_owned();

    let mut watcher =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
            Ok(event) => {
                let event_path = event
                    .paths
                    .first()
                    .and_then(|p| Utf8Path::from_path(p))
                    .map_or_else(|| watch_path.clone(), Utf8Path::to_path_buf);
                listener(&event_path);
                if let Some(raw) = &raw {
                    raw(&event_path, &event);
                }
            }
            Err(err) => error(&WatchError::Backend(err)),
        })?;
    watcher.watch(full_path.as_std_path(), RecursiveMode::NonRecursive)?;

    Ok(Box::new(move || drop(watcher)))
}
