//! Pooled fixed-interval stat polling.
//!
//! The fallback backend for filesystems without usable native
//! notifications. One polling task runs per physical path, shared by every
//! subscriber; a tick that observes a size or mtime change notifies all of
//! them, and a vanished path is reported once with zeroed stats (the
//! `mtime == 0` deletion sentinel).
//!
//! When subscribers disagree about policy the pool only ever tightens:
//! a persistent subscriber makes the shared poll persistent, and a shorter
//! interval replaces a longer one (the poll task is torn down and
//! recreated; listeners carry over).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use vg_core::{FxHashMap, PathStats};

use crate::pool::Closer;

/// Called with the polled path and its fresh stats after a change.
pub type PollListener = Arc<dyn Fn(&Utf8Path, &PathStats) + Send + Sync>;

/// Called with `(previous, current)` stats on every observed change.
pub type RawPollListener = Arc<dyn Fn(&PathStats, &PathStats) + Send + Sync>;

#[derive(Default)]
struct PollSubscribers {
    listeners: FxHashMap<u64, PollListener>,
    raws: FxHashMap<u64, RawPollListener>,
}

impl PollSubscribers {
    fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.raws.is_empty()
    }
}

struct PollEntry {
    subs: Arc<Mutex<PollSubscribers>>,
    /// Baseline stats ticks diff against. Seeded at subscribe time so a
    /// change landing before the first tick is still observed; survives a
    /// policy respawn.
    last: Arc<Mutex<Option<PathStats>>>,
    task: JoinHandle<()>,
    interval_ms: u64,
    persistent: bool,
}

/// Pool of shared per-path polling tasks.
pub struct PollPool {
    entries: Mutex<FxHashMap<Utf8PathBuf, PollEntry>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PollPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollPool")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for PollPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PollPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of live polling tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` when nothing is being polled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The effective poll interval for a path, when it is being polled.
    #[must_use]
    pub fn interval_of(&self, full_path: &Utf8Path) -> Option<u64> {
        self.entries.lock().get(full_path).map(|e| e.interval_ms)
    }

    /// Subscribes to stat-poll notifications for `full_path`.
    ///
    /// `initial` seeds the baseline the first tick diffs against; without
    /// it a change landing between subscribe and the first tick would
    /// silently become the baseline. Joins the existing poll for the path
    /// when there is one, tightening its policy if this subscriber is more
    /// demanding. The returned [`Closer`] removes the subscription; the
    /// last one stops the task.
    pub fn subscribe(
        self: &Arc<Self>,
        full_path: &Utf8Path,
        persistent: bool,
        interval_ms: u64,
        initial: Option<PathStats>,
        listener: PollListener,
        raw: Option<RawPollListener>,
    ) -> Closer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(full_path) {
            {
                let mut subs = entry.subs.lock();
                subs.listeners.insert(id, listener);
                if let Some(raw) = raw {
                    subs.raws.insert(id, raw);
                }
            }
            if let Some(initial) = initial {
                entry.last.lock().get_or_insert(initial);
            }

            let tighter_interval = interval_ms < entry.interval_ms;
            let gains_persistence = persistent && !entry.persistent;
            if tighter_interval || gains_persistence {
                entry.interval_ms = entry.interval_ms.min(interval_ms);
                entry.persistent = entry.persistent || persistent;
                entry.task.abort();
                entry.task = spawn_poll_task(
                    full_path.to_owned(),
                    entry.interval_ms,
                    Arc::clone(&entry.subs),
                    Arc::clone(&entry.last),
                );
                debug!(
                    path = %full_path,
                    interval_ms = entry.interval_ms,
                    persistent = entry.persistent,
                    "poll policy tightened"
                );
            }
        } else {
            let subs = Arc::new(Mutex::new(PollSubscribers::default()));
            {
                let mut guard = subs.lock();
                guard.listeners.insert(id, listener);
                if let Some(raw) = raw {
                    guard.raws.insert(id, raw);
                }
            }
            let last = Arc::new(Mutex::new(initial));
            let task = spawn_poll_task(
                full_path.to_owned(),
                interval_ms,
                Arc::clone(&subs),
                Arc::clone(&last),
            );
            entries.insert(
                full_path.to_owned(),
                PollEntry {
                    subs,
                    last,
                    task,
                    interval_ms,
                    persistent,
                },
            );
            debug!(path = %full_path, interval_ms, "poll started");
        }
        drop(entries);

        let pool = Arc::downgrade(self);
        let key = full_path.to_owned();
        Box::new(move || {
            let Some(pool) = pool.upgrade() else { return };
            let mut entries = pool.entries.lock();
            let Some(entry) = entries.get(&key) else {
                return;
            };
            let last = {
                let mut subs = entry.subs.lock();
                subs.listeners.remove(&id);
                subs.raws.remove(&id);
                subs.is_empty()
            };
            if last {
                if let Some(entry) = entries.remove(&key) {
                    entry.task.abort();
                    trace!(path = %key, "last subscriber gone, poll stopped");
                }
            }
        })
    }

    /// Stops every polling task. Used on close.
    pub fn shutdown(&self) {
        let mut entries = self.entries.lock();
        for (_, entry) in entries.drain() {
            entry.task.abort();
        }
    }
}

fn spawn_poll_task(
    path: Utf8PathBuf,
    interval_ms: u64,
    subs: Arc<Mutex<PollSubscribers>>,
    last: Arc<Mutex<Option<PathStats>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            // The closer aborts this task; self-terminating when the
            // subscriber map drains covers the respawn window as well.
            if subs.lock().is_empty() {
                break;
            }

            let curr = match tokio::fs::metadata(&path).await {
                Ok(meta) => PathStats::from_metadata(&meta),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => PathStats::zeroed(),
                Err(err) => {
                    warn!(path = %path, error = %err, "poll stat failed");
                    continue;
                }
            };

            if let Some(prev) = last.lock().replace(curr) {
                let changed = curr.mtime_ms != prev.mtime_ms || curr.size != prev.size;
                if changed {
                    // Clone the callbacks out so a listener can touch
                    // the pool without deadlocking.
                    let (listeners, raws) = {
                        let guard = subs.lock();
                        (
                            guard.listeners.values().map(Arc::clone).collect::<Vec<_>>(),
                            guard.raws.values().map(Arc::clone).collect::<Vec<_>>(),
                        )
                    };
                    for raw in &raws {
                        raw(&prev, &curr);
                    }
                    for listener in &listeners {
                        listener(&path, &curr);
                    }
                }
            }
        }
    })
}
