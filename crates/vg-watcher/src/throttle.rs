//! Per-path, per-action event deduplication.
//!
//! Filesystem backends love to report the same action several times in a
//! short burst. The [`ThrottleRegistry`] collapses those bursts: the first
//! caller for a `(kind, path)` pair wins a [`Throttler`] guard, duplicates
//! within the window are counted and suppressed, and when the winner clears
//! its guard it learns whether duplicates arrived so it can re-run once.
//! Abandoned guards are cleaned up by a timer when the window elapses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use vg_core::FxHashMap;

/// The actions that are deduplicated, each with its own window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottleKind {
    /// Re-reading a directory's contents.
    ReadDir,
    /// Establishing an OS watch.
    Watch,
    /// Emitting an `add` event.
    Add,
    /// Processing a removal.
    Remove,
    /// Emitting a `change` event.
    Change,
}

impl ThrottleKind {
    /// The deduplication window for this action, in milliseconds.
    #[must_use]
    pub const fn window_ms(self) -> u64 {
        match self {
            Self::ReadDir => 1000,
            Self::Watch => 5,
            Self::Add => 0,
            Self::Remove => 100,
            Self::Change => 50,
        }
    }
}

#[derive(Debug)]
struct Slot {
    duplicates: u32,
    epoch: u64,
}

type SlotMap = FxHashMap<(ThrottleKind, Utf8PathBuf), Slot>;

/// Registry of in-flight throttle windows.
#[derive(Debug, Default)]
pub struct ThrottleRegistry {
    slots: Arc<Mutex<SlotMap>>,
    next_epoch: AtomicU64,
}

impl ThrottleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to start an action for `(kind, path)`.
    ///
    /// Returns a [`Throttler`] guard when this caller is first within the
    /// window, or `None` when an identical action is already in flight (the
    /// duplicate is counted and the caller should do nothing).
    pub fn throttle(&self, kind: ThrottleKind, path: &Utf8Path) -> Option<Throttler> {
        let key = (kind, path.to_owned());
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);

        {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.get_mut(&key) {
                slot.duplicates += 1;
                return None;
            }
            slots.insert(
                key.clone(),
                Slot {
                    duplicates: 0,
                    epoch,
                },
            );
        }

        // Reap the slot if the winner never clears it.
        let timer = {
            let slots = Arc::clone(&self.slots);
            let key = key.clone();
            let window = Duration::from_millis(kind.window_ms());
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let mut slots = slots.lock();
                if slots.get(&key).is_some_and(|slot| slot.epoch == epoch) {
                    slots.remove(&key);
                }
            })
        };

        Some(Throttler {
            slots: Arc::clone(&self.slots),
            key,
            epoch,
            timer,
        })
    }

    /// Drops every in-flight window. Used on close.
    pub fn clear_all(&self) {
        self.slots.lock().clear();
    }

    /// Number of in-flight windows.
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Guard owned by the first caller of a throttled action.
#[derive(Debug)]
pub struct Throttler {
    slots: Arc<Mutex<SlotMap>>,
    key: (ThrottleKind, Utf8PathBuf),
    epoch: u64,
    timer: JoinHandle<()>,
}

impl Throttler {
    /// Ends the window early and reports whether duplicates were
    /// suppressed while it was open. A `true` return means the action
    /// should run once more to pick up what the duplicates represented.
    #[must_use]
    pub fn clear(self) -> bool {
        self.timer.abort();
        let mut slots = self.slots.lock();
        match slots.get(&self.key) {
            Some(slot) if slot.epoch == self.epoch => {
                let was_throttled = slot.duplicates > 0;
                slots.remove(&self.key);
                was_throttled
            }
            // clear_all() got here first.
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(s)
    }

    #[tokio::test]
    async fn test_first_caller_wins() {
        let reg = ThrottleRegistry::new();
        let p = path("/tmp/a");

        let guard = reg.throttle(ThrottleKind::Change, &p);
        assert!(guard.is_some());
        assert!(reg.throttle(ThrottleKind::Change, &p).is_none());
        assert!(reg.throttle(ThrottleKind::Change, &p).is_none());
    }

    #[tokio::test]
    async fn test_kinds_and_paths_are_independent() {
        let reg = ThrottleRegistry::new();
        let p = path("/tmp/a");

        let _change = reg.throttle(ThrottleKind::Change, &p);
        assert!(reg.throttle(ThrottleKind::Remove, &p).is_some());
        assert!(reg.throttle(ThrottleKind::Change, &path("/tmp/b")).is_some());
    }

    #[tokio::test]
    async fn test_clear_reports_suppressed_duplicates() {
        let reg = ThrottleRegistry::new();
        let p = path("/tmp/a");

        let guard = reg.throttle(ThrottleKind::ReadDir, &p).expect("first");
        assert!(reg.throttle(ThrottleKind::ReadDir, &p).is_none());
        assert!(guard.clear(), "duplicate arrived during the window");

        let guard = reg.throttle(ThrottleKind::ReadDir, &p).expect("reusable");
        assert!(!guard.clear(), "no duplicates this time");
    }

    #[tokio::test]
    async fn test_window_expires_for_abandoned_guard() {
        let reg = ThrottleRegistry::new();
        let p = path("/tmp/a");

        let guard = reg.throttle(ThrottleKind::Watch, &p).expect("first");
        drop(guard);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            reg.throttle(ThrottleKind::Watch, &p).is_some(),
            "timer should have reaped the abandoned slot"
        );
    }

    #[tokio::test]
    async fn test_clear_all_empties_registry() {
        let reg = ThrottleRegistry::new();
        let guard = reg.throttle(ThrottleKind::Remove, &path("/tmp/a"));
        let _other = reg.throttle(ThrottleKind::Remove, &path("/tmp/b"));
        assert_eq!(reg.active(), 2);

        reg.clear_all();
        assert_eq!(reg.active(), 0);

        // A surviving guard clears without incident.
        if let Some(g) = guard {
            assert!(!g.clear());
        }
    }
}
