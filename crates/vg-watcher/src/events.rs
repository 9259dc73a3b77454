//! Event types delivered to watcher consumers.

use camino::{Utf8Path, Utf8PathBuf};

use vg_core::PathStats;

use crate::error::WatchError;

/// The kind of a [`WatchEvent`], for filtering without destructuring.
///
/// The string form of each kind (see [`EventKind::as_str`]) is stable and
/// matches the names consumers of similar watchers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Initial scan complete.
    Ready,
    /// A file appeared.
    Add,
    /// A directory appeared.
    AddDir,
    /// A file's contents or metadata changed.
    Change,
    /// A file disappeared.
    Unlink,
    /// A directory disappeared.
    UnlinkDir,
    /// An unprocessed backend notification.
    Raw,
    /// A recoverable error.
    Error,
}

impl EventKind {
    /// Stable string name for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Add => "add",
            Self::AddDir => "addDir",
            Self::Change => "change",
            Self::Unlink => "unlink",
            Self::UnlinkDir => "unlinkDir",
            Self::Raw => "raw",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single watcher notification.
///
/// Paths are reported relative to the configured `cwd` when one is set,
/// otherwise as the absolute paths the watcher resolved.
#[derive(Debug)]
pub enum WatchEvent {
    /// The initial scan of every watched root has completed.
    Ready,

    /// A file was discovered or created.
    Add {
        /// The file's path.
        path: Utf8PathBuf,
        /// Stats snapshot, when available.
        stats: Option<PathStats>,
    },

    /// A directory was discovered or created.
    AddDir {
        /// The directory's path.
        path: Utf8PathBuf,
        /// Stats snapshot, when available.
        stats: Option<PathStats>,
    },

    /// A watched file changed.
    Change {
        /// The file's path.
        path: Utf8PathBuf,
        /// Stats snapshot, when available.
        stats: Option<PathStats>,
    },

    /// A watched file was removed.
    Unlink {
        /// The file's former path.
        path: Utf8PathBuf,
    },

    /// A watched directory was removed.
    UnlinkDir {
        /// The directory's former path.
        path: Utf8PathBuf,
    },

    /// A raw backend notification, forwarded without interpretation.
    Raw {
        /// The path the backend named.
        path: Utf8PathBuf,
        /// Backend-specific description of what happened.
        details: String,
    },

    /// A recoverable error. The watcher keeps running.
    Error(WatchError),
}

impl WatchEvent {
    /// This event's kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Ready,
            Self::Add { .. } => EventKind::Add,
            Self::AddDir { .. } => EventKind::AddDir,
            Self::Change { .. } => EventKind::Change,
            Self::Unlink { .. } => EventKind::Unlink,
            Self::UnlinkDir { .. } => EventKind::UnlinkDir,
            Self::Raw { .. } => EventKind::Raw,
            Self::Error(_) => EventKind::Error,
        }
    }

    /// The path this event refers to, when it has one.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Add { path, .. }
            | Self::AddDir { path, .. }
            | Self::Change { path, .. }
            | Self::Unlink { path }
            | Self::UnlinkDir { path }
            | Self::Raw { path, .. } => Some(path),
            Self::Ready => None,
            Self::Error(err) => err.path(),
        }
    }

    /// The stats snapshot attached to this event, when it has one.
    #[must_use]
    pub const fn stats(&self) -> Option<&PathStats> {
        match self {
            Self::Add { stats, .. } | Self::AddDir { stats, .. } | Self::Change { stats, .. } => {
                stats.as_ref()
            }
            _ => None,
        }
    }
}
