//! Error types for the vg-watcher crate.

use camino::{Utf8Path, Utf8PathBuf};

/// Errors raised by the watcher engine.
///
/// # Error Recovery Strategy
///
/// After construction the watcher never panics and never tears itself down
/// on a per-path failure. Errors are classified:
///
/// - **Configuration errors** ([`WatchError::Config`]) are fatal and only
///   occur before watching starts.
/// - **Stat races** (`ENOENT` between an event and its follow-up stat) are
///   benign; the path is treated as deleted.
/// - **Permission errors** are surfaced as `error` events unless
///   `ignore_permission_errors` is set.
/// - **Backend errors** from the native watcher are surfaced as `error`
///   events; an unusable OS handle is closed and its pool entry evicted.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Invalid watcher configuration.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What was wrong.
        reason: String,
    },

    /// A watched path does not exist and cannot be retried.
    #[error("path not found: '{0}'")]
    PathNotFound(Utf8PathBuf),

    /// An I/O error at a specific path.
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// The path that failed.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An error reported by the native notification backend.
    #[error("watch backend error: {0}")]
    Backend(#[from] notify::Error),

    /// A path with a non-UTF-8 name cannot be watched.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),
}

impl WatchError {
    /// Creates a [`WatchError::Config`].
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a [`WatchError::Io`] for a path.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` when this error is an expected race (the path
    /// vanished between an event and its follow-up stat) that should be
    /// handled as a deletion rather than reported.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        match self {
            Self::PathNotFound(_) => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns `true` when this is a permission error the caller asked to
    /// swallow via `ignore_permission_errors`.
    #[must_use]
    pub fn ignorable_permission(&self, ignore_permission_errors: bool) -> bool {
        if !ignore_permission_errors {
            return false;
        }
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::PermissionDenied,
            Self::Backend(err) => matches!(
                &err.kind,
                notify::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied
            ),
            _ => false,
        }
    }

    /// The path this error refers to, when it has one.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            Self::PathNotFound(path) | Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_not_found_is_benign() {
        let err = WatchError::io("/gone", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_benign());
        assert!(WatchError::PathNotFound(Utf8PathBuf::from("/gone")).is_benign());
    }

    #[test]
    fn test_permission_error_respects_flag() {
        let err = WatchError::io("/locked", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(err.ignorable_permission(true));
        assert!(!err.ignorable_permission(false));
        assert!(!err.is_benign());
    }

    #[test]
    fn test_backend_permission_error_respects_flag() {
        let err = WatchError::Backend(notify::Error::io(io::Error::from(
            io::ErrorKind::PermissionDenied,
        )));
        assert!(err.ignorable_permission(true));
        assert!(!err.ignorable_permission(false));

        let other = WatchError::Backend(notify::Error::io(io::Error::other("boom")));
        assert!(!other.ignorable_permission(true));
    }

    #[test]
    fn test_config_error_is_fatal() {
        let err = WatchError::config("no matchers given");
        assert!(!err.is_benign());
        assert!(err.to_string().contains("no matchers"));
    }

    #[test]
    fn test_error_path_accessor() {
        let err = WatchError::io("/a/b", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.path().map(Utf8Path::as_str), Some("/a/b"));
        assert_eq!(WatchError::config("bad option").path(), None);
    }
}
