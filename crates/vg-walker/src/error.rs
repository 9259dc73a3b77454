//! Error types for the vg-walker crate.

use camino::Utf8PathBuf;

/// Errors produced while listing a directory tree.
///
/// # Error Recovery Strategy
///
/// - **Benign I/O races** (`ENOENT`, `EPERM`, `EACCES`, `ELOOP`): the entry
///   vanished or cannot be read; the listing continues without it.
/// - **Circular symlink**: terminates that sub-traversal only.
/// - **Non-UTF-8 name**: logged and skipped.
/// - Anything else is fatal to the stream.
#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    /// An I/O error while reading a directory or stat'ing an entry.
    #[error("I/O error at '{path}': {source}")]
    Io {
        /// The path that failed.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A symlink loop was detected; the subtree below it is skipped.
    #[error("circular symlink at '{0}'")]
    CircularSymlink(Utf8PathBuf),

    /// A directory entry name is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),
}

impl WalkError {
    /// Creates an [`WalkError::Io`] for a path.
    #[inline]
    pub fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the listing can continue past this error.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        match self {
            Self::CircularSymlink(_) | Self::NonUtf8Path(_) => true,
            Self::Io { source, .. } => {
                matches!(
                    source.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) || is_eloop(source)
            }
        }
    }
}

#[cfg(unix)]
fn is_eloop(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc_eloop())
}

#[cfg(unix)]
const fn libc_eloop() -> i32 {
    // ELOOP is 40 on Linux and 62 on macOS/BSD.
    #[cfg(target_os = "linux")]
    {
        40
    }
    #[cfg(not(target_os = "linux"))]
    {
        62
    }
}

#[cfg(not(unix))]
fn is_eloop(_err: &std::io::Error) -> bool {
    false
}
