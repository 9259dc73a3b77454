//! Filesystem metadata snapshots.
//!
//! [`PathStats`] is a plain-data capture of `std::fs::Metadata` taken at a
//! specific instant. The watcher compares successive snapshots to decide
//! whether a path really changed (size/mtime), whether an editor replaced
//! the file atomically (inode), and whether a deletion is in progress
//! (`mtime_ms == 0`, a quirk the polling backend reports while a file is
//! being removed).

use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The kind of filesystem object a snapshot describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// A regular file.
    File,
    /// A directory.
    Directory,
    /// A symbolic link (only observable through `lstat`-style calls).
    Symlink,
    /// Sockets, FIFOs, devices and anything else.
    Other,
}

/// A point-in-time snapshot of a path's metadata.
///
/// # Examples
///
/// ```no_run
/// use vg_core::PathStats;
///
/// let meta = std::fs::metadata("Cargo.toml")?;
/// let stats = PathStats::from_metadata(&meta);
/// assert!(stats.is_file());
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStats {
    /// File size in bytes.
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch (0 if unknown).
    pub mtime_ms: u64,
    /// Access time in milliseconds since the Unix epoch (0 if unknown).
    pub atime_ms: u64,
    /// Inode number (0 on platforms without inodes).
    pub ino: u64,
    /// Unix permission bits (best-effort 0o444/0o666 style value elsewhere).
    pub mode: u32,
    /// What kind of object this snapshot describes.
    pub kind: FileKind,
}

impl PathStats {
    /// Builds a snapshot from `std::fs::Metadata`.
    #[must_use]
    pub fn from_metadata(meta: &Metadata) -> Self {
        let kind = if meta.file_type().is_symlink() {
            FileKind::Symlink
        } else if meta.is_dir() {
            FileKind::Directory
        } else if meta.is_file() {
            FileKind::File
        } else {
            FileKind::Other
        };

        Self {
            size: meta.len(),
            mtime_ms: system_time_ms(meta.modified().ok()),
            atime_ms: system_time_ms(meta.accessed().ok()),
            ino: inode(meta),
            mode: mode_bits(meta),
            kind,
        }
    }

    /// An all-zero snapshot, the sentinel the polling backend reports while
    /// a path is missing or mid-deletion.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            size: 0,
            mtime_ms: 0,
            atime_ms: 0,
            ino: 0,
            mode: 0,
            kind: FileKind::Other,
        }
    }

    /// Returns `true` for regular files.
    #[inline]
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    /// Returns `true` for directories.
    #[inline]
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// Returns `true` for symbolic links.
    #[inline]
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Whether the owner read bit is set.
    ///
    /// Used to skip entries the process could not read anyway; platforms
    /// without Unix modes report everything as readable.
    #[inline]
    #[must_use]
    pub fn readable(&self) -> bool {
        if self.mode == 0 {
            return true;
        }
        self.mode & 0o400 != 0
    }
}

fn system_time_ms(time: Option<SystemTime>) -> u64 {
    time.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(unix)]
fn inode(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &Metadata) -> u64 {
    0
}

#[cfg(unix)]
fn mode_bits(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}
