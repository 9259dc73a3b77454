//! Filesystem watcher engine.
//!
//! Watches files and directory trees using native OS notifications (via
//! [`notify`]) with a fixed-interval polling fallback, normalizes the
//! platform's quirks away, and delivers a single ordered stream of
//! [`WatchEvent`]s: `add`, `addDir`, `change`, `unlink`, `unlinkDir`,
//! `ready`, `raw`, and `error`.
//!
//! The engine's moving parts, each in its own module:
//!
//! - [`matcher`]: ignore rules and unwatch selection
//! - [`throttle`]: per-path, per-action burst deduplication
//! - [`dir_table`]: the authoritative directory/children bookkeeping
//! - [`pool`]: shared native OS handles, one per physical path
//! - [`poll`]: shared stat-polling tasks, the fallback backend
//! - [`watcher`]: the public [`FsWatcher`] handle and emission pipeline
//!
//! # Usage
//!
//! ```no_run
//! use vg_watcher::{FsWatcher, WatchEvent, WatchOptions};
//!
//! # async fn example() -> Result<(), vg_watcher::WatchError> {
//! let options = WatchOptions {
//!     ignore_initial: true,
//!     ..WatchOptions::default()
//! };
//! let mut watcher = FsWatcher::watch(["/var/data"], options)?;
//!
//! while let Some(event) = watcher.recv().await {
//!     if let WatchEvent::Change { path, .. } = event {
//!         println!("changed: {path}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod dir_table;
pub mod error;
pub mod events;
mod handler;
pub mod matcher;
pub mod poll;
pub mod pool;
pub mod throttle;
pub mod watcher;

pub use error::WatchError;
pub use events::{EventKind, WatchEvent};
pub use matcher::{Matcher, MatcherSet};
pub use watcher::FsWatcher;

pub use vg_core::{AtomicMode, PathStats, WatchOptions, WriteFinishOptions};
