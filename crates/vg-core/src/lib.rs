//! Core types, options, and utilities for the vigia watcher workspace.
//!
//! This crate provides the foundational pieces shared by the walker and the
//! watcher engine:
//!
//! - [`WatchOptions`] and related configuration structures
//! - Path normalization helpers ([`paths`])
//! - [`PathStats`] metadata snapshots
//! - Type aliases for `FxHashMap`/`FxHashSet` (faster than std)

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hash;
pub mod paths;
pub mod stats;

pub use config::{AtomicMode, WatchOptions, WriteFinishOptions};
pub use error::ConfigError;
pub use hash::{FxHashMap, FxHashSet};
pub use stats::{FileKind, PathStats};
