//! Lazy, cancellable directory listing.
//!
//! This crate is the entry producer consumed by the watcher engine: given a
//! root directory and filters, it yields a finite, lazy sequence of
//! directory entries with metadata. The sequence is restartable (call
//! [`Walker::stream`] again), supports early cancellation (drop or
//! [`WalkStream::destroy`]), and surfaces per-entry errors as recoverable
//! items rather than terminating the whole listing.
//!
//! # Usage
//!
//! ```no_run
//! use vg_walker::{EntryType, Walker};
//! use camino::Utf8Path;
//!
//! # async fn example() -> Result<(), vg_walker::WalkError> {
//! let walker = Walker::new(Utf8Path::new("./src"))
//!     .entry_type(EntryType::All)
//!     .always_stat(true);
//!
//! let mut stream = walker.stream();
//! while let Some(item) = stream.recv().await {
//!     match item {
//!         Ok(entry) => println!("found {}", entry.path),
//!         Err(err) if err.is_benign() => continue,
//!         Err(err) => return Err(err),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod walker;

pub use error::WalkError;
pub use walker::{EntryFilter, EntryType, WalkEntry, WalkStream, Walker};
