//! Configuration structures for the watcher engine.
//!
//! [`WatchOptions`] carries every recognized watcher option with the
//! documented defaults. Two environment variables can override explicit
//! settings fleet-wide:
//!
//! - `VIGIA_USE_POLLING`: force the polling backend on (`1`/`true`) or
//!   off (`0`/`false`) for every watcher instance in the process.
//! - `VIGIA_INTERVAL`: override the poll interval in milliseconds.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable forcing the polling backend globally.
pub const ENV_USE_POLLING: &str = "VIGIA_USE_POLLING";

/// Environment variable overriding the poll interval globally.
pub const ENV_INTERVAL: &str = "VIGIA_INTERVAL";

/// Default atomic-write debounce delay in milliseconds.
pub const DEFAULT_ATOMIC_DELAY_MS: u64 = 100;

/// How atomic-write normalization (unlink+add debouncing) is applied.
///
/// Many editors save by writing a temporary file and renaming it over the
/// original, which the OS reports as a deletion followed by a creation.
/// Within the debounce window that pair is collapsed into a single
/// `change` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomicMode {
    /// Enabled with the default delay when the native backend is in use,
    /// disabled when polling (the poll tick already coalesces).
    #[default]
    Auto,
    /// Never debounce.
    Disabled,
    /// Debounce with a custom delay in milliseconds.
    Delay(u64),
}

impl AtomicMode {
    /// Resolves the mode to a concrete delay, or `None` when disabled.
    #[must_use]
    pub const fn delay_ms(self, use_polling: bool) -> Option<u64> {
        match self {
            Self::Auto => {
                if use_polling {
                    None
                } else {
                    Some(DEFAULT_ATOMIC_DELAY_MS)
                }
            }
            Self::Disabled => None,
            Self::Delay(ms) => Some(ms),
        }
    }
}

/// Settings for delaying `add`/`change` events until a file stops growing.
///
/// # Examples
///
/// ```
/// use vg_core::WriteFinishOptions;
///
/// let wf = WriteFinishOptions::default();
/// assert_eq!(wf.stability_threshold_ms, 2000);
/// assert_eq!(wf.poll_interval_ms, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteFinishOptions {
    /// How long a file's size must stay fixed before the event is emitted.
    pub stability_threshold_ms: u64,

    /// How often the file is re-stat'd while waiting.
    pub poll_interval_ms: u64,
}

impl Default for WriteFinishOptions {
    fn default() -> Self {
        Self {
            stability_threshold_ms: 2000,
            poll_interval_ms: 100,
        }
    }
}

/// Configuration for a watcher instance.
///
/// All fields have sensible defaults; construct with struct-update syntax
/// or mutate a `Default` value.
///
/// # Examples
///
/// ```
/// use vg_core::WatchOptions;
///
/// let opts = WatchOptions {
///     ignore_initial: true,
///     ..WatchOptions::default()
/// };
/// assert!(opts.follow_symlinks);
/// assert_eq!(opts.interval_ms, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    /// Keep OS handles pooled across subscribers (and the process alive).
    pub persistent: bool,

    /// Suppress `add`/`addDir` events for paths found during the first scan.
    pub ignore_initial: bool,

    /// Follow symbolic links into their targets instead of watching the
    /// link itself.
    pub follow_symlinks: bool,

    /// Base directory for relative watch paths and for the paths reported
    /// in events.
    pub cwd: Option<Utf8PathBuf>,

    /// Use fixed-interval polling instead of native OS notifications.
    pub use_polling: bool,

    /// Poll cadence in milliseconds.
    pub interval_ms: u64,

    /// Poll cadence for binary files (polled less often when it differs
    /// from `interval_ms`).
    pub binary_interval_ms: u64,

    /// Always attach fresh stats to `add`/`addDir`/`change` events, even
    /// when the backend did not provide any.
    pub always_stat: bool,

    /// Recursion limit relative to each watched root (`None` = unlimited).
    pub depth: Option<u32>,

    /// Swallow `EPERM`/`EACCES` instead of surfacing them as errors.
    pub ignore_permission_errors: bool,

    /// Atomic-write (unlink+add) debouncing.
    pub atomic: AtomicMode,

    /// Delay `add`/`change` until the file's size has been stable for a
    /// threshold, or `None` to emit immediately.
    pub await_write_finish: Option<WriteFinishOptions>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            ignore_initial: false,
            follow_symlinks: true,
            cwd: None,
            use_polling: false,
            interval_ms: 100,
            binary_interval_ms: 300,
            always_stat: false,
            depth: None,
            ignore_permission_errors: false,
            atomic: AtomicMode::Auto,
            await_write_finish: None,
        }
    }
}

impl WatchOptions {
    /// Applies the process-wide environment overrides.
    ///
    /// Operators can force polling (or a specific poll interval) across a
    /// whole fleet of watcher instances regardless of what each caller
    /// configured. Applied after explicit options, so the environment wins.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] when `VIGIA_INTERVAL` is not
    /// a positive integer.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = std::env::var(ENV_USE_POLLING) {
            let lower = raw.to_lowercase();
            self.use_polling = !(lower == "false" || lower == "0" || lower.is_empty());
        }

        if let Ok(raw) = std::env::var(ENV_INTERVAL) {
            let parsed: u64 = raw.parse().map_err(|_| ConfigError::InvalidOption {
                option: ENV_INTERVAL.to_owned(),
                reason: format!("expected a positive integer, got '{raw}'"),
            })?;
            self.interval_ms = parsed;
        }

        Ok(())
    }

    /// The resolved atomic debounce delay for these options.
    #[must_use]
    pub const fn atomic_delay_ms(&self) -> Option<u64> {
        self.atomic.delay_ms(self.use_polling)
    }
}
