//! Crate-wide error types.
//!
//! Per the dispatcher's error handling design, almost nothing in the query
//! path is allowed to be fatal: a runner that errors, a dead IPC service, or
//! a slow match just means a degraded result set, logged and otherwise
//! ignored. [`DispatchError`] only covers the handful of cases that *do*
//! propagate to the caller: malformed runner metadata at load time and
//! misconfiguration of the manager itself.

use thiserror::Error;

/// Errors that can be returned by the public surface of this crate.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A runner's metadata was missing a required field or had an invalid
    /// value (e.g. an unparsable `match_regex`).
    #[error("invalid runner metadata for {id:?}: {reason}")]
    InvalidMetadata {
        /// The id of the runner that failed to load, if known.
        id: String,
        /// Human readable explanation.
        reason: String,
    },

    /// `launch_query` was asked to restrict to a runner id that was never
    /// loaded via [`crate::manager::RunnerManager::load_runner`].
    #[error("no such runner loaded: {0}")]
    UnknownRunner(String),

    /// The configuration backend could not be read or written.
    #[error("config group store error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DispatchError>;
