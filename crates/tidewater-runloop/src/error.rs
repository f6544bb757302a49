//! Error types for the run loop.

use std::time::Duration;

use thiserror::Error;

use crate::entry::{EntryId, EntryKind};
use crate::mode::RunLoopMode;

/// Errors that can occur in the run loop.
#[derive(Debug, Error)]
pub enum RunLoopError {
    /// The entry was never registered or has already been invalidated.
    ///
    /// Always safe to ignore: the loop's bookkeeping is unaffected.
    #[error("Invalid {kind} handle: {id}")]
    InvalidHandle { kind: EntryKind, id: EntryId },

    /// A `perform_and_wait` was not picked up by any of its modes in time.
    #[error("No run loop ran modes {modes:?} within {waited:?}")]
    ModeNotActive {
        modes: Vec<RunLoopMode>,
        waited: Duration,
    },

    /// The performer was cancelled before its action completed.
    #[error("Performer was cancelled before it ran")]
    PerformCancelled,

    /// The scheduler behind a handle has been torn down.
    #[error("Run loop has been torn down")]
    LoopClosed,

    /// Waiting on the loop's own thread would never return.
    #[error("Cannot wait for a performer on the run loop's own thread")]
    WaitOnOwnerThread,

    /// The OS wait failed more often than the configured retry limit.
    #[error("Poll failure: {0}")]
    PollFailure(#[source] std::io::Error),

    /// The thread's scheduler is already borrowed (called from inside a callback).
    #[error("Run loop for this thread is already in use")]
    Reentrant,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error while setting up the loop.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for run loop operations.
pub type RunLoopResult<T> = Result<T, RunLoopError>;
