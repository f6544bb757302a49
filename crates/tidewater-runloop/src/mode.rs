//! Run loop mode and state definitions.
//!
//! A mode is a named partition of the timers, performers and watchers a
//! scheduler owns. Only the mode being run is polled; entries registered
//! in other modes wait until their mode runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Run loop mode name.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RunLoopMode {
    /// The mode most work is registered in.
    Default,

    /// Mode used while a drag or other tracked interaction is in progress.
    EventTracking,

    /// Mode used while a modal panel is up.
    ModalPanel,

    /// Mode used while waiting for a reply on a connection.
    ConnectionReply,

    /// Any other named mode.
    Custom(String),
}

impl Default for RunLoopMode {
    fn default() -> Self {
        RunLoopMode::Default
    }
}

impl fmt::Display for RunLoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunLoopMode::Default => write!(f, "default"),
            RunLoopMode::EventTracking => write!(f, "event_tracking"),
            RunLoopMode::ModalPanel => write!(f, "modal_panel"),
            RunLoopMode::ConnectionReply => write!(f, "connection_reply"),
            RunLoopMode::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for RunLoopMode {
    fn from(name: &str) -> Self {
        match name {
            "default" => RunLoopMode::Default,
            "event_tracking" => RunLoopMode::EventTracking,
            "modal_panel" => RunLoopMode::ModalPanel,
            "connection_reply" => RunLoopMode::ConnectionReply,
            other => RunLoopMode::Custom(other.to_string()),
        }
    }
}

impl From<String> for RunLoopMode {
    fn from(name: String) -> Self {
        RunLoopMode::from(name.as_str())
    }
}

impl From<&RunLoopMode> for RunLoopMode {
    fn from(mode: &RunLoopMode) -> Self {
        mode.clone()
    }
}

/// State of one mode's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextState {
    /// Nothing registered; a cycle returns immediately.
    Idle,
    /// Blocked in the OS wait, or holding entries for the next cycle.
    Waiting,
    /// Invoking ready callbacks.
    Firing,
    /// A stop was requested; remaining entries are left in place.
    Completed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Idle => write!(f, "idle"),
            ContextState::Waiting => write!(f, "waiting"),
            ContextState::Firing => write!(f, "firing"),
            ContextState::Completed => write!(f, "completed"),
        }
    }
}

/// Scheduler state, readable from other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RunLoopState {
    /// Initial state, not started.
    Created = 0,
    /// Running a cycle.
    Running = 1,
    /// Blocked in the OS wait.
    Waiting = 2,
    /// A stop was requested and not yet observed.
    Stopping = 3,
    /// Not inside any run call.
    Stopped = 4,
}

impl From<u8> for RunLoopState {
    fn from(v: u8) -> Self {
        match v {
            0 => RunLoopState::Created,
            1 => RunLoopState::Running,
            2 => RunLoopState::Waiting,
            3 => RunLoopState::Stopping,
            4 => RunLoopState::Stopped,
            _ => RunLoopState::Created,
        }
    }
}

impl fmt::Display for RunLoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunLoopState::Created => write!(f, "created"),
            RunLoopState::Running => write!(f, "running"),
            RunLoopState::Waiting => write!(f, "waiting"),
            RunLoopState::Stopping => write!(f, "stopping"),
            RunLoopState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Outcome of a run call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLoopRunResult {
    /// The mode has nothing registered.
    Finished,
    /// A stop was requested.
    Stopped,
    /// The limit date passed, or the wait ended without anything firing.
    TimedOut,
    /// At least one timer, performer or watcher fired.
    HandledSource,
}

#[cfg(test)]
#[path = "mode_tests.rs"]
mod tests;
