//! OS readiness polling.
//!
//! A [`Poller`] performs the single blocking wait of a cycle: it waits on a
//! set of descriptors plus its own wake source, bounded by a timeout, and
//! reports which descriptors became ready.

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod scripted;
pub mod sys;

pub use scripted::{ScriptedPoller, WaitLog};
pub use sys::{PipeWaker, SysPoller};

/// Readiness a watcher is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interest {
    /// Data can be read, or the peer hung up.
    Read,
    /// Data can be written.
    Write,
    /// Out-of-band or priority data is pending.
    Exceptional,
    /// Not polled; fired only through the watcher's trigger decision.
    Custom,
}

/// Readiness reported for a descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub exceptional: bool,
    pub hangup: bool,
    pub error: bool,
    /// Fired because the watcher asked to be triggered this cycle.
    pub triggered: bool,
}

impl Readiness {
    /// Readiness of a watcher fired through its trigger decision.
    pub const TRIGGERED: Readiness = Readiness {
        readable: false,
        writable: false,
        exceptional: false,
        hangup: false,
        error: false,
        triggered: true,
    };

    /// Plain read readiness.
    pub fn readable() -> Self {
        Self {
            readable: true,
            ..Self::default()
        }
    }

    /// Plain write readiness.
    pub fn writable() -> Self {
        Self {
            writable: true,
            ..Self::default()
        }
    }

    /// Whether nothing is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether this readiness should wake a watcher with `interest`.
    pub fn matches(&self, interest: Interest) -> bool {
        match interest {
            Interest::Read => self.readable || self.hangup || self.error,
            Interest::Write => self.writable || self.hangup || self.error,
            Interest::Exceptional => self.exceptional || self.error,
            Interest::Custom => self.triggered,
        }
    }

    /// Combine two readiness reports.
    pub fn union(self, other: Readiness) -> Readiness {
        Readiness {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
            exceptional: self.exceptional || other.exceptional,
            hangup: self.hangup || other.hangup,
            error: self.error || other.error,
            triggered: self.triggered || other.triggered,
        }
    }
}

/// One descriptor to wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    pub fd: RawFd,
    pub interest: Interest,
}

/// One descriptor reported ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub fd: RawFd,
    pub readiness: Readiness,
}

/// Result of a completed wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOutcome {
    /// The wake source fired during this wait.
    pub woken: bool,
}

/// Cross-thread signal that interrupts a blocked [`Poller::wait`].
pub trait WakeSignal: Send + Sync + fmt::Debug {
    /// Make the current or next wait return promptly.
    fn wake(&self) -> io::Result<()>;
}

/// Readiness multiplexer used by a scheduler.
pub trait Poller: Send {
    /// Wait until a requested descriptor is ready, the wake source fires or
    /// `timeout` elapses (`None` waits indefinitely).
    ///
    /// Ready descriptors are appended to `events`. An interrupted wait is
    /// reported as [`io::ErrorKind::Interrupted`].
    fn wait(
        &mut self,
        requests: &[PollRequest],
        timeout: Option<Duration>,
        events: &mut Vec<PollEvent>,
    ) -> io::Result<WaitOutcome>;

    /// The wake source for this poller.
    fn waker(&self) -> Arc<dyn WakeSignal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_matches_interest() {
        let readable = Readiness::readable();
        assert!(readable.matches(Interest::Read));
        assert!(!readable.matches(Interest::Write));
        assert!(!readable.matches(Interest::Custom));

        let hangup = Readiness {
            hangup: true,
            ..Readiness::default()
        };
        assert!(hangup.matches(Interest::Read));
        assert!(!hangup.matches(Interest::Exceptional));

        assert!(Readiness::TRIGGERED.matches(Interest::Custom));
        assert!(!Readiness::TRIGGERED.matches(Interest::Read));
    }

    #[test]
    fn test_readiness_union() {
        let both = Readiness::readable().union(Readiness::writable());
        assert!(both.readable && both.writable);
        assert!(!both.is_empty());
        assert!(Readiness::default().is_empty());
    }
}
