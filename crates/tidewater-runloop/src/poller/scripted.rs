//! Deterministic poller for tests.
//!
//! [`ScriptedPoller`] never touches the OS. Readiness is scripted against a
//! [`ManualClock`]; a wait jumps the clock forward to the next scripted
//! event or to the end of its timeout, whichever comes first.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{PollEvent, PollRequest, Poller, Readiness, WaitOutcome, WakeSignal};
use crate::clock::{Clock, ManualClock};

#[derive(Debug, Clone)]
struct ScriptedEvent {
    at: Instant,
    fd: RawFd,
    readiness: Readiness,
    persistent: bool,
}

#[derive(Debug, Default)]
struct ScriptedWaker {
    pending: AtomicBool,
}

impl WakeSignal for ScriptedWaker {
    fn wake(&self) -> io::Result<()> {
        self.pending.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Shared record of every timeout a [`ScriptedPoller`] was asked to wait.
#[derive(Debug, Clone, Default)]
pub struct WaitLog {
    waits: Arc<Mutex<Vec<Option<Duration>>>>,
}

impl WaitLog {
    /// Timeouts in the order they were requested.
    pub fn waits(&self) -> Vec<Option<Duration>> {
        self.waits.lock().clone()
    }

    /// Number of waits performed.
    pub fn len(&self) -> usize {
        self.waits.lock().len()
    }

    /// Whether no wait was performed.
    pub fn is_empty(&self) -> bool {
        self.waits.lock().is_empty()
    }
}

/// Poller driven by a script instead of the OS.
#[derive(Debug)]
pub struct ScriptedPoller {
    clock: ManualClock,
    script: Vec<ScriptedEvent>,
    waker: Arc<ScriptedWaker>,
    log: WaitLog,
    failures: Vec<io::ErrorKind>,
}

impl ScriptedPoller {
    /// Create a poller that moves `clock`.
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            script: Vec::new(),
            waker: Arc::new(ScriptedWaker::default()),
            log: WaitLog::default(),
            failures: Vec::new(),
        }
    }

    /// Report `fd` ready once, at `at`.
    pub fn ready_at(&mut self, at: Instant, fd: RawFd, readiness: Readiness) -> &mut Self {
        self.push(ScriptedEvent {
            at,
            fd,
            readiness,
            persistent: false,
        })
    }

    /// Report `fd` ready on every wait from `from` onwards.
    pub fn always_ready(&mut self, from: Instant, fd: RawFd, readiness: Readiness) -> &mut Self {
        self.push(ScriptedEvent {
            at: from,
            fd,
            readiness,
            persistent: true,
        })
    }

    /// Make the next waits fail with `kind`, one failure per call.
    pub fn fail_next(&mut self, kind: io::ErrorKind) -> &mut Self {
        self.failures.push(kind);
        self
    }

    /// Handle onto the timeouts this poller is asked to wait.
    pub fn wait_log(&self) -> WaitLog {
        self.log.clone()
    }

    fn push(&mut self, event: ScriptedEvent) -> &mut Self {
        let pos = self.script.partition_point(|e| e.at <= event.at);
        self.script.insert(pos, event);
        self
    }

    fn is_requested(event: &ScriptedEvent, requests: &[PollRequest]) -> bool {
        requests
            .iter()
            .any(|r| r.fd == event.fd && event.readiness.matches(r.interest))
    }

    fn deliver(&mut self, now: Instant, requests: &[PollRequest], events: &mut Vec<PollEvent>) {
        let mut kept = Vec::with_capacity(self.script.len());
        for event in self.script.drain(..) {
            if event.at <= now && Self::is_requested(&event, requests) {
                events.push(PollEvent {
                    fd: event.fd,
                    readiness: event.readiness,
                });
                if event.persistent {
                    kept.push(event);
                }
            } else {
                kept.push(event);
            }
        }
        self.script = kept;
    }
}

impl Poller for ScriptedPoller {
    fn wait(
        &mut self,
        requests: &[PollRequest],
        timeout: Option<Duration>,
        events: &mut Vec<PollEvent>,
    ) -> io::Result<WaitOutcome> {
        self.log.waits.lock().push(timeout);
        if !self.failures.is_empty() {
            let kind = self.failures.remove(0);
            return Err(io::Error::new(kind, "scripted poll failure"));
        }

        let woken = self.waker.pending.swap(false, Ordering::SeqCst);
        let now = self.clock.now();
        let before = events.len();
        self.deliver(now, requests, events);
        if woken || events.len() > before {
            return Ok(WaitOutcome { woken });
        }

        let next = self
            .script
            .iter()
            .filter(|e| Self::is_requested(e, requests))
            .map(|e| e.at)
            .min();
        let wake_at = match (next, timeout) {
            (Some(at), Some(t)) => Some(at.min(now + t)),
            (Some(at), None) => Some(at),
            (None, Some(t)) => Some(now + t),
            // Nothing could ever end this wait.
            (None, None) => None,
        };
        if let Some(at) = wake_at {
            self.clock.set(at);
            self.deliver(at, requests, events);
        }
        Ok(WaitOutcome { woken: false })
    }

    fn waker(&self) -> Arc<dyn WakeSignal> {
        self.waker.clone()
    }
}
