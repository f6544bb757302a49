//! Per-mode entry collections and the poll-and-fire step.
//!
//! A [`ModeContext`] owns everything registered in one mode. Each cycle it
//! asks its watchers what they want, performs the single OS wait, and fires
//! what is ready in a fixed order:
//!
//! 1. due timers, by fire time and then registration order;
//! 2. performers present at the start of the cycle, by `order` and then
//!    registration order;
//! 3. ready or triggered watchers, starting from a rotating index.
//!
//! Every entry is removed or rescheduled before its callback runs, so a
//! callback that panics cannot leave the collections half-updated.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::RunLoopConfig;
use crate::error::{RunLoopError, RunLoopResult};
use crate::handle::LoopHandle;
use crate::loop_context::{Command, LoopContext};
use crate::mode::{ContextState, RunLoopMode, RunLoopState};
use crate::performer::{PerformerEntry, PerformerShared};
use crate::poller::{PollEvent, PollRequest, Poller, Readiness};
use crate::timer::{TimerEntry, TimerShared};
use crate::watcher::{WatcherEntry, WatcherShared};

/// Number of entries a mode holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryCounts {
    pub timers: usize,
    pub performers: usize,
    pub watchers: usize,
}

impl EntryCounts {
    /// Total entries of any kind.
    pub fn total(&self) -> usize {
        self.timers + self.performers + self.watchers
    }
}

/// What one poll-and-fire step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// A stop request was consumed before waiting.
    Stopped,
    /// Nothing registered; returned without waiting.
    Idle,
    /// The wait ended early without a usable result.
    Interrupted,
    /// The wait completed and `fired` callbacks ran.
    Polled { fired: usize, woken: bool },
}

/// What a poll-and-fire step needs from its scheduler.
pub(crate) struct CycleEnv<'a> {
    pub(crate) poller: &'a mut dyn Poller,
    pub(crate) handle: &'a LoopHandle,
    pub(crate) config: &'a RunLoopConfig,
    pub(crate) deferred: &'a mut Vec<Command>,
    pub(crate) limit: Option<Instant>,
    pub(crate) force_block: bool,
}

/// Entries registered in one mode.
pub(crate) struct ModeContext {
    mode: RunLoopMode,
    state: ContextState,
    timers: VecDeque<TimerEntry>,
    performers: VecDeque<PerformerEntry>,
    watchers: Vec<WatcherEntry>,
    next_seq: u64,
    fair_start: usize,
    fd_index: HashMap<RawFd, Vec<usize>>,
    fd_index_stale: bool,
    requests: Vec<PollRequest>,
    events: Vec<PollEvent>,
    ready: Vec<Option<Readiness>>,
    poll_failures: u32,
}

impl ModeContext {
    pub(crate) fn new(mode: RunLoopMode, buffer_capacity: usize) -> Self {
        Self {
            mode,
            state: ContextState::Idle,
            timers: VecDeque::new(),
            performers: VecDeque::new(),
            watchers: Vec::new(),
            next_seq: 0,
            fair_start: 0,
            fd_index: HashMap::new(),
            fd_index_stale: false,
            requests: Vec::with_capacity(buffer_capacity),
            events: Vec::with_capacity(buffer_capacity),
            ready: Vec::new(),
            poll_failures: 0,
        }
    }

    pub(crate) fn state(&self) -> ContextState {
        self.state
    }

    fn seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub(crate) fn add_timer(&mut self, timer: Arc<TimerShared>, fire_at: Instant) {
        let seq = self.seq();
        let entry = TimerEntry {
            shared: timer,
            fire_at,
            seq,
        };
        let key = entry.key();
        let pos = self.timers.partition_point(|e| e.key() <= key);
        self.timers.insert(pos, entry);
        self.settle_state();
    }

    pub(crate) fn add_performer(&mut self, performer: Arc<PerformerShared>) {
        let seq = self.seq();
        let entry = PerformerEntry {
            shared: performer,
            seq,
        };
        let key = entry.key();
        let pos = self.performers.partition_point(|e| e.key() <= key);
        self.performers.insert(pos, entry);
        self.settle_state();
    }

    pub(crate) fn add_watcher(&mut self, watcher: Arc<WatcherShared>) {
        self.watchers.push(WatcherEntry { shared: watcher });
        self.fd_index_stale = true;
        self.settle_state();
    }

    /// Drop entries whose handles were invalidated.
    pub(crate) fn purge_invalid(&mut self) {
        self.timers.retain(|e| e.shared.is_valid());
        self.performers.retain(|e| e.shared.is_valid());
        let before = self.watchers.len();
        self.watchers.retain(|e| e.shared.is_valid());
        if self.watchers.len() != before {
            self.fd_index_stale = true;
            if self.fair_start >= self.watchers.len() {
                self.fair_start = 0;
            }
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.timers.is_empty() && self.performers.is_empty() && self.watchers.is_empty()
    }

    pub(crate) fn counts(&self) -> EntryCounts {
        EntryCounts {
            timers: self.timers.iter().filter(|e| e.shared.is_valid()).count(),
            performers: self.performers.iter().filter(|e| e.shared.is_valid()).count(),
            watchers: self.watchers.iter().filter(|e| e.shared.is_valid()).count(),
        }
    }

    /// Earliest fire time among valid timers.
    pub(crate) fn limit_date(&self) -> Option<Instant> {
        self.timers
            .iter()
            .find(|e| e.shared.is_valid())
            .map(|e| e.fire_at)
    }

    /// Mark the context stopped. Entries stay in place.
    pub(crate) fn complete(&mut self) {
        self.state = ContextState::Completed;
    }

    /// Recompute Idle/Waiting after the collections changed.
    pub(crate) fn settle_state(&mut self) {
        if self.state == ContextState::Firing {
            return;
        }
        self.state = if self.is_idle() {
            ContextState::Idle
        } else {
            ContextState::Waiting
        };
    }

    /// Invalidate every entry, releasing anyone waiting on a performer.
    pub(crate) fn release(&mut self) {
        for entry in self.timers.drain(..) {
            entry.shared.expire();
        }
        for entry in self.performers.drain(..) {
            entry.shared.cancel();
        }
        for entry in self.watchers.drain(..) {
            entry.shared.release();
        }
        self.fd_index.clear();
        self.state = ContextState::Idle;
    }

    fn rebuild_fd_index(&mut self) {
        self.fd_index.clear();
        for (i, entry) in self.watchers.iter().enumerate() {
            if let Some(fd) = entry.shared.source().fd() {
                self.fd_index.entry(fd).or_default().push(i);
            }
        }
        self.fd_index_stale = false;
    }

    /// Bound on the coming wait. `None` waits indefinitely.
    pub(crate) fn wait_timeout(
        &self,
        now: Instant,
        limit: Option<Instant>,
        any_block: bool,
        any_trigger: bool,
        max_wait: Option<Duration>,
    ) -> Option<Duration> {
        let earliest = self.limit_date();
        if !self.performers.is_empty()
            || any_trigger
            || earliest.is_some_and(|at| at <= now)
            || limit.is_some_and(|at| at <= now)
        {
            return Some(Duration::ZERO);
        }
        if !any_block && earliest.is_none() {
            return Some(Duration::ZERO);
        }

        let until = match (earliest, limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let timeout = until.map(|at| at.saturating_duration_since(now));
        match (timeout, max_wait) {
            (Some(t), Some(max)) => Some(t.min(max)),
            (None, Some(max)) => Some(max),
            (t, None) => t,
        }
    }

    /// Run one poll-and-fire step.
    pub(crate) fn poll_and_fire(&mut self, env: CycleEnv<'_>) -> RunLoopResult<CycleOutcome> {
        let CycleEnv {
            poller,
            handle,
            config,
            deferred,
            limit,
            force_block,
        } = env;

        self.purge_invalid();
        if self.is_idle() && !force_block {
            self.state = ContextState::Idle;
            return Ok(CycleOutcome::Idle);
        }
        if self.fd_index_stale {
            self.rebuild_fd_index();
        }

        // Ask each watcher what it wants from this wait.
        let mut any_block = force_block;
        let mut any_trigger = false;
        self.requests.clear();
        self.ready.clear();
        self.ready.resize(self.watchers.len(), None);
        for (i, entry) in self.watchers.iter().enumerate() {
            let decision = entry.shared.decide();
            if decision.trigger {
                self.ready[i] = Some(Readiness::TRIGGERED);
                any_trigger = true;
            }
            any_block |= decision.should_block;
            if let Some(fd) = entry.shared.source().fd() {
                self.requests.push(PollRequest {
                    fd,
                    interest: entry.shared.interest(),
                });
            }
        }

        let now = handle.now();
        let timeout = self.wait_timeout(now, limit, any_block, any_trigger, config.poll.max_wait());
        debug!(
            "RunLoop: {} waiting {:?} on {} descriptors",
            self.mode,
            timeout,
            self.requests.len()
        );

        self.state = ContextState::Waiting;
        handle.set_state(RunLoopState::Waiting);
        self.events.clear();
        let wait_start = Instant::now();
        let result = poller.wait(&self.requests, timeout, &mut self.events);
        let metrics = handle.metrics();
        metrics.record_wait_time(wait_start.elapsed().as_micros() as u64);
        if handle.state() == RunLoopState::Waiting {
            handle.set_state(RunLoopState::Running);
        }

        let outcome = match result {
            Ok(outcome) => {
                self.poll_failures = 0;
                outcome
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                debug!("RunLoop: {} wait interrupted", self.mode);
                return Ok(CycleOutcome::Interrupted);
            }
            Err(e) => return self.poll_failed(e, config, handle),
        };
        if outcome.woken {
            metrics.record_wakeup();
        }

        let process_start = Instant::now();
        let now = handle.now();
        self.state = ContextState::Firing;
        self.mark_ready();

        let mut fired = self.fire_timers(now, handle, deferred);
        fired += self.fire_performers(now, handle, deferred);
        fired += self.fire_watchers(now, handle, deferred, config.fairness.max_watchers_per_cycle);

        metrics.record_process_time(process_start.elapsed().as_micros() as u64);
        self.state = ContextState::Waiting;
        self.settle_state();
        if fired > 0 {
            debug!("RunLoop: {} fired {} entries", self.mode, fired);
        }
        Ok(CycleOutcome::Polled {
            fired,
            woken: outcome.woken,
        })
    }

    fn poll_failed(
        &mut self,
        e: io::Error,
        config: &RunLoopConfig,
        handle: &LoopHandle,
    ) -> RunLoopResult<CycleOutcome> {
        self.poll_failures += 1;
        handle.metrics().record_poll_failure();
        if self.poll_failures > config.poll.retry_limit {
            error!(
                "RunLoop: {} wait failed {} times in a row: {}",
                self.mode, self.poll_failures, e
            );
            self.poll_failures = 0;
            return Err(RunLoopError::PollFailure(e));
        }
        warn!("RunLoop: {} wait failed, retrying: {}", self.mode, e);
        Ok(CycleOutcome::Interrupted)
    }

    /// Fold reported events into the per-watcher ready list.
    fn mark_ready(&mut self) {
        for event in &self.events {
            let Some(indices) = self.fd_index.get(&event.fd) else {
                continue;
            };
            for &i in indices {
                let entry = &self.watchers[i];
                if event.readiness.matches(entry.shared.interest()) {
                    self.ready[i] = Some(match self.ready[i] {
                        Some(r) => r.union(event.readiness),
                        None => event.readiness,
                    });
                }
            }
        }
    }

    fn fire_timers(&mut self, now: Instant, handle: &LoopHandle, deferred: &mut Vec<Command>) -> usize {
        let mut fired = 0;
        while self.timers.front().is_some_and(|e| e.fire_at <= now) {
            let Some(entry) = self.timers.pop_front() else {
                break;
            };
            // Checked right before invoking: a callback earlier in this pass
            // may have invalidated it.
            if !entry.shared.is_valid() {
                continue;
            }
            match entry.shared.next_after(entry.fire_at, now) {
                Some(next) => {
                    entry.shared.set_next_fire(next);
                    self.add_timer(entry.shared.clone(), next);
                }
                None => entry.shared.expire(),
            }

            let mut cx = LoopContext::new(&self.mode, now, handle, deferred);
            entry.shared.fire(&mut cx);
            handle.metrics().record_timer_fired();
            fired += 1;
        }
        fired
    }

    fn fire_performers(&mut self, now: Instant, handle: &LoopHandle, deferred: &mut Vec<Command>) -> usize {
        let mut fired = 0;
        while let Some(entry) = self.performers.pop_front() {
            let mut cx = LoopContext::new(&self.mode, now, handle, deferred);
            if entry.shared.run(&mut cx) {
                handle.metrics().record_performer_fired();
                fired += 1;
            }
        }
        fired
    }

    fn fire_watchers(
        &mut self,
        now: Instant,
        handle: &LoopHandle,
        deferred: &mut Vec<Command>,
        budget: Option<usize>,
    ) -> usize {
        let count = self.watchers.len();
        if count == 0 {
            return 0;
        }
        let budget = budget.unwrap_or(usize::MAX);
        let start = self.fair_start % count;
        let mut fired = 0;
        let mut last = None;

        for step in 0..count {
            if fired >= budget {
                break;
            }
            let i = (start + step) % count;
            let Some(readiness) = self.ready[i] else {
                continue;
            };
            let shared = self.watchers[i].shared.clone();
            if !shared.is_valid() {
                continue;
            }
            let mut cx = LoopContext::new(&self.mode, now, handle, deferred);
            shared.fire(&mut cx, readiness);
            handle.metrics().record_watcher_fired();
            fired += 1;
            last = Some(i);
        }

        if let Some(i) = last {
            self.fair_start = (i + 1) % count;
        }
        fired
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
