//! The per-thread scheduler.
//!
//! A [`Scheduler`] owns one [`ModeContext`] per mode it has seen, the poller
//! performing the cycle's single wait, and the inbox through which other
//! threads reach it. It is `!Send`: the collections it owns are
//! only ever touched by the thread that created it.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::clock::{Clock, MonotonicClock};
use crate::config::RunLoopConfig;
use crate::context::{EntryCounts, ModeContext};
use crate::error::RunLoopResult;
use crate::handle::{LoopHandle, Shared};
use crate::loop_context::{Command, LoopContext};
use crate::metrics::RunLoopMetrics;
use crate::mode::{ContextState, RunLoopMode, RunLoopState};
use crate::performer::{PerformerHandle, PerformerShared};
use crate::poller::{Poller, SysPoller};
use crate::timer::{FireTime, TimerHandle, TimerShared};
use crate::watcher::{Watcher, WatcherHandle};

/// Cooperative run loop multiplexing timers, performers and watchers across
/// named modes.
pub struct Scheduler {
    /// Configuration.
    pub(crate) config: RunLoopConfig,

    /// Handle shared with other threads.
    pub(crate) handle: LoopHandle,

    /// Performs the cycle's single wait.
    pub(crate) poller: Box<dyn Poller>,

    /// One context per mode.
    pub(crate) contexts: HashMap<RunLoopMode, ModeContext>,

    /// Registrations made by callbacks during the current pass.
    pub(crate) deferred: Vec<Command>,

    _not_send: PhantomData<Rc<()>>,
}

impl Scheduler {
    /// Create a scheduler polling OS descriptors against the monotonic clock.
    pub fn new(config: RunLoopConfig) -> RunLoopResult<Self> {
        let poller = SysPoller::with_capacity(config.poll.buffer_capacity)?;
        Ok(Self::with_parts(config, Box::new(poller), Arc::new(MonotonicClock)))
    }

    /// Create a scheduler from an explicit poller and clock.
    pub fn with_parts(config: RunLoopConfig, poller: Box<dyn Poller>, clock: Arc<dyn Clock>) -> Self {
        let metrics = Arc::new(RunLoopMetrics::with_enabled(config.metrics_enabled));
        let handle = LoopHandle::new(Shared::new(
            poller.waker(),
            clock,
            metrics,
            config.perform.wait_timeout(),
        ));
        debug!("RunLoop: scheduler created");
        Self {
            config,
            handle,
            poller,
            contexts: HashMap::new(),
            deferred: Vec::new(),
            _not_send: PhantomData,
        }
    }

    /// Handle for other threads.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Get configuration.
    pub fn config(&self) -> &RunLoopConfig {
        &self.config
    }

    /// Get metrics.
    pub fn metrics(&self) -> &Arc<RunLoopMetrics> {
        self.handle.metrics()
    }

    /// Current reading of the scheduler's clock.
    pub fn now(&self) -> Instant {
        self.handle.now()
    }

    pub(crate) fn context_mut(&mut self, mode: &RunLoopMode) -> &mut ModeContext {
        let capacity = self.config.poll.buffer_capacity;
        self.contexts
            .entry(mode.clone())
            .or_insert_with(|| ModeContext::new(mode.clone(), capacity))
    }

    /// Register a timer.
    pub fn add_timer<F>(
        &mut self,
        mode: impl Into<RunLoopMode>,
        fire: impl Into<FireTime>,
        interval: Duration,
        action: F,
    ) -> TimerHandle
    where
        F: FnMut(&mut LoopContext<'_>) + Send + 'static,
    {
        let mode = mode.into();
        let fire_at = fire.into().resolve(self.now());
        let timer = TimerShared::new(fire_at, interval, Box::new(action));
        let handle = TimerHandle::new(timer.clone());
        debug!("RunLoop: timer {} added to {}", handle.id(), mode);
        self.apply(Command::AddTimer {
            mode,
            timer,
            fire_at,
        });
        self.publish_pending();
        handle
    }

    /// Invalidate a timer.
    pub fn invalidate_timer(&mut self, timer: &TimerHandle) -> RunLoopResult<()> {
        timer.invalidate()?;
        self.purge_invalid();
        Ok(())
    }

    /// Register a performer that runs on the next cycle of `mode`.
    pub fn perform_in_mode<F>(&mut self, mode: impl Into<RunLoopMode>, order: i32, action: F) -> PerformerHandle
    where
        F: FnOnce(&mut LoopContext<'_>) + Send + 'static,
    {
        self.perform_in_modes(&[mode.into()], order, action)
    }

    /// Register a performer that runs on the next cycle of whichever of
    /// `modes` is run first.
    pub fn perform_in_modes<F>(&mut self, modes: &[RunLoopMode], order: i32, action: F) -> PerformerHandle
    where
        F: FnOnce(&mut LoopContext<'_>) + Send + 'static,
    {
        let performer = PerformerShared::new(order, Box::new(action));
        let handle = PerformerHandle::new(performer.clone());
        self.apply(Command::Perform {
            modes: modes.to_vec(),
            performer,
        });
        self.publish_pending();
        handle
    }

    /// Register a watcher.
    pub fn add_watcher(&mut self, mode: impl Into<RunLoopMode>, watcher: Watcher) -> WatcherHandle {
        let mode = mode.into();
        let watcher = watcher.into_shared();
        let handle = WatcherHandle::new(watcher.clone());
        debug!(
            "RunLoop: watcher {} ({:?}) added to {}",
            handle.id(),
            handle.source(),
            mode
        );
        self.apply(Command::AddWatcher { mode, watcher });
        self.publish_pending();
        handle
    }

    /// Remove a watcher.
    pub fn remove_watcher(&mut self, watcher: &WatcherHandle) -> RunLoopResult<()> {
        watcher.remove()?;
        self.purge_invalid();
        Ok(())
    }

    fn purge_invalid(&mut self) {
        for ctx in self.contexts.values_mut() {
            ctx.purge_invalid();
            ctx.settle_state();
        }
        self.publish_pending();
    }

    /// Move a registration into its mode collections.
    pub(crate) fn apply(&mut self, command: Command) {
        match command {
            Command::AddTimer {
                mode,
                timer,
                fire_at,
            } => {
                if timer.is_valid() {
                    self.context_mut(&mode).add_timer(timer, fire_at);
                }
            }
            Command::Perform { modes, performer } => {
                if modes.is_empty() {
                    performer.cancel();
                    return;
                }
                if performer.is_valid() {
                    for mode in &modes {
                        self.context_mut(mode).add_performer(performer.clone());
                    }
                }
            }
            Command::AddWatcher { mode, watcher } => {
                if watcher.is_valid() {
                    self.context_mut(&mode).add_watcher(watcher);
                }
            }
        }
    }

    /// Apply everything other threads queued since the last cycle.
    pub(crate) fn drain_inbox(&mut self) {
        let commands = self.handle.take_inbox();
        if !commands.is_empty() {
            debug!("RunLoop: draining {} queued registrations", commands.len());
        }
        for command in commands {
            self.apply(command);
        }
    }

    /// Apply registrations made by callbacks during the last pass.
    pub(crate) fn apply_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for command in deferred {
            self.apply(command);
        }
    }

    /// Publish per-mode entry counts for [`LoopHandle::has_pending_work`].
    pub(crate) fn publish_pending(&self) {
        for (mode, ctx) in &self.contexts {
            self.handle.publish_pending(mode, ctx.counts().total());
        }
    }

    /// The mode being run, if any.
    pub fn current_mode(&self) -> Option<RunLoopMode> {
        self.handle.current_mode()
    }

    /// State of `mode`'s context. Modes never used report Idle.
    pub fn context_state(&self, mode: &RunLoopMode) -> ContextState {
        self.contexts
            .get(mode)
            .map(|ctx| ctx.state())
            .unwrap_or(ContextState::Idle)
    }

    /// Whether `mode` holds entries or has registrations queued for it.
    pub fn has_pending_work(&self, mode: &RunLoopMode) -> bool {
        self.entry_counts(mode).total() > 0 || self.handle.has_pending_work(mode)
    }

    /// Earliest fire time among `mode`'s valid timers.
    pub fn limit_date(&self, mode: &RunLoopMode) -> Option<Instant> {
        self.contexts.get(mode).and_then(|ctx| ctx.limit_date())
    }

    /// Valid entries registered in `mode`.
    pub fn entry_counts(&self, mode: &RunLoopMode) -> EntryCounts {
        self.contexts
            .get(mode)
            .map(|ctx| ctx.counts())
            .unwrap_or_default()
    }

    /// Ask the loop to stop at the top of its next cycle.
    pub fn stop(&self) {
        self.handle.request_stop();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let queued = self.handle.close();
        for command in queued {
            command.cancel();
        }
        for command in self.deferred.drain(..) {
            command.cancel();
        }
        for (mode, ctx) in self.contexts.iter_mut() {
            ctx.release();
            self.handle.publish_pending(mode, 0);
        }
        self.handle.set_current_mode(None);
        self.handle.set_state(RunLoopState::Stopped);
        debug!("RunLoop: scheduler torn down");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("handle", &self.handle)
            .field("modes", &self.contexts.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
