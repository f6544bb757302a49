//! What callbacks see while the loop fires them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::handle::LoopHandle;
use crate::mode::RunLoopMode;
use crate::performer::{PerformerHandle, PerformerShared};
use crate::timer::{FireTime, TimerHandle, TimerShared};
use crate::watcher::{Watcher, WatcherHandle, WatcherShared};

/// A registration on its way into a mode's collections.
///
/// Produced by callbacks (applied after the current firing pass) and by
/// other threads (queued in the inbox, drained at the start of a cycle).
pub(crate) enum Command {
    AddTimer {
        mode: RunLoopMode,
        timer: Arc<TimerShared>,
        fire_at: Instant,
    },
    Perform {
        modes: Vec<RunLoopMode>,
        performer: Arc<PerformerShared>,
    },
    AddWatcher {
        mode: RunLoopMode,
        watcher: Arc<WatcherShared>,
    },
}

impl Command {
    /// Whether this command registers anything in `mode`.
    pub(crate) fn targets(&self, mode: &RunLoopMode) -> bool {
        match self {
            Command::AddTimer { mode: m, .. } | Command::AddWatcher { mode: m, .. } => m == mode,
            Command::Perform { modes, .. } => modes.contains(mode),
        }
    }

    /// Drop the registration, releasing anyone waiting on it.
    pub(crate) fn cancel(self) {
        match self {
            Command::AddTimer { timer, .. } => timer.expire(),
            Command::Perform { performer, .. } => {
                performer.cancel();
            }
            Command::AddWatcher { watcher, .. } => watcher.release(),
        }
    }
}

/// Access to the loop from inside a timer, performer or watcher callback.
///
/// Registrations made here land in the mode collections after the current
/// firing pass, so they are first considered on the next cycle.
pub struct LoopContext<'a> {
    mode: &'a RunLoopMode,
    now: Instant,
    handle: &'a LoopHandle,
    deferred: &'a mut Vec<Command>,
}

impl<'a> LoopContext<'a> {
    pub(crate) fn new(
        mode: &'a RunLoopMode,
        now: Instant,
        handle: &'a LoopHandle,
        deferred: &'a mut Vec<Command>,
    ) -> Self {
        Self {
            mode,
            now,
            handle,
            deferred,
        }
    }

    /// The mode being run.
    pub fn mode(&self) -> &RunLoopMode {
        self.mode
    }

    /// Clock reading taken at the start of the firing pass.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Handle onto the running loop, e.g. to hand to another thread.
    pub fn handle(&self) -> &LoopHandle {
        self.handle
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
        let fire_at = fire.into().resolve(self.now);
        let timer = TimerShared::new(fire_at, interval, Box::new(action));
        let handle = TimerHandle::new(timer.clone());
        self.deferred.push(Command::AddTimer {
            mode: mode.into(),
            timer,
            fire_at,
        });
        handle
    }

    /// Register a performer in one mode.
    pub fn perform<F>(&mut self, mode: impl Into<RunLoopMode>, order: i32, action: F) -> PerformerHandle
    where
        F: FnOnce(&mut LoopContext<'_>) + Send + 'static,
    {
        self.perform_in_modes(&[mode.into()], order, action)
    }

    /// Register a performer that runs in whichever of `modes` runs first.
    pub fn perform_in_modes<F>(&mut self, modes: &[RunLoopMode], order: i32, action: F) -> PerformerHandle
    where
        F: FnOnce(&mut LoopContext<'_>) + Send + 'static,
    {
        let performer = PerformerShared::new(order, Box::new(action));
        let handle = PerformerHandle::new(performer.clone());
        self.deferred.push(Command::Perform {
            modes: modes.to_vec(),
            performer,
        });
        handle
    }

    /// Register a watcher.
    pub fn add_watcher(&mut self, mode: impl Into<RunLoopMode>, watcher: Watcher) -> WatcherHandle {
        let watcher = watcher.into_shared();
        let handle = WatcherHandle::new(watcher.clone());
        self.deferred.push(Command::AddWatcher {
            mode: mode.into(),
            watcher,
        });
        handle
    }

    /// Ask the loop to stop once this firing pass completes.
    pub fn stop(&self) {
        self.handle.request_stop();
    }
}
