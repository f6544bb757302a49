//! Thread-safe handle onto a scheduler.
//!
//! A [`LoopHandle`] is the only way other threads reach a scheduler. Every
//! registration it makes is queued in the inbox and picked up by the owning
//! thread at the start of its next cycle; the wake source makes sure a
//! blocked wait notices.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{RunLoopError, RunLoopResult};
use crate::loop_context::{Command, LoopContext};
use crate::metrics::RunLoopMetrics;
use crate::mode::{RunLoopMode, RunLoopState};
use crate::performer::{Completion, CompletionState, PerformerHandle, PerformerShared};
use crate::poller::WakeSignal;
use crate::timer::{FireTime, TimerHandle, TimerShared};
use crate::watcher::{Watcher, WatcherHandle};

/// State shared between a scheduler and all of its handles.
pub(crate) struct Shared {
    owner: ThreadId,
    inbox: Mutex<Vec<Command>>,
    waker: Arc<dyn WakeSignal>,
    clock: Arc<dyn Clock>,
    stop_requested: AtomicBool,
    closed: AtomicBool,
    state: AtomicU8,
    current_mode: RwLock<Option<RunLoopMode>>,
    pending: DashMap<RunLoopMode, usize>,
    metrics: Arc<RunLoopMetrics>,
    wait_timeout: Duration,
}

impl Shared {
    pub(crate) fn new(
        waker: Arc<dyn WakeSignal>,
        clock: Arc<dyn Clock>,
        metrics: Arc<RunLoopMetrics>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            owner: thread::current().id(),
            inbox: Mutex::new(Vec::new()),
            waker,
            clock,
            stop_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            state: AtomicU8::new(RunLoopState::Created as u8),
            current_mode: RwLock::new(None),
            pending: DashMap::new(),
            metrics,
            wait_timeout,
        }
    }
}

/// Cloneable, `Send + Sync` handle onto a scheduler.
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<Shared>,
}

impl LoopHandle {
    pub(crate) fn new(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Queue a command for the owning thread.
    ///
    /// The closed flag is read under the inbox lock, so a command either
    /// reaches the inbox before teardown drains it or is refused.
    pub(crate) fn post(&self, command: Command) -> RunLoopResult<()> {
        {
            let mut inbox = self.shared.inbox.lock();
            if self.shared.closed.load(Ordering::SeqCst) {
                drop(inbox);
                command.cancel();
                return Err(RunLoopError::LoopClosed);
            }
            inbox.push(command);
        }
        self.signal();
        Ok(())
    }

    pub(crate) fn take_inbox(&self) -> Vec<Command> {
        std::mem::take(&mut *self.shared.inbox.lock())
    }

    /// Refuse further commands and hand back whatever is still queued.
    pub(crate) fn close(&self) -> Vec<Command> {
        let mut inbox = self.shared.inbox.lock();
        self.shared.closed.store(true, Ordering::SeqCst);
        std::mem::take(&mut *inbox)
    }

    fn signal(&self) {
        if let Err(e) = self.shared.waker.wake() {
            warn!("RunLoop: wake signal failed: {}", e);
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.shared.clock.now()
    }

    pub(crate) fn set_state(&self, state: RunLoopState) {
        self.shared.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn set_current_mode(&self, mode: Option<RunLoopMode>) {
        *self.shared.current_mode.write() = mode;
    }

    pub(crate) fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.shared.state.compare_exchange(
            RunLoopState::Running as u8,
            RunLoopState::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.shared.state.compare_exchange(
            RunLoopState::Waiting as u8,
            RunLoopState::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.signal();
    }

    /// Consume a pending stop request.
    pub(crate) fn take_stop(&self) -> bool {
        self.shared.stop_requested.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn publish_pending(&self, mode: &RunLoopMode, count: usize) {
        if count == 0 {
            self.shared.pending.remove(mode);
        } else {
            self.shared.pending.insert(mode.clone(), count);
        }
    }

    /// Register a timer.
    pub fn add_timer<F>(
        &self,
        mode: impl Into<RunLoopMode>,
        fire: impl Into<FireTime>,
        interval: Duration,
        action: F,
    ) -> RunLoopResult<TimerHandle>
    where
        F: FnMut(&mut LoopContext<'_>) + Send + 'static,
    {
        let fire_at = fire.into().resolve(self.now());
        let timer = TimerShared::new(fire_at, interval, Box::new(action));
        let handle = TimerHandle::new(timer.clone());
        self.post(Command::AddTimer {
            mode: mode.into(),
            timer,
            fire_at,
        })?;
        Ok(handle)
    }

    /// Register a performer in one mode without waiting for it.
    pub fn perform_in_mode<F>(
        &self,
        mode: impl Into<RunLoopMode>,
        order: i32,
        action: F,
    ) -> RunLoopResult<PerformerHandle>
    where
        F: FnOnce(&mut LoopContext<'_>) + Send + 'static,
    {
        self.perform_in_modes(&[mode.into()], order, action)
    }

    /// Register a performer that runs in whichever of `modes` runs first.
    pub fn perform_in_modes<F>(
        &self,
        modes: &[RunLoopMode],
        order: i32,
        action: F,
    ) -> RunLoopResult<PerformerHandle>
    where
        F: FnOnce(&mut LoopContext<'_>) + Send + 'static,
    {
        let performer = PerformerShared::new(order, Box::new(action));
        let handle = PerformerHandle::new(performer.clone());
        self.post(Command::Perform {
            modes: modes.to_vec(),
            performer,
        })?;
        Ok(handle)
    }

    /// Run `action` on the loop's thread in one of `modes` and block until it
    /// has finished.
    ///
    /// Waits at most `timeout`, or the configured `perform.wait_timeout_ms`
    /// when `None`. A performer that has not started when the bound elapses
    /// is cancelled and reported as [`RunLoopError::ModeNotActive`]; one that
    /// already started is waited for until it finishes.
    pub fn perform_and_wait<F>(
        &self,
        modes: &[RunLoopMode],
        action: F,
        timeout: Option<Duration>,
    ) -> RunLoopResult<()>
    where
        F: FnOnce(&mut LoopContext<'_>) + Send + 'static,
    {
        if self.is_owner_thread() {
            return Err(RunLoopError::WaitOnOwnerThread);
        }

        let completion = Completion::new();
        let performer = PerformerShared::with_completion(0, Box::new(action), completion.clone());
        let id = performer.id();
        self.post(Command::Perform {
            modes: modes.to_vec(),
            performer: performer.clone(),
        })?;

        let bound = timeout.unwrap_or(self.shared.wait_timeout);
        let mut state = completion.wait(Some(bound));
        if state == CompletionState::Pending {
            if performer.cancel() {
                warn!(
                    "RunLoop: performer {} not picked up by modes {:?} within {:?}",
                    id, modes, bound
                );
                return Err(RunLoopError::ModeNotActive {
                    modes: modes.to_vec(),
                    waited: bound,
                });
            }
            // Claimed by the loop just before the cancel; it is running now.
            state = completion.wait(None);
        } else if state == CompletionState::Running {
            state = completion.wait(None);
        }

        match state {
            CompletionState::Done => {
                debug!("RunLoop: performer {} completed", id);
                Ok(())
            }
            _ => Err(RunLoopError::PerformCancelled),
        }
    }

    /// Register a watcher.
    pub fn add_watcher(
        &self,
        mode: impl Into<RunLoopMode>,
        watcher: Watcher,
    ) -> RunLoopResult<WatcherHandle> {
        let watcher = watcher.into_shared();
        let handle = WatcherHandle::new(watcher.clone());
        self.post(Command::AddWatcher {
            mode: mode.into(),
            watcher,
        })?;
        Ok(handle)
    }

    /// Interrupt the loop's current or next wait.
    pub fn wake(&self) {
        self.signal();
    }

    /// Ask the loop to stop at the top of its next cycle.
    pub fn stop(&self) {
        self.request_stop();
    }

    /// Get current state.
    pub fn state(&self) -> RunLoopState {
        RunLoopState::from(self.shared.state.load(Ordering::SeqCst))
    }

    /// Whether the owning thread is inside a run call.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            RunLoopState::Running | RunLoopState::Waiting | RunLoopState::Stopping
        )
    }

    /// The mode being run, if any.
    pub fn current_mode(&self) -> Option<RunLoopMode> {
        self.shared.current_mode.read().clone()
    }

    /// Whether `mode` is the mode being run right now.
    pub fn is_mode_active(&self, mode: &RunLoopMode) -> bool {
        self.shared.current_mode.read().as_ref() == Some(mode)
    }

    /// Whether `mode` holds entries or has registrations queued for it.
    ///
    /// Counts are published by the owning thread at the end of each cycle,
    /// so this may lag behind the loop by one cycle.
    pub fn has_pending_work(&self, mode: &RunLoopMode) -> bool {
        if self.shared.pending.get(mode).is_some_and(|count| *count > 0) {
            return true;
        }
        self.shared.inbox.lock().iter().any(|c| c.targets(mode))
    }

    /// Get metrics.
    pub fn metrics(&self) -> &Arc<RunLoopMetrics> {
        &self.shared.metrics
    }

    /// Whether the caller is on the thread that owns the scheduler.
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    /// Whether the scheduler has been torn down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("state", &self.state())
            .field("current_mode", &self.current_mode())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_handle() -> LoopHandle {
    use crate::clock::ManualClock;
    use crate::poller::{Poller, ScriptedPoller};

    let clock = ManualClock::new();
    let waker = ScriptedPoller::new(clock.clone()).waker();
    LoopHandle::new(Shared::new(
        waker,
        Arc::new(clock),
        Arc::new(RunLoopMetrics::new()),
        Duration::from_millis(100),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_queues_for_owner() {
        let handle = test_handle();
        handle
            .perform_in_mode(RunLoopMode::Default, 0, |_| {})
            .unwrap();
        assert!(handle.has_pending_work(&RunLoopMode::Default));
        assert!(!handle.has_pending_work(&RunLoopMode::ModalPanel));
        assert_eq!(handle.take_inbox().len(), 1);
        assert!(!handle.has_pending_work(&RunLoopMode::Default));
    }

    #[test]
    fn test_closed_handle_refuses_and_cancels() {
        let handle = test_handle();
        assert!(handle.close().is_empty());
        assert!(handle.is_closed());

        let result = handle.add_timer(RunLoopMode::Default, Duration::ZERO, Duration::ZERO, |_| {});
        assert!(matches!(result, Err(RunLoopError::LoopClosed)));
    }

    #[test]
    fn test_wait_on_owner_thread_is_refused() {
        let handle = test_handle();
        let result = handle.perform_and_wait(&[RunLoopMode::Default], |_| {}, None);
        assert!(matches!(result, Err(RunLoopError::WaitOnOwnerThread)));
        assert!(handle.take_inbox().is_empty());
    }

    #[test]
    fn test_perform_and_wait_times_out_when_never_run() {
        let handle = test_handle();
        let remote = handle.clone();
        let result = std::thread::spawn(move || {
            remote.perform_and_wait(&[RunLoopMode::ModalPanel], |_| {}, Some(Duration::from_millis(20)))
        })
        .join()
        .unwrap();

        match result {
            Err(RunLoopError::ModeNotActive { modes, waited }) => {
                assert_eq!(modes, vec![RunLoopMode::ModalPanel]);
                assert_eq!(waited, Duration::from_millis(20));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_stop_request_is_consumed_once() {
        let handle = test_handle();
        handle.set_state(RunLoopState::Running);
        handle.stop();
        assert_eq!(handle.state(), RunLoopState::Stopping);
        assert!(handle.take_stop());
        assert!(!handle.take_stop());
    }

    #[test]
    fn test_published_counts() {
        let handle = test_handle();
        handle.publish_pending(&RunLoopMode::EventTracking, 2);
        assert!(handle.has_pending_work(&RunLoopMode::EventTracking));
        handle.publish_pending(&RunLoopMode::EventTracking, 0);
        assert!(!handle.has_pending_work(&RunLoopMode::EventTracking));
    }

    #[test]
    fn test_current_mode() {
        let handle = test_handle();
        assert_eq!(handle.current_mode(), None);
        handle.set_current_mode(Some(RunLoopMode::Default));
        assert!(handle.is_mode_active(&RunLoopMode::Default));
        assert!(!handle.is_mode_active(&RunLoopMode::ModalPanel));
    }
}
