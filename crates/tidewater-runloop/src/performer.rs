//! Performers: actions run once on the next cycle of a mode.
//!
//! A performer may be registered in several modes at once; it runs in
//! whichever of them is run first and is then gone from all of them.
//! Performers posted with `perform_and_wait` carry a [`Completion`] the
//! posting thread blocks on.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::entry::{EntryId, EntryKind, Validity};
use crate::error::RunLoopResult;
use crate::loop_context::LoopContext;

/// Performer action. Invoked at most once, on the loop's thread.
pub type PerformAction = Box<dyn FnOnce(&mut LoopContext<'_>) + Send>;

/// Progress of a performer someone is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompletionState {
    Pending,
    Running,
    Done,
    Cancelled,
}

/// Rendezvous between the loop thread and a thread blocked in
/// `perform_and_wait`.
#[derive(Debug)]
pub(crate) struct Completion {
    state: Mutex<CompletionState>,
    cond: Condvar,
}

impl Completion {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CompletionState::Pending),
            cond: Condvar::new(),
        })
    }

    /// Claim the performer for running. Fails once the waiter gave up.
    pub(crate) fn begin(&self) -> bool {
        let mut state = self.state.lock();
        if *state == CompletionState::Pending {
            *state = CompletionState::Running;
            true
        } else {
            false
        }
    }

    fn settle(&self, outcome: CompletionState) {
        let mut state = self.state.lock();
        *state = outcome;
        self.cond.notify_all();
    }

    /// Give up on a performer that has not started. Returns whether it was
    /// still pending.
    pub(crate) fn cancel(&self) -> bool {
        let mut state = self.state.lock();
        if *state == CompletionState::Pending {
            *state = CompletionState::Cancelled;
            self.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// Block until the performer is done or cancelled, or `timeout` elapses
    /// (`None` waits indefinitely). Returns the state observed last.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> CompletionState {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();
        loop {
            if matches!(*state, CompletionState::Done | CompletionState::Cancelled) {
                return *state;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        return *state;
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
    }
}

/// Settles a claimed completion even if the action unwinds.
struct RunGuard<'a> {
    completion: Option<&'a Completion>,
    finished: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(completion) = self.completion {
            let outcome = if self.finished {
                CompletionState::Done
            } else {
                CompletionState::Cancelled
            };
            completion.settle(outcome);
        }
    }
}

/// State shared between a performer's handle and every mode holding it.
pub(crate) struct PerformerShared {
    validity: Validity,
    order: i32,
    ran: AtomicBool,
    action: Mutex<Option<PerformAction>>,
    completion: Option<Arc<Completion>>,
}

impl PerformerShared {
    pub(crate) fn new(order: i32, action: PerformAction) -> Arc<Self> {
        Self::build(order, action, None)
    }

    pub(crate) fn with_completion(
        order: i32,
        action: PerformAction,
        completion: Arc<Completion>,
    ) -> Arc<Self> {
        Self::build(order, action, Some(completion))
    }

    fn build(order: i32, action: PerformAction, completion: Option<Arc<Completion>>) -> Arc<Self> {
        Arc::new(Self {
            validity: Validity::new(EntryKind::Performer),
            order,
            ran: AtomicBool::new(false),
            action: Mutex::new(Some(action)),
            completion,
        })
    }

    pub(crate) fn id(&self) -> EntryId {
        self.validity.id()
    }

    pub(crate) fn order(&self) -> i32 {
        self.order
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }

    /// Run the action if nobody ran or cancelled it yet.
    pub(crate) fn run(&self, cx: &mut LoopContext<'_>) -> bool {
        if !self.validity.clear() {
            return false;
        }
        if let Some(completion) = &self.completion {
            if !completion.begin() {
                return false;
            }
        }
        let Some(action) = self.action.lock().take() else {
            return false;
        };

        let mut guard = RunGuard {
            completion: self.completion.as_deref(),
            finished: false,
        };
        action(cx);
        self.ran.store(true, Ordering::SeqCst);
        guard.finished = true;
        true
    }

    /// Cancel before running, releasing any waiter.
    pub(crate) fn cancel(&self) -> bool {
        let cleared = self.validity.clear();
        if cleared {
            if let Some(completion) = &self.completion {
                completion.cancel();
            }
            self.action.lock().take();
        }
        cleared
    }
}

/// Handle onto a registered performer.
#[derive(Clone)]
pub struct PerformerHandle {
    shared: Arc<PerformerShared>,
}

impl PerformerHandle {
    pub(crate) fn new(shared: Arc<PerformerShared>) -> Self {
        Self { shared }
    }

    /// Get the performer ID.
    pub fn id(&self) -> EntryId {
        self.shared.id()
    }

    /// Same-cycle ordering key (lower runs first).
    pub fn order(&self) -> i32 {
        self.shared.order
    }

    /// Whether the performer is still waiting to run.
    pub fn is_valid(&self) -> bool {
        self.shared.is_valid()
    }

    /// Whether the action ran to completion.
    pub fn has_run(&self) -> bool {
        self.shared.ran.load(Ordering::SeqCst)
    }

    /// Cancel the performer if it has not run yet.
    pub fn invalidate(&self) -> RunLoopResult<()> {
        if self.shared.cancel() {
            Ok(())
        } else {
            self.shared.validity.invalidate()
        }
    }
}

impl fmt::Debug for PerformerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformerHandle")
            .field("id", &self.id())
            .field("order", &self.order())
            .field("valid", &self.is_valid())
            .field("ran", &self.has_run())
            .finish()
    }
}

/// A performer as held in a mode's collection.
pub(crate) struct PerformerEntry {
    pub(crate) shared: Arc<PerformerShared>,
    pub(crate) seq: u64,
}

impl PerformerEntry {
    pub(crate) fn key(&self) -> (i32, u64) {
        (self.shared.order(), self.seq)
    }
}

#[cfg(test)]
#[path = "performer_tests.rs"]
mod tests;
