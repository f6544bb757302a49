//! Scheduler execution (`run`, `run_until`, `run_once`, `run_until_woken`).

use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::context::{CycleEnv, CycleOutcome, ModeContext};
use crate::error::RunLoopResult;
use crate::mode::{RunLoopMode, RunLoopRunResult, RunLoopState};
use crate::scheduler::Scheduler;

impl Scheduler {
    /// Run `mode` until it is stopped or has nothing left to do.
    pub fn run(&mut self, mode: impl Into<RunLoopMode>) -> RunLoopResult<RunLoopRunResult> {
        let mode = mode.into();
        self.run_loop(&mode, None)
    }

    /// Run `mode` until it is stopped, has nothing left to do, or `deadline`
    /// passes.
    pub fn run_until(
        &mut self,
        mode: impl Into<RunLoopMode>,
        deadline: Instant,
    ) -> RunLoopResult<RunLoopRunResult> {
        let mode = mode.into();
        self.run_loop(&mode, Some(deadline))
    }

    /// Run a single cycle of `mode`, waiting no later than `limit`.
    ///
    /// Returns `HandledSource` if anything fired, `TimedOut` if the wait
    /// ended without anything firing, `Finished` if the mode is empty.
    pub fn run_once(
        &mut self,
        mode: impl Into<RunLoopMode>,
        limit: Option<Instant>,
    ) -> RunLoopResult<RunLoopRunResult> {
        let mode = mode.into();
        self.enter(&mode);
        let result = loop {
            match self.cycle(&mode, limit, false) {
                Ok(CycleOutcome::Interrupted) => {
                    if limit.is_some_and(|at| at <= self.now()) {
                        break Ok(RunLoopRunResult::TimedOut);
                    }
                }
                Ok(outcome) => break Ok(Self::cycle_result(outcome)),
                Err(e) => break Err(e),
            }
        };
        self.exit();
        result
    }

    /// Block on `mode` until the wake source fires, an entry fires, or
    /// `timeout` elapses (`None` waits indefinitely).
    ///
    /// Blocks even when the mode has nothing registered. Returns whether the
    /// wait was ended by a wake or a fired entry.
    pub fn run_until_woken(
        &mut self,
        mode: impl Into<RunLoopMode>,
        timeout: Option<Duration>,
    ) -> RunLoopResult<bool> {
        let mode = mode.into();
        let limit = timeout.and_then(|t| self.now().checked_add(t));
        self.enter(&mode);
        let result = loop {
            match self.cycle(&mode, limit, true) {
                Ok(CycleOutcome::Polled { fired, woken }) => break Ok(woken || fired > 0),
                Ok(CycleOutcome::Interrupted) => {
                    if limit.is_some_and(|at| at <= self.now()) {
                        break Ok(false);
                    }
                }
                Ok(CycleOutcome::Stopped) | Ok(CycleOutcome::Idle) => break Ok(false),
                Err(e) => break Err(e),
            }
        };
        self.exit();
        result
    }

    fn run_loop(
        &mut self,
        mode: &RunLoopMode,
        deadline: Option<Instant>,
    ) -> RunLoopResult<RunLoopRunResult> {
        info!("RunLoop: running {}", mode);
        self.enter(mode);
        let result = loop {
            match self.cycle(mode, deadline, false) {
                Ok(CycleOutcome::Stopped) => break Ok(RunLoopRunResult::Stopped),
                Ok(CycleOutcome::Idle) => break Ok(RunLoopRunResult::Finished),
                Ok(_) => {
                    if deadline.is_some_and(|at| at <= self.now()) {
                        break Ok(RunLoopRunResult::TimedOut);
                    }
                }
                Err(e) => {
                    error!("RunLoop: {} terminated: {}", mode, e);
                    break Err(e);
                }
            }
        };
        self.exit();
        info!("RunLoop: {} exited ({:?})", mode, result.as_ref().ok());
        result
    }

    fn enter(&mut self, mode: &RunLoopMode) {
        self.handle.set_current_mode(Some(mode.clone()));
        self.handle.set_state(RunLoopState::Running);
        self.handle.metrics().mark_start();
    }

    fn exit(&mut self) {
        self.handle.set_current_mode(None);
        self.handle.set_state(RunLoopState::Stopped);
    }

    fn cycle_result(outcome: CycleOutcome) -> RunLoopRunResult {
        match outcome {
            CycleOutcome::Stopped => RunLoopRunResult::Stopped,
            CycleOutcome::Idle => RunLoopRunResult::Finished,
            CycleOutcome::Polled { fired, .. } if fired > 0 => RunLoopRunResult::HandledSource,
            CycleOutcome::Polled { .. } | CycleOutcome::Interrupted => RunLoopRunResult::TimedOut,
        }
    }

    /// One cycle: drain the inbox, honour a stop request, then poll and fire
    /// `mode` and apply whatever the callbacks registered.
    fn cycle(
        &mut self,
        mode: &RunLoopMode,
        limit: Option<Instant>,
        force_block: bool,
    ) -> RunLoopResult<CycleOutcome> {
        self.handle.metrics().record_iteration();
        self.drain_inbox();

        if self.handle.take_stop() {
            debug!("RunLoop: stop requested in {}", mode);
            if let Some(ctx) = self.contexts.get_mut(mode) {
                ctx.complete();
            }
            self.publish_pending();
            return Ok(CycleOutcome::Stopped);
        }

        let capacity = self.config.poll.buffer_capacity;
        let ctx = self
            .contexts
            .entry(mode.clone())
            .or_insert_with(|| ModeContext::new(mode.clone(), capacity));
        let result = ctx.poll_and_fire(CycleEnv {
            poller: self.poller.as_mut(),
            handle: &self.handle,
            config: &self.config,
            deferred: &mut self.deferred,
            limit,
            force_block,
        });

        self.apply_deferred();
        if let Some(ctx) = self.contexts.get_mut(mode) {
            ctx.settle_state();
        }
        self.publish_pending();
        result
    }
}
