//! # Tidewater RunLoop
//!
//! A single-threaded cooperative run loop multiplexing timers, deferred
//! performers and descriptor readiness across named modes.
//!
//! ## Design
//!
//! - **Mode isolation**: entries are registered into a mode; only the mode
//!   being run is polled.
//! - **One wait per cycle**: the only blocking point is a single OS wait
//!   bounded by the earliest timer, the caller's limit date and the
//!   configured cap.
//! - **Deterministic firing**: timers (by fire time), then performers (by
//!   order), then watchers (round-robin from a rotating start index).
//! - **Cross-thread work through a queue**: other threads hold a
//!   [`LoopHandle`], which queues registrations and writes to a self-wake
//!   pipe so a blocked wait returns promptly.
//!
//! ## Architecture
//!
//! ```text
//! other threads ── LoopHandle ──► inbox ──┐            ┌── wake pipe
//!                                         ▼            ▼
//! owner thread:  Scheduler::run(mode) ─► ModeContext ─► Poller::wait
//!                                         │
//!                     timers ─► performers ─► watchers ─► callbacks
//!                                                          │
//!                        LoopContext (deferred registrations)
//! ```
//!
//! ## Key Components
//!
//! - [`Scheduler`]: the per-thread loop
//! - [`LoopHandle`]: `Send + Sync` access from other threads
//! - [`LoopContext`]: what callbacks see while they run
//! - [`Watcher`]: readiness interest in a descriptor or custom source
//! - [`Poller`]: OS readiness abstraction ([`SysPoller`], [`ScriptedPoller`])
//! - [`Clock`]: monotonic time source ([`MonotonicClock`], [`ManualClock`])
//! - [`registry`]: one lazily created scheduler per thread
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tidewater_runloop::{RunLoopConfig, RunLoopMode, Scheduler};
//!
//! let mut scheduler = Scheduler::new(RunLoopConfig::default()).unwrap();
//! scheduler.add_timer(RunLoopMode::Default, Duration::from_millis(10), Duration::ZERO, |cx| {
//!     println!("fired in {}", cx.mode());
//! });
//!
//! let handle = scheduler.handle();
//! std::thread::spawn(move || {
//!     handle
//!         .perform_and_wait(&[RunLoopMode::Default], |_| println!("on the loop"), None)
//!         .unwrap();
//! });
//!
//! scheduler
//!     .run_until_woken(RunLoopMode::Default, Some(Duration::from_secs(1)))
//!     .unwrap();
//! ```

pub mod clock;
pub mod config;
mod context;
pub mod entry;
pub mod error;
mod handle;
mod loop_context;
pub mod metrics;
pub mod mode;
pub mod performer;
pub mod poller;
pub mod registry;
mod scheduler;
mod scheduler_run;
pub mod timer;
pub mod watcher;

// Re-exports
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{FairnessConfig, PerformConfig, PollConfig, RunLoopConfig};
pub use context::EntryCounts;
pub use entry::{EntryId, EntryKind};
pub use error::{RunLoopError, RunLoopResult};
pub use handle::LoopHandle;
pub use loop_context::LoopContext;
pub use metrics::{MetricsSnapshot, RunLoopMetrics};
pub use mode::{ContextState, RunLoopMode, RunLoopRunResult, RunLoopState};
pub use performer::{PerformAction, PerformerHandle};
pub use poller::{
    Interest, PipeWaker, PollEvent, PollRequest, Poller, Readiness, ScriptedPoller, SysPoller,
    WaitLog, WaitOutcome, WakeSignal,
};
pub use scheduler::Scheduler;
pub use timer::{FireTime, TimerAction, TimerHandle};
pub use watcher::{WatchCallback, WatchDecision, WatchPredicate, WatchSource, Watcher, WatcherHandle};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
