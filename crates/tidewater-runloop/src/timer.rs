//! Timers: one-shot or repeating deferred actions with a fire time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::entry::{EntryId, EntryKind, Validity};
use crate::error::RunLoopResult;
use crate::loop_context::LoopContext;

/// Timer callback. Invoked on the loop's thread each time the timer fires.
pub type TimerAction = Box<dyn FnMut(&mut LoopContext<'_>) + Send>;

/// When a timer should first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireTime {
    /// A monotonic instant.
    At(Instant),
    /// A delay from registration.
    After(Duration),
    /// A wall-clock date, converted against the loop clock on registration.
    Wall(DateTime<Utc>),
}

/// Stand-in delay for fire times beyond what an `Instant` can hold.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

impl FireTime {
    /// Resolve to a monotonic instant relative to `now`.
    ///
    /// Wall-clock dates in the past resolve to `now`. Delays too large to
    /// represent are clamped to a far-future instant, so such a timer keeps
    /// waiting instead of firing early.
    pub fn resolve(self, now: Instant) -> Instant {
        match self {
            FireTime::At(at) => at,
            FireTime::After(delay) => saturating_add(now, delay),
            FireTime::Wall(date) => {
                let delay = (date - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                saturating_add(now, delay)
            }
        }
    }
}

fn saturating_add(now: Instant, delay: Duration) -> Instant {
    if let Some(at) = now.checked_add(delay) {
        return at;
    }
    let mut step = delay.min(FAR_FUTURE);
    while !step.is_zero() {
        if let Some(at) = now.checked_add(step) {
            return at;
        }
        step /= 2;
    }
    now
}

impl From<Instant> for FireTime {
    fn from(at: Instant) -> Self {
        FireTime::At(at)
    }
}

impl From<Duration> for FireTime {
    fn from(delay: Duration) -> Self {
        FireTime::After(delay)
    }
}

impl From<DateTime<Utc>> for FireTime {
    fn from(date: DateTime<Utc>) -> Self {
        FireTime::Wall(date)
    }
}

/// State shared between a timer's handle and the mode collection holding it.
pub(crate) struct TimerShared {
    validity: Validity,
    interval: Duration,
    next_fire: Mutex<Instant>,
    fire_count: AtomicU64,
    action: Mutex<TimerAction>,
}

impl TimerShared {
    pub(crate) fn new(fire_at: Instant, interval: Duration, action: TimerAction) -> Arc<Self> {
        Arc::new(Self {
            validity: Validity::new(EntryKind::Timer),
            interval,
            next_fire: Mutex::new(fire_at),
            fire_count: AtomicU64::new(0),
            action: Mutex::new(action),
        })
    }

    pub(crate) fn id(&self) -> EntryId {
        self.validity.id()
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }

    pub(crate) fn expire(&self) {
        self.validity.clear();
    }

    pub(crate) fn set_next_fire(&self, at: Instant) {
        *self.next_fire.lock() = at;
    }

    /// The fire time following a fire scheduled for `fired_at`, skipping
    /// any periods that already lie at or before `now`.
    ///
    /// `None` for one-shot timers, and for repeating timers whose next fire
    /// time cannot be represented; either way the timer expires.
    pub(crate) fn next_after(&self, fired_at: Instant, now: Instant) -> Option<Instant> {
        if self.interval.is_zero() {
            return None;
        }
        let elapsed = now.saturating_duration_since(fired_at);
        let periods = elapsed.as_nanos() / self.interval.as_nanos() + 1;
        let periods = u32::try_from(periods).unwrap_or(u32::MAX);
        fired_at
            .checked_add(self.interval.saturating_mul(periods))
            .filter(|next| *next > now)
            .or_else(|| now.checked_add(self.interval))
    }

    pub(crate) fn fire(&self, cx: &mut LoopContext<'_>) {
        self.fire_count.fetch_add(1, Ordering::Relaxed);
        let mut action = self.action.lock();
        (action)(cx);
    }
}

/// Handle onto a registered timer.
#[derive(Clone)]
pub struct TimerHandle {
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    pub(crate) fn new(shared: Arc<TimerShared>) -> Self {
        Self { shared }
    }

    /// Get the timer ID.
    pub fn id(&self) -> EntryId {
        self.shared.id()
    }

    /// Get the repeat interval (zero for one-shot timers).
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Check if the timer repeats.
    pub fn is_repeating(&self) -> bool {
        !self.shared.interval.is_zero()
    }

    /// Check if the timer can still fire.
    pub fn is_valid(&self) -> bool {
        self.shared.is_valid()
    }

    /// Number of times the timer has fired.
    pub fn fire_count(&self) -> u64 {
        self.shared.fire_count.load(Ordering::Relaxed)
    }

    /// The instant the timer fires next (or last fired, once expired).
    pub fn next_fire(&self) -> Instant {
        *self.shared.next_fire.lock()
    }

    /// Stop the timer from ever firing again.
    ///
    /// Takes effect before the next invocation, even one already due in the
    /// current cycle. Safe to call from any thread.
    pub fn invalidate(&self) -> RunLoopResult<()> {
        self.shared.validity.invalidate()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id())
            .field("interval", &self.interval())
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A timer as held in a mode's collection.
pub(crate) struct TimerEntry {
    pub(crate) shared: Arc<TimerShared>,
    pub(crate) fire_at: Instant,
    pub(crate) seq: u64,
}

impl TimerEntry {
    pub(crate) fn key(&self) -> (Instant, u64) {
        (self.fire_at, self.seq)
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
