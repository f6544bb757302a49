//! Run loop metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Run loop metrics.
///
/// Written by the owning thread, readable from any thread through a
/// [`LoopHandle`](crate::LoopHandle).
#[derive(Debug, Default)]
pub struct RunLoopMetrics {
    /// Whether recording is switched on.
    enabled: bool,

    /// Total number of cycles.
    pub iterations: AtomicU64,

    /// Total timer callbacks invoked.
    pub timers_fired: AtomicU64,

    /// Total performer actions invoked.
    pub performers_fired: AtomicU64,

    /// Total watcher callbacks invoked.
    pub watchers_fired: AtomicU64,

    /// Number of waits ended by the wake source.
    pub wakeups: AtomicU64,

    /// Number of failed OS waits.
    pub poll_failures: AtomicU64,

    /// Total time spent in the OS wait (microseconds).
    pub wait_time_us: AtomicU64,

    /// Total time spent firing callbacks (microseconds).
    pub process_time_us: AtomicU64,

    /// Start time.
    start_time: parking_lot::RwLock<Option<Instant>>,
}

impl RunLoopMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Create metrics that record only when `enabled` is set.
    pub fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    /// Whether recording is switched on.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Mark the start of the run loop. Later calls keep the first mark.
    pub fn mark_start(&self) {
        let mut start = self.start_time.write();
        if start.is_none() {
            *start = Some(Instant::now());
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    fn add(&self, counter: &AtomicU64, value: u64) {
        if self.enabled {
            counter.fetch_add(value, Ordering::Relaxed);
        }
    }

    /// Record a cycle.
    pub fn record_iteration(&self) {
        self.add(&self.iterations, 1);
    }

    /// Record a timer fire.
    pub fn record_timer_fired(&self) {
        self.add(&self.timers_fired, 1);
    }

    /// Record a performer run.
    pub fn record_performer_fired(&self) {
        self.add(&self.performers_fired, 1);
    }

    /// Record a watcher callback.
    pub fn record_watcher_fired(&self) {
        self.add(&self.watchers_fired, 1);
    }

    /// Record a wakeup.
    pub fn record_wakeup(&self) {
        self.add(&self.wakeups, 1);
    }

    /// Record a failed OS wait.
    pub fn record_poll_failure(&self) {
        self.add(&self.poll_failures, 1);
    }

    /// Record wait time.
    pub fn record_wait_time(&self, duration_us: u64) {
        self.add(&self.wait_time_us, duration_us);
    }

    /// Record process time.
    pub fn record_process_time(&self, duration_us: u64) {
        self.add(&self.process_time_us, duration_us);
    }

    /// Get a snapshot of the metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            uptime_secs: self.uptime_secs(),
            iterations: self.iterations.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            performers_fired: self.performers_fired.load(Ordering::Relaxed),
            watchers_fired: self.watchers_fired.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            wait_time_us: self.wait_time_us.load(Ordering::Relaxed),
            process_time_us: self.process_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub iterations: u64,
    pub timers_fired: u64,
    pub performers_fired: u64,
    pub watchers_fired: u64,
    pub wakeups: u64,
    pub poll_failures: u64,
    pub wait_time_us: u64,
    pub process_time_us: u64,
}

impl MetricsSnapshot {
    /// Total callbacks of any kind.
    pub fn total_fired(&self) -> u64 {
        self.timers_fired + self.performers_fired + self.watchers_fired
    }

    /// Calculate average wait time per cycle in milliseconds.
    pub fn avg_wait_time_ms(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        (self.wait_time_us as f64 / self.iterations as f64) / 1000.0
    }

    /// Calculate average process time per cycle in milliseconds.
    pub fn avg_process_time_ms(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        (self.process_time_us as f64 / self.iterations as f64) / 1000.0
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
