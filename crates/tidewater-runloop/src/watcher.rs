//! Watchers: readiness interest in an input source.

use std::fmt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::{EntryId, EntryKind, Validity};
use crate::error::RunLoopResult;
use crate::loop_context::LoopContext;
use crate::poller::{Interest, Readiness};

/// Watcher callback, invoked with the readiness that fired it.
pub type WatchCallback = Box<dyn FnMut(&mut LoopContext<'_>, Readiness) + Send>;

/// Predicate consulted once per cycle before the wait.
pub type WatchPredicate = Box<dyn FnMut() -> WatchDecision + Send>;

/// The input source a watcher observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchSource {
    /// A descriptor included in the OS wait.
    Fd(RawFd),
    /// No descriptor; fired only through a trigger decision.
    Custom,
}

impl WatchSource {
    /// The descriptor, if any.
    pub fn fd(&self) -> Option<RawFd> {
        match self {
            WatchSource::Fd(fd) => Some(*fd),
            WatchSource::Custom => None,
        }
    }
}

/// What a watcher wants from the coming wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchDecision {
    /// The loop may block waiting for this source.
    pub should_block: bool,
    /// Fire this watcher this cycle whether or not the source is ready.
    pub trigger: bool,
}

impl WatchDecision {
    /// Wait for the source.
    pub const BLOCK: WatchDecision = WatchDecision {
        should_block: true,
        trigger: false,
    };

    /// Check the source without blocking on it.
    pub const CHECK: WatchDecision = WatchDecision {
        should_block: false,
        trigger: false,
    };

    /// Fire now without waiting.
    pub const TRIGGER: WatchDecision = WatchDecision {
        should_block: false,
        trigger: true,
    };
}

/// A watcher ready to be registered.
pub struct Watcher {
    source: WatchSource,
    interest: Interest,
    predicate: Option<WatchPredicate>,
    callback: WatchCallback,
}

impl Watcher {
    /// Watch `source` for `interest`.
    ///
    /// A descriptor source must stay open until the watcher is removed.
    pub fn new<F>(source: WatchSource, interest: Interest, callback: F) -> Self
    where
        F: FnMut(&mut LoopContext<'_>, Readiness) + Send + 'static,
    {
        let interest = match source {
            WatchSource::Custom => Interest::Custom,
            WatchSource::Fd(_) => interest,
        };
        Self {
            source,
            interest,
            predicate: None,
            callback: Box::new(callback),
        }
    }

    /// Watch a descriptor for read readiness.
    pub fn readable<F>(fd: &impl AsRawFd, callback: F) -> Self
    where
        F: FnMut(&mut LoopContext<'_>, Readiness) + Send + 'static,
    {
        Self::new(WatchSource::Fd(fd.as_raw_fd()), Interest::Read, callback)
    }

    /// Watch a descriptor for write readiness.
    pub fn writable<F>(fd: &impl AsRawFd, callback: F) -> Self
    where
        F: FnMut(&mut LoopContext<'_>, Readiness) + Send + 'static,
    {
        Self::new(WatchSource::Fd(fd.as_raw_fd()), Interest::Write, callback)
    }

    /// A descriptor-less watcher driven entirely by its predicate.
    ///
    /// Without a predicate it never fires but keeps its mode from being idle.
    pub fn custom<F>(callback: F) -> Self
    where
        F: FnMut(&mut LoopContext<'_>, Readiness) + Send + 'static,
    {
        Self::new(WatchSource::Custom, Interest::Custom, callback)
    }

    /// Decide per cycle whether the loop should block on this source and
    /// whether to fire it unconditionally. Defaults to [`WatchDecision::BLOCK`].
    pub fn should_block<P>(mut self, predicate: P) -> Self
    where
        P: FnMut() -> WatchDecision + Send + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub(crate) fn into_shared(self) -> Arc<WatcherShared> {
        Arc::new(WatcherShared {
            validity: Validity::new(EntryKind::Watcher),
            source: self.source,
            interest: self.interest,
            fire_count: AtomicU64::new(0),
            predicate: Mutex::new(self.predicate),
            callback: Mutex::new(self.callback),
        })
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("source", &self.source)
            .field("interest", &self.interest)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// State shared between a watcher's handle and the mode holding it.
pub(crate) struct WatcherShared {
    validity: Validity,
    source: WatchSource,
    interest: Interest,
    fire_count: AtomicU64,
    predicate: Mutex<Option<WatchPredicate>>,
    callback: Mutex<WatchCallback>,
}

impl WatcherShared {
    pub(crate) fn id(&self) -> EntryId {
        self.validity.id()
    }

    pub(crate) fn source(&self) -> WatchSource {
        self.source
    }

    pub(crate) fn interest(&self) -> Interest {
        self.interest
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.validity.is_valid()
    }

    pub(crate) fn invalidate(&self) -> RunLoopResult<()> {
        self.validity.invalidate()
    }

    pub(crate) fn release(&self) {
        self.validity.clear();
    }

    pub(crate) fn decide(&self) -> WatchDecision {
        match self.predicate.lock().as_mut() {
            Some(predicate) => predicate(),
            None => WatchDecision::BLOCK,
        }
    }

    pub(crate) fn fire(&self, cx: &mut LoopContext<'_>, readiness: Readiness) {
        self.fire_count.fetch_add(1, Ordering::Relaxed);
        let mut callback = self.callback.lock();
        (callback)(cx, readiness);
    }
}

/// Handle onto a registered watcher.
#[derive(Clone)]
pub struct WatcherHandle {
    shared: Arc<WatcherShared>,
}

impl WatcherHandle {
    pub(crate) fn new(shared: Arc<WatcherShared>) -> Self {
        Self { shared }
    }

    /// Get the watcher ID.
    pub fn id(&self) -> EntryId {
        self.shared.id()
    }

    /// The watched source.
    pub fn source(&self) -> WatchSource {
        self.shared.source
    }

    /// The watched readiness.
    pub fn interest(&self) -> Interest {
        self.shared.interest
    }

    /// Whether the watcher is still registered.
    pub fn is_valid(&self) -> bool {
        self.shared.is_valid()
    }

    /// Number of times the callback has run.
    pub fn fire_count(&self) -> u64 {
        self.shared.fire_count.load(Ordering::Relaxed)
    }

    /// Stop watching. Safe to call from any thread; takes effect before the
    /// next callback invocation.
    pub fn remove(&self) -> RunLoopResult<()> {
        self.shared.invalidate()
    }
}

impl fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("id", &self.id())
            .field("source", &self.source())
            .field("interest", &self.interest())
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// A watcher as held in a mode's collection.
pub(crate) struct WatcherEntry {
    pub(crate) shared: Arc<WatcherShared>,
}
