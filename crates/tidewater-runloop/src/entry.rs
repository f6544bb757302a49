//! Identity shared by timers, performers and watchers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{RunLoopError, RunLoopResult};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a registered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of entry, used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Timer,
    Performer,
    Watcher,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Timer => write!(f, "timer"),
            EntryKind::Performer => write!(f, "performer"),
            EntryKind::Watcher => write!(f, "watcher"),
        }
    }
}

/// Validity flag readable from any thread.
///
/// Handles flip it; the owning loop only ever reads it and drops entries
/// whose flag is cleared.
#[derive(Debug)]
pub(crate) struct Validity {
    kind: EntryKind,
    id: EntryId,
    valid: AtomicBool,
}

impl Validity {
    pub(crate) fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            id: EntryId::next(),
            valid: AtomicBool::new(true),
        }
    }

    pub(crate) fn id(&self) -> EntryId {
        self.id
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether this call was the one to clear it.
    pub(crate) fn clear(&self) -> bool {
        self.valid.swap(false, Ordering::SeqCst)
    }

    /// Clear the flag, reporting an already-cleared flag as an invalid handle.
    pub(crate) fn invalidate(&self) -> RunLoopResult<()> {
        if self.clear() {
            Ok(())
        } else {
            Err(RunLoopError::InvalidHandle {
                kind: self.kind,
                id: self.id,
            })
        }
    }
}
