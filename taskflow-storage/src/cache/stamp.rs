//! Write stamps for start-order conflict resolution.
//!
//! Writes to a key settle in completion order, not issue order. A slow
//! background refresh that started before an optimistic mutation must not
//! overwrite it when it finally lands. Every write attempt therefore takes a
//! stamp when it is *initiated*, and a settling write is applied only if its
//! stamp is newer than the last one applied to that key.

use std::fmt;

/// A point in a key's write history.
///
/// Stamps are ordered first by epoch (bumped whenever the store is cleared,
/// e.g. on sign-out) and then by a per-key sequence. A stamp from an older
/// epoch is never applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriteStamp {
    pub epoch: u64,
    pub sequence: u64,
}

impl WriteStamp {
    pub fn new(epoch: u64, sequence: u64) -> Self {
        Self { epoch, sequence }
    }

    /// The stamp a key starts with before any write was applied.
    pub fn zero(epoch: u64) -> Self {
        Self { epoch, sequence: 0 }
    }

    /// Check if this stamp was initiated after `other`.
    pub fn is_newer_than(&self, other: &WriteStamp) -> bool {
        self > other
    }
}

impl fmt::Display for WriteStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.sequence)
    }
}

/// Per-key stamp bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct StampLedger {
    /// Last sequence handed out.
    issued: u64,
    /// Stamp of the write currently reflected in the entry.
    applied: WriteStamp,
}

impl StampLedger {
    pub(crate) fn new(epoch: u64) -> Self {
        Self {
            issued: 0,
            applied: WriteStamp::zero(epoch),
        }
    }

    /// Hand out the next stamp for a write being initiated now.
    pub(crate) fn issue(&mut self, epoch: u64) -> WriteStamp {
        self.issued += 1;
        WriteStamp::new(epoch, self.issued)
    }

    pub(crate) fn applied(&self) -> WriteStamp {
        self.applied
    }

    /// Record `stamp` as applied if it is newer than the current one.
    ///
    /// Returns false when the write is stale and must be discarded.
    pub(crate) fn try_apply(&mut self, stamp: WriteStamp) -> bool {
        if stamp.is_newer_than(&self.applied) {
            self.applied = stamp;
            true
        } else {
            false
        }
    }

    /// True while `stamp` is still the last applied write.
    pub(crate) fn is_current(&self, stamp: WriteStamp) -> bool {
        self.applied == stamp
    }
}
