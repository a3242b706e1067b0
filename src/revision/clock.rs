//! Hybrid logical clock for revision allocation
//!
//! A timestamp combines wall-clock milliseconds (upper 44 bits) with a
//! per-process counter (lower 20 bits):
//!
//! - If the wall clock moved forward, the counter restarts at zero
//! - If it did not (or went backwards), the previous time is kept and the
//!   counter is bumped
//! - A full counter carries into the time part
//!
//! Foreign revisions are only observed up to `MAX_OBSERVABLE`, which keeps
//! room above every observed value for further allocations.
//!
//! Allocation is a compare-and-swap loop, so concurrent callers never
//! receive the same value and values strictly increase within a process.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use super::RevisionId;

/// Number of low bits reserved for the tie-breaking counter.
const COUNTER_BITS: u32 = 20;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;

/// Largest representable time part.
const MAX_TIME: u64 = u64::MAX >> COUNTER_BITS;

/// Milliseconds kept free above the highest observable revision.
const HEADROOM_MS: u64 = 1 << 24;

/// Highest foreign revision the clock accepts.
const MAX_OBSERVABLE: u64 = ((MAX_TIME - HEADROOM_MS) << COUNTER_BITS) | COUNTER_MASK;

/// Source of physical time in milliseconds.
pub type TimeSource = fn() -> u64;

fn wall_clock_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Anything able to hand out fresh revisions.
pub trait RevisionSource: Send + Sync {
    /// Allocates a revision strictly greater than every earlier one.
    fn next_revision(&self) -> RevisionId;
}

/// Hybrid logical clock.
#[derive(Debug)]
pub struct HybridLogicalClock {
    last: AtomicU64,
    time_source: TimeSource,
}

impl HybridLogicalClock {
    /// Creates a clock driven by the system wall clock.
    pub fn new() -> Self {
        Self::with_time_source(wall_clock_millis)
    }

    /// Creates a clock driven by a custom time source.
    pub fn with_time_source(time_source: TimeSource) -> Self {
        Self {
            last: AtomicU64::new(0),
            time_source,
        }
    }

    /// Splits a timestamp into (milliseconds, counter).
    pub fn decompose(timestamp: u64) -> (u64, u64) {
        (timestamp >> COUNTER_BITS, timestamp & COUNTER_MASK)
    }

    fn assemble(time: u64, count: u64) -> u64 {
        (time.min(MAX_TIME) << COUNTER_BITS) | (count & COUNTER_MASK)
    }

    /// Returns true when later allocations can still exceed `revision`.
    pub fn can_observe(revision: RevisionId) -> bool {
        revision.value() <= MAX_OBSERVABLE
    }

    fn successor(current: u64, physical: u64) -> u64 {
        let (old_time, old_count) = Self::decompose(current);
        if physical > old_time {
            Self::assemble(physical, 0)
        } else if old_count < COUNTER_MASK {
            Self::assemble(old_time, old_count + 1)
        } else {
            // Saturates at the top of the range; unreachable while observed
            // values stay below MAX_OBSERVABLE.
            current.saturating_add(1)
        }
    }

    /// Allocates the next timestamp.
    pub fn next(&self) -> RevisionId {
        let physical = (self.time_source)();
        let mut current = self.last.load(Ordering::Acquire);

        loop {
            let candidate = Self::successor(current, physical.min(MAX_TIME));

            match self.last.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return RevisionId::new(candidate),
                Err(actual) => current = actual,
            }
        }
    }

    /// Advances the clock so that later allocations exceed `seen`.
    ///
    /// Used when a revision produced elsewhere (restore, replication) is
    /// stored verbatim. Values above `MAX_OBSERVABLE` are ignored and
    /// `false` is returned.
    pub fn observe(&self, seen: RevisionId) -> bool {
        if !Self::can_observe(seen) {
            return false;
        }
        self.last.fetch_max(seen.value(), Ordering::AcqRel);
        true
    }

    /// Returns the most recently allocated or observed timestamp.
    pub fn last(&self) -> RevisionId {
        RevisionId::new(self.last.load(Ordering::Acquire))
    }

    /// Allocates a tick for ids that share the revision space
    /// (collection ids, traditional keys).
    pub fn new_tick(&self) -> u64 {
        self.next().value()
    }
}

impl Default for HybridLogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionSource for HybridLogicalClock {
    fn next_revision(&self) -> RevisionId {
        self.next()
    }
}
