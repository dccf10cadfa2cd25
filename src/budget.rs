//! Run-scoped external call budget

use std::sync::atomic::{AtomicU32, Ordering};

/// Counts down the external lookups a run may still issue.
///
/// Created at run start, never persisted. `try_consume` is a single atomic
/// compare-and-swap loop, so concurrent workers cannot overspend.
#[derive(Debug)]
pub struct Budget {
    remaining: AtomicU32,
    max: u32,
}

impl Budget {
    pub fn new(max: u32) -> Self {
        Self {
            remaining: AtomicU32::new(max),
            max,
        }
    }

    /// Budget of zero; the external tier never calls out
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Take one unit. Returns false, and changes nothing, once exhausted.
    pub fn try_consume(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn consumed(&self) -> u32 {
        self.max - self.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}
