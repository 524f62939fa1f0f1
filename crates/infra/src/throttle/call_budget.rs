//! Per-run ceiling on outbound calls.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts every downstream call one drain run makes, retries included, and
/// refuses calls past `ceiling`.
#[derive(Debug)]
pub struct CallBudget {
    ceiling: usize,
    used: AtomicUsize,
}

impl CallBudget {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            used: AtomicUsize::new(0),
        }
    }

    /// Reserve one call. `false` once the ceiling is reached.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.ceiling).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> usize {
        self.ceiling.saturating_sub(self.used())
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }
}
