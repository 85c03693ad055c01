//! Bounded admission of concurrent connections.
//!
//! The active count is only ever changed through [`Admission::try_admit`] and
//! the `Drop` of the [`AdmissionSlot`] it hands out, so every successful
//! admission is released exactly once whichever way the handler exits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct Admission {
    active: AtomicUsize,
    max: usize,
}

impl Admission {
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// Reserve a slot if fewer than `max` connections are active.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| AdmissionSlot {
                admission: Arc::clone(self),
            })
    }

    fn release(&self) {
        let prev = self.active.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "admission released more often than admitted");
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// One reserved connection slot; released on drop.
#[derive(Debug)]
pub struct AdmissionSlot {
    admission: Arc<Admission>,
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        self.admission.release();
    }
}
