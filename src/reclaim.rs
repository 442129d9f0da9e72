//! Deferred reclamation of heap elements.
//!
//! Removed elements are handed to the crossbeam-epoch collector and only
//! destroyed once every guard pinned before the removal is dropped. The
//! reclaimer counts elements that are retired but not yet destroyed so
//! teardown can wait for them.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_epoch::{self as epoch, Guard, Shared};

use crate::element::Element;

pub(crate) struct Reclaimer {
    pending: Arc<AtomicUsize>,
}

impl Reclaimer {
    pub(crate) fn new() -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Schedule `elem` for destruction after the current grace period.
    ///
    /// With an unprotected guard the element is destroyed immediately.
    ///
    /// # Safety
    ///
    /// `elem` must be a heap element that is no longer reachable from any
    /// bucket chain, and must not be retired twice.
    pub(crate) unsafe fn retire(&self, elem: Shared<'_, Element>, guard: &Guard) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        // SAFETY: caller guarantees exclusive, unreachable ownership.
        let owned = unsafe { elem.into_owned() };
        guard.defer(move || {
            drop(owned);
            pending.fetch_sub(1, Ordering::Release);
        });
    }

    /// Retired elements not destroyed yet.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Flush the collector until nothing is pending or `rounds` attempts
    /// were made. Returns true once drained.
    pub(crate) fn drain(&self, rounds: usize) -> bool {
        for _ in 0..rounds {
            if self.pending() == 0 {
                return true;
            }
            epoch::pin().flush();
            thread::yield_now();
        }
        self.pending() == 0
    }
}
