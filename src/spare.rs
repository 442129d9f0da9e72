//! Per-shard spare elements.
//!
//! Each shard keeps exactly one parked element. When a dynamic store cannot
//! admit a new element but the write targets a key that already exists, the
//! calling shard's spare stands in for the replacement element and the
//! element it replaces is parked in the emptied slot. The number of
//! elements in existence never changes across a swap, so the admitted count
//! is left alone.
//!
//! A parked element may still be under a lock-free reader that reached it
//! before it was unlinked. Readers validate the element sequence and bucket
//! stamp, so re-initialising a parked element is safe without a grace
//! period.

use core::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

use crate::element::{Disposition, Element, ElementShape, Origin};
use crate::error::Result;

pub(crate) struct SparePool {
    slots: Box<[CachePadded<Atomic<Element>>]>,
}

impl SparePool {
    pub(crate) fn new(shape: &ElementShape, shards: usize) -> Result<Self> {
        let slots = (0..shards)
            .map(|_| {
                let elem = Element::try_new(shape, Origin::Heap)?;
                elem.park_spare();
                Ok(CachePadded::new(Atomic::from(Owned::new(elem))))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    /// Take `shard`'s spare. `None` while another swap on the same shard
    /// holds it.
    pub(crate) fn try_claim_spare<'g>(
        &self,
        shard: usize,
        guard: &'g Guard,
    ) -> Option<Shared<'g, Element>> {
        let spare = self.slots[shard].swap(Shared::null(), Ordering::AcqRel, guard);
        // SAFETY: parked elements live until the pool is dropped.
        let elem = unsafe { spare.as_ref() }?;
        let claimed = elem.claim_spare();
        debug_assert!(claimed, "parked element was not SpareFree");
        Some(spare)
    }

    /// Park `elem`, just unlinked, as `shard`'s new spare.
    pub(crate) fn return_spare(&self, shard: usize, elem: Shared<'_, Element>, guard: &Guard) {
        // SAFETY: the caller owns the unlinked element.
        unsafe { elem.deref() }.park_spare();
        let previous = self.slots[shard].swap(elem, Ordering::AcqRel, guard);
        debug_assert!(previous.is_null(), "spare slot refilled twice");
    }

    /// Spares currently parked.
    pub(crate) fn available(&self) -> usize {
        let guard = crossbeam_epoch::pin();
        self.slots
            .iter()
            .filter(|s| !s.load(Ordering::Acquire, &guard).is_null())
            .count()
    }
}

impl Drop for SparePool {
    fn drop(&mut self) {
        // SAFETY: `&mut self`, no swap is in flight.
        let guard = unsafe { crossbeam_epoch::unprotected() };
        for slot in self.slots.iter() {
            let spare = slot.swap(Shared::null(), Ordering::Relaxed, guard);
            if !spare.is_null() {
                debug_assert_eq!(unsafe { spare.deref() }.disposition(), Disposition::SpareFree);
                drop(unsafe { spare.into_owned() });
            }
        }
    }
}
