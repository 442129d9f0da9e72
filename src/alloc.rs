//! Element allocators.
//!
//! Both strategies hand out [`Shared`] element pointers usable in bucket
//! chains and take them back once unlinked:
//!
//! - [`Arena`]: every element carved at construction; acquire/release are a
//!   free-list pop/push. `Full` is a hard ceiling.
//! - [`DynamicAlloc`]: elements allocated on demand against an admitted
//!   count and destroyed after an epoch grace period.

use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

use crate::element::{Element, ElementShape, Origin};
use crate::error::{Error, Result};
use crate::freelist::FreeList;
use crate::reclaim::Reclaimer;

pub(crate) struct Arena {
    elements: Box<[Element]>,
    free: FreeList,
}

impl Arena {
    pub(crate) fn new(shape: &ElementShape, capacity: u32, partitions: usize) -> Result<Self> {
        let mut elements = Vec::new();
        elements
            .try_reserve_exact(capacity as usize)
            .map_err(|_| Error::OutOfMemory)?;
        for index in 0..capacity {
            elements.push(Element::try_new(shape, Origin::Arena(index))?);
        }

        Ok(Self {
            elements: elements.into_boxed_slice(),
            free: FreeList::new(partitions, capacity),
        })
    }

    #[inline]
    fn acquire<'g>(&self, shard: usize) -> Result<Shared<'g, Element>> {
        let index = self.free.pop(shard).ok_or(Error::Full)?;
        Ok(Shared::from(&self.elements[index as usize] as *const Element))
    }

    #[inline]
    fn release(&self, shard: usize, index: u32) {
        self.free.push(shard, index);
    }
}

pub(crate) struct DynamicAlloc {
    shape: ElementShape,
    max_entries: usize,
    count: CachePadded<AtomicUsize>,
    reclaimer: Reclaimer,
}

impl DynamicAlloc {
    pub(crate) fn new(shape: ElementShape, max_entries: usize) -> Self {
        Self {
            shape,
            max_entries,
            count: CachePadded::new(AtomicUsize::new(0)),
            reclaimer: Reclaimer::new(),
        }
    }

    fn acquire<'g>(&self, guard: &'g Guard) -> Result<Shared<'g, Element>> {
        if self.count.fetch_add(1, Ordering::AcqRel) >= self.max_entries {
            self.count.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::Full);
        }

        match Element::try_new(&self.shape, Origin::Heap) {
            Ok(elem) => Ok(Owned::new(elem).into_shared(guard)),
            Err(err) => {
                self.count.fetch_sub(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }

    /// # Safety
    ///
    /// See [`Reclaimer::retire`].
    unsafe fn release(&self, elem: Shared<'_, Element>, guard: &Guard) {
        self.count.fetch_sub(1, Ordering::AcqRel);
        unsafe { self.reclaimer.retire(elem, guard) };
    }

    pub(crate) fn admitted(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }
}

pub(crate) enum ElementAllocator {
    Arena(Arena),
    Dynamic(DynamicAlloc),
}

impl ElementAllocator {
    /// Take an unlinked element. The caller initialises it before linking.
    #[inline]
    pub(crate) fn acquire<'g>(&self, shard: usize, guard: &'g Guard) -> Result<Shared<'g, Element>> {
        match self {
            ElementAllocator::Arena(arena) => arena.acquire(shard),
            ElementAllocator::Dynamic(dynamic) => dynamic.acquire(guard),
        }
    }

    /// Give back an element produced by [`acquire`](Self::acquire).
    ///
    /// # Safety
    ///
    /// `elem` must already be unlinked from every chain and must not be
    /// released twice.
    pub(crate) unsafe fn release(&self, shard: usize, elem: Shared<'_, Element>, guard: &Guard) {
        // SAFETY: released elements are still valid until this call returns.
        let origin = unsafe { elem.deref() }.origin();
        match (self, origin) {
            (ElementAllocator::Arena(arena), Origin::Arena(index)) => arena.release(shard, index),
            (ElementAllocator::Dynamic(dynamic), Origin::Heap) => unsafe {
                dynamic.release(elem, guard)
            },
            _ => debug_assert!(false, "element {origin:?} released to the wrong allocator"),
        }
    }

    pub(crate) fn dynamic(&self) -> Option<&DynamicAlloc> {
        match self {
            ElementAllocator::Dynamic(dynamic) => Some(dynamic),
            ElementAllocator::Arena(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch as epoch;

    const SHAPE: ElementShape = ElementShape {
        key_size: 4,
        value_size: 4,
        slot_stride: None,
        shards: 2,
    };

    #[test]
    fn test_arena_hard_ceiling() {
        let alloc = ElementAllocator::Arena(Arena::new(&SHAPE, 3, 2).unwrap());
        let guard = epoch::pin();

        let taken: Vec<_> = (0..3).map(|i| alloc.acquire(i, &guard).unwrap()).collect();
        assert_eq!(alloc.acquire(0, &guard).unwrap_err(), Error::Full);
        assert_eq!(alloc.acquire(1, &guard).unwrap_err(), Error::Full);

        unsafe { alloc.release(1, taken[0], &guard) };
        assert_eq!(alloc.acquire(0, &guard).unwrap(), taken[0]);
    }

    #[test]
    fn test_dynamic_admission_count() {
        let alloc = ElementAllocator::Dynamic(DynamicAlloc::new(SHAPE, 2));
        let guard = epoch::pin();

        let a = alloc.acquire(0, &guard).unwrap();
        let b = alloc.acquire(0, &guard).unwrap();
        assert_eq!(alloc.acquire(0, &guard).unwrap_err(), Error::Full);
        assert_eq!(alloc.dynamic().unwrap().admitted(), 2);

        unsafe { alloc.release(0, a, &guard) };
        assert_eq!(alloc.dynamic().unwrap().admitted(), 1);
        let c = alloc.acquire(0, &guard).unwrap();
        assert_eq!(alloc.dynamic().unwrap().admitted(), 2);

        unsafe {
            alloc.release(0, b, &guard);
            alloc.release(0, c, &guard);
        }
        assert_eq!(alloc.dynamic().unwrap().admitted(), 0);
    }
}
