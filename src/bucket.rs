//! Buckets: a chain head readable without locking plus a TTAS spin lock
//! that serialises every mutation of the chain.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

use crate::element::Element;

/// TTAS (test-test-and-set) lock guarding a bucket chain.
///
/// The critical sections it protects never allocate with unbounded
/// latency and never block, so contention is resolved by spinning.
pub(crate) struct BucketLock {
    acquired: AtomicBool,
}

impl BucketLock {
    pub(crate) const fn new() -> Self {
        Self {
            acquired: AtomicBool::new(false),
        }
    }

    /// Acquire the lock
    #[inline]
    pub(crate) fn lock(&self) -> BucketGuard<'_> {
        loop {
            // Test phase: spin on relaxed load (stays in cache)
            while self.acquired.load(Ordering::Relaxed) {
                spin_loop();
            }
            if !self.acquired.swap(true, Ordering::Acquire) {
                return BucketGuard { lock: self };
            }
        }
    }
}

/// RAII guard for a [`BucketLock`]. Releases the lock on drop.
pub(crate) struct BucketGuard<'a> {
    lock: &'a BucketLock,
}

impl Drop for BucketGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.acquired.store(false, Ordering::Release);
    }
}

/// One slot of the bucket array.
pub(crate) struct Bucket {
    pub(crate) head: Atomic<Element>,
    pub(crate) lock: BucketLock,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self {
            head: Atomic::null(),
            lock: BucketLock::new(),
        }
    }

    /// Find `(hash, key)` while holding this bucket's lock.
    ///
    /// Elements reachable from the head cannot be recycled while the lock is
    /// held, so no sequence validation is needed here.
    pub(crate) fn find_locked<'g>(
        &self,
        _locked: &BucketGuard<'_>,
        hash: u64,
        key: &[u8],
        guard: &'g Guard,
    ) -> Option<Shared<'g, Element>> {
        let mut current = self.head.load(Ordering::Acquire, guard);
        while let Some(elem) = unsafe { current.as_ref() } {
            if elem.hash() == hash && elem.key_eq(key) {
                return Some(current);
            }
            current = elem.next.load(Ordering::Acquire, guard);
        }
        None
    }

    /// Initialise `new` with `init` and link it at the head of the chain.
    ///
    /// The successor pointer is written inside the same sequence window as
    /// the identity, so a reader standing on a recycled element never pairs
    /// the new key with the old successor.
    pub(crate) fn link_head<'g>(
        &self,
        _locked: &BucketGuard<'_>,
        new: Shared<'g, Element>,
        guard: &'g Guard,
        init: impl FnOnce(&Element),
    ) {
        let head = self.head.load(Ordering::Relaxed, guard);
        // SAFETY: `new` is unlinked and owned by the caller until published.
        let elem = unsafe { new.deref() };
        elem.write(|e| {
            init(e);
            e.next.store(head, Ordering::Relaxed);
        });
        self.head.store(new, Ordering::Release);
    }

    /// Unlink `target` from the chain. Returns false if it was not linked.
    pub(crate) fn unlink<'g>(
        &self,
        _locked: &BucketGuard<'_>,
        target: Shared<'g, Element>,
        guard: &'g Guard,
    ) -> bool {
        let mut prev_link = &self.head;
        let mut current = prev_link.load(Ordering::Acquire, guard);

        while let Some(elem) = unsafe { current.as_ref() } {
            let next = elem.next.load(Ordering::Acquire, guard);
            if current == target {
                // The unlinked element keeps its `next` so that readers
                // already standing on it can continue their walk.
                prev_link.store(next, Ordering::Release);
                return true;
            }
            prev_link = &elem.next;
            current = next;
        }
        false
    }
}
