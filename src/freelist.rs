//! Lock-free free-list of arena indices, partitioned per shard.
//!
//! Each partition is a Treiber stack threaded through `links`. The head
//! packs a 32-bit tag with the top index so that a pop racing with a
//! pop+push of the same index fails its CAS instead of installing a stale
//! successor.

use core::sync::atomic::{AtomicU32, Ordering};

use crossbeam_utils::{Backoff, CachePadded};
use portable_atomic::AtomicU64;

const NIL: u32 = u32::MAX;

#[inline]
fn pack(tag: u32, index: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

pub(crate) struct FreeList {
    heads: Box<[CachePadded<AtomicU64>]>,
    links: Box<[AtomicU32]>,
}

impl FreeList {
    /// Free-list holding every index in `0..capacity`, spread round-robin
    /// over `partitions` stacks.
    pub(crate) fn new(partitions: usize, capacity: u32) -> Self {
        let partitions = partitions.max(1);
        let mut tops = vec![NIL; partitions];
        let mut links = Vec::with_capacity(capacity as usize);

        for index in 0..capacity {
            let p = index as usize % partitions;
            links.push(AtomicU32::new(tops[p]));
            tops[p] = index;
        }

        let heads = tops
            .into_iter()
            .map(|top| CachePadded::new(AtomicU64::new(pack(0, top))))
            .collect();

        Self {
            heads,
            links: links.into_boxed_slice(),
        }
    }

    #[inline]
    fn partition(&self, shard: usize) -> usize {
        shard % self.heads.len()
    }

    /// Return `index` to `shard`'s partition.
    pub(crate) fn push(&self, shard: usize, index: u32) {
        let head = &self.heads[self.partition(shard)];
        let backoff = Backoff::new();
        let mut current = head.load(Ordering::Relaxed);

        loop {
            let (tag, top) = unpack(current);
            self.links[index as usize].store(top, Ordering::Relaxed);

            match head.compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), index),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }

    /// Pop from `shard`'s partition, then from the others in order.
    ///
    /// With no concurrent push, `None` means every partition was empty.
    pub(crate) fn pop(&self, shard: usize) -> Option<u32> {
        let first = self.partition(shard);
        let n = self.heads.len();
        (0..n).find_map(|offset| self.pop_from((first + offset) % n))
    }

    fn pop_from(&self, partition: usize) -> Option<u32> {
        let head = &self.heads[partition];
        let backoff = Backoff::new();
        let mut current = head.load(Ordering::Acquire);

        loop {
            let (tag, top) = unpack(current);
            if top == NIL {
                return None;
            }
            let next = self.links[top as usize].load(Ordering::Relaxed);

            match head.compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), next),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(top),
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }
}
