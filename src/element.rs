//! Element layout shared by both allocators.
//!
//! Every field a lock-free reader touches is atomic. Arena elements and
//! spare elements are recycled without waiting for a grace period, so a
//! reader may be looking at an element while it is re-initialised for a
//! different key; the even/odd `seq` counter lets the reader notice and
//! restart instead of returning a mix of old and new bytes.

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering, fence};

use crossbeam_epoch::Atomic;
use portable_atomic::AtomicU64;

use crate::error::{Error, Result};

/// Allocator bookkeeping carried by every element.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Ordinary element from the arena or the heap.
    NotSpare = 0,
    /// Parked in a shard's spare slot.
    SpareFree = 1,
    /// Claimed from a spare slot and linked into a chain.
    SpareInUse = 2,
}

impl Disposition {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Disposition::SpareFree,
            2 => Disposition::SpareInUse,
            _ => Disposition::NotSpare,
        }
    }
}

/// Which allocator produced an element. Fixed for the element's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Arena slot index.
    Arena(u32),
    /// Individually allocated; reclaimed through the epoch collector or
    /// parked as a spare.
    Heap,
}

/// Value storage.
pub(crate) enum Payload {
    /// A single value of `value_size` bytes.
    Inline(Box<[AtomicU8]>),
    /// One slot per shard, `stride` bytes apart.
    PerShard { slots: Box<[AtomicU8]>, stride: usize },
}

/// Shape of the elements a store allocates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ElementShape {
    pub(crate) key_size: usize,
    pub(crate) value_size: usize,
    /// `Some(stride)` for per-shard layouts.
    pub(crate) slot_stride: Option<usize>,
    pub(crate) shards: usize,
}

pub(crate) struct Element {
    hash: AtomicU64,
    seq: AtomicU32,
    bucket: AtomicU32,
    disposition: AtomicU8,
    origin: Origin,
    pub(crate) next: Atomic<Element>,
    key: Box<[AtomicU8]>,
    payload: Payload,
}

impl Element {
    /// Allocate a zeroed element. Buffer allocation is fallible so that
    /// allocator exhaustion surfaces as [`Error::OutOfMemory`].
    pub(crate) fn try_new(shape: &ElementShape, origin: Origin) -> Result<Self> {
        let key = zeroed(shape.key_size)?;
        let payload = match shape.slot_stride {
            None => Payload::Inline(zeroed(shape.value_size)?),
            Some(stride) => Payload::PerShard {
                slots: zeroed(stride * shape.shards)?,
                stride,
            },
        };
        Ok(Self {
            hash: AtomicU64::new(0),
            seq: AtomicU32::new(0),
            bucket: AtomicU32::new(u32::MAX),
            disposition: AtomicU8::new(Disposition::NotSpare as u8),
            origin,
            next: Atomic::null(),
            key,
            payload,
        })
    }

    #[inline]
    pub(crate) fn origin(&self) -> Origin {
        self.origin
    }

    #[inline]
    pub(crate) fn hash(&self) -> u64 {
        self.hash.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn bucket(&self) -> u32 {
        self.bucket.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn key_eq(&self, key: &[u8]) -> bool {
        self.key.len() == key.len()
            && self
                .key
                .iter()
                .zip(key)
                .all(|(a, b)| a.load(Ordering::Relaxed) == *b)
    }

    pub(crate) fn load_key(&self, out: &mut [u8]) {
        load_bytes(&self.key, out);
    }

    // ---- disposition ----

    #[inline]
    pub(crate) fn disposition(&self) -> Disposition {
        Disposition::from_u8(self.disposition.load(Ordering::Acquire))
    }

    /// `SpareFree -> SpareInUse`. Fails if the spare is already linked.
    #[inline]
    pub(crate) fn claim_spare(&self) -> bool {
        self.disposition
            .compare_exchange(
                Disposition::SpareFree as u8,
                Disposition::SpareInUse as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Tag the element as parked in a spare slot.
    #[inline]
    pub(crate) fn park_spare(&self) {
        self.disposition
            .store(Disposition::SpareFree as u8, Ordering::Release);
    }

    // ---- reader side ----

    /// Start reading; `None` while a writer is mid-update.
    #[inline]
    pub(crate) fn read_begin(&self) -> Option<u32> {
        let seq = self.seq.load(Ordering::Acquire);
        (seq & 1 == 0).then_some(seq)
    }

    /// True if nothing was rewritten since [`read_begin`](Self::read_begin)
    /// returned `seq`.
    #[inline]
    pub(crate) fn read_validate(&self, seq: u32) -> bool {
        fence(Ordering::Acquire);
        self.seq.load(Ordering::Relaxed) == seq
    }

    /// Copy the inline value, or shard `shard`'s slot of a per-shard value.
    pub(crate) fn load_value(&self, shard: usize, out: &mut [u8]) {
        match &self.payload {
            Payload::Inline(bytes) => load_bytes(bytes, out),
            Payload::PerShard { slots, stride } => {
                let start = shard * stride;
                load_bytes(&slots[start..start + out.len()], out);
            }
        }
    }

    // ---- writer side ----
    //
    // Callers hold the element exclusively: either it is unlinked and owned
    // by the caller, or the caller holds the lock of the bucket it is in.

    /// Run `f` with the sequence odd so concurrent readers retry.
    ///
    /// Only for (re)initialising an unlinked element: a reader that finds
    /// the sequence odd restarts from the bucket head and does not wait.
    #[inline]
    pub(crate) fn write<R>(&self, f: impl FnOnce(&Self) -> R) -> R {
        let seq = self.seq.load(Ordering::Relaxed);
        debug_assert!(seq & 1 == 0, "nested element write");
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
        let r = f(self);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
        r
    }

    /// Stamp the element with a new identity.
    pub(crate) fn set_identity(&self, hash: u64, bucket: u32, key: &[u8]) {
        self.hash.store(hash, Ordering::Relaxed);
        self.bucket.store(bucket, Ordering::Relaxed);
        store_bytes(&self.key, key);
    }

    pub(crate) fn store_value(&self, value: &[u8]) {
        match &self.payload {
            Payload::Inline(bytes) => store_bytes(bytes, value),
            Payload::PerShard { slots, stride } => {
                for start in (0..slots.len()).step_by(*stride) {
                    store_bytes(&slots[start..start + value.len()], value);
                }
            }
        }
    }

    /// Write one shard's slot. Inline payloads ignore `shard`.
    pub(crate) fn store_slot(&self, shard: usize, value: &[u8]) {
        match &self.payload {
            Payload::Inline(bytes) => store_bytes(bytes, value),
            Payload::PerShard { slots, stride } => {
                let start = shard * stride;
                store_bytes(&slots[start..start + value.len()], value);
            }
        }
    }

    /// Zero every value byte.
    pub(crate) fn clear_value(&self) {
        let bytes = match &self.payload {
            Payload::Inline(bytes) => bytes,
            Payload::PerShard { slots, .. } => slots,
        };
        for b in bytes.iter() {
            b.store(0, Ordering::Relaxed);
        }
    }
}

fn zeroed(len: usize) -> Result<Box<[AtomicU8]>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    buf.resize_with(len, || AtomicU8::new(0));
    Ok(buf.into_boxed_slice())
}

#[inline]
fn load_bytes(src: &[AtomicU8], dst: &mut [u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = s.load(Ordering::Relaxed);
    }
}

#[inline]
fn store_bytes(dst: &[AtomicU8], src: &[u8]) {
    for (d, s) in dst.iter().zip(src) {
        d.store(*s, Ordering::Relaxed);
    }
}
