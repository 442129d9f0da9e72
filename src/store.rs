//! The map engine.
//!
//! # Architecture
//! - **Buckets**: power-of-two array; chain heads are atomic pointers.
//! - **Writers**: take the bucket's TTAS lock, link replacements at the
//!   chain head first and unlink the old element second.
//! - **Readers**: walk chains with no lock under an epoch guard. Every
//!   element is validated with its reuse sequence and owning bucket, and the
//!   walk restarts if the element was recycled underneath it.
//! - **Reclamation**: heap elements go through crossbeam-epoch; arena
//!   elements and elements parked as spares are recycled immediately.

use core::hash::BuildHasher;
use core::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Guard, Shared};
use foldhash::fast::RandomState;

use crate::alloc::{Arena, DynamicAlloc, ElementAllocator};
use crate::bucket::Bucket;
use crate::config::{AllocatorMode, Geometry, StoreConfig, ValueLayout};
use crate::context::ExecContext;
use crate::element::{Element, ElementShape, Origin};
use crate::error::{Error, Result};
use crate::spare::SparePool;

/// Flush rounds teardown spends waiting for deferred reclamation.
const DRAIN_ROUNDS: usize = 1024;

/// Existence requirement for an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Insert or overwrite.
    #[default]
    Any,
    /// Insert only; fails with [`Error::AlreadyExists`] if present.
    NoExist,
    /// Overwrite only; fails with [`Error::NotFound`] if absent.
    Exist,
}

/// Which per-shard slots a write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShardScope {
    /// Only the calling shard's slot.
    #[default]
    Local,
    /// Every shard's slot. Meant for bulk initialisation.
    AllShards,
}

/// Fixed-size concurrent hash table.
///
/// Keys and values are byte strings of the sizes fixed in the
/// [`StoreConfig`]. Every operation takes the caller's [`ExecContext`].
///
/// ```rust
/// use bucketmap::{ExecContext, Store, StoreConfig, UpdateMode};
///
/// let store = Store::new(StoreConfig::new(4, 4, 16).shards(1)).unwrap();
/// let cpu = ExecContext::task(0);
///
/// store.insert_or_update(cpu, &1u32.to_le_bytes(), &100u32.to_le_bytes(), UpdateMode::Any).unwrap();
/// assert_eq!(store.lookup(cpu, &1u32.to_le_bytes()).unwrap(), 100u32.to_le_bytes());
///
/// store.delete(cpu, &1u32.to_le_bytes()).unwrap();
/// assert!(store.lookup(cpu, &1u32.to_le_bytes()).is_err());
/// ```
pub struct Store<S = RandomState> {
    config: StoreConfig,
    geometry: Geometry,
    buckets: Box<[Bucket]>,
    mask: usize,
    alloc: ElementAllocator,
    spares: Option<SparePool>,
    hasher: S,
}

impl Store<RandomState> {
    /// Build a store with a randomly seeded FoldHash.
    pub fn new(config: StoreConfig) -> Result<Self> {
        Self::with_hasher(config, RandomState::default())
    }
}

impl<S: BuildHasher> Store<S> {
    /// Build a store with a custom hasher.
    pub fn with_hasher(config: StoreConfig, hasher: S) -> Result<Self> {
        let geometry = config.validate()?;
        let shape = ElementShape {
            key_size: config.key_size(),
            value_size: config.value_size(),
            slot_stride: (config.value_layout() == ValueLayout::PerShard)
                .then_some(geometry.slot_stride),
            shards: config.shard_count(),
        };

        let buckets: Box<[Bucket]> = (0..geometry.buckets).map(|_| Bucket::new()).collect();
        let alloc = match config.allocator_mode() {
            AllocatorMode::Preallocated => ElementAllocator::Arena(Arena::new(
                &shape,
                config.max_entries() as u32,
                config.shard_count(),
            )?),
            AllocatorMode::Dynamic => {
                ElementAllocator::Dynamic(DynamicAlloc::new(shape, config.max_entries()))
            }
        };
        let spares = if config.has_spares() {
            Some(SparePool::new(&shape, config.shard_count())?)
        } else {
            None
        };

        tracing::debug!(
            buckets = geometry.buckets,
            max_entries = config.max_entries(),
            key_size = config.key_size(),
            value_size = config.value_size(),
            shards = config.shard_count(),
            spares = geometry.spares,
            footprint = geometry.footprint,
            layout = ?config.value_layout(),
            allocator = ?config.allocator_mode(),
            "store created"
        );

        Ok(Self {
            mask: geometry.buckets - 1,
            config,
            geometry,
            buckets,
            alloc,
            spares,
            hasher,
        })
    }

    // ---- introspection ----

    /// The configuration the store was built from.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.config.max_entries()
    }

    /// Number of shards.
    pub fn shards(&self) -> usize {
        self.config.shard_count()
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Precomputed worst-case footprint in bytes.
    pub fn footprint(&self) -> u64 {
        self.geometry.footprint
    }

    /// Admitted element count; `None` for preallocated stores, whose bound
    /// is the arena itself.
    pub fn admitted(&self) -> Option<usize> {
        self.alloc.dynamic().map(DynamicAlloc::admitted)
    }

    /// Removed elements still waiting for their grace period.
    pub fn pending_reclaims(&self) -> usize {
        self.alloc
            .dynamic()
            .map_or(0, |d| d.reclaimer().pending())
    }

    /// Spare elements currently parked; zero when the store keeps none.
    pub fn spares_available(&self) -> usize {
        self.spares.as_ref().map_or(0, SparePool::available)
    }

    /// Number of keys.
    ///
    /// Walks every chain with the same validation as a lookup, so an
    /// element recycled into another bucket is never followed. Chains are
    /// counted one at a time: with writers active the total is a snapshot
    /// and a key moved between buckets during the walk may be counted twice
    /// or missed.
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        (0..self.buckets.len())
            .map(|idx| self.chain_len(idx, &guard))
            .sum()
    }

    /// True if no key is present.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.buckets
            .iter()
            .all(|b| b.head.load(Ordering::Acquire, &guard).is_null())
    }

    // ---- lookups ----

    /// Copy of the value stored under `key`.
    ///
    /// For per-shard stores this is the calling shard's slot. Never blocks
    /// and never takes a bucket lock.
    pub fn lookup(&self, ctx: ExecContext, key: &[u8]) -> Result<Vec<u8>> {
        let mut out = vec![0; self.config.value_size()];
        self.lookup_into(ctx, key, &mut out)?;
        Ok(out)
    }

    /// Like [`lookup`](Self::lookup) but copies into `out`, which must be
    /// exactly `value_size` bytes. Does not allocate.
    ///
    /// On [`Error::NotFound`] `out` is zeroed; a copy started on an element
    /// that was recycled mid-read never survives.
    pub fn lookup_into(&self, ctx: ExecContext, key: &[u8], out: &mut [u8]) -> Result<()> {
        ctx.check(self.shards())?;
        self.check_key(key)?;
        self.check_value(out)?;

        let (hash, idx) = self.locate(key);
        let guard = epoch::pin();
        let shard = ctx.shard();
        match self.read_lockless(idx, hash, key, &guard, |elem| elem.load_value(shard, out)) {
            Some(()) => Ok(()),
            None => {
                out.fill(0);
                Err(Error::NotFound)
            }
        }
    }

    /// True if `key` is present.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        if self.check_key(key).is_err() {
            return false;
        }
        let (hash, idx) = self.locate(key);
        let guard = epoch::pin();
        self.read_lockless(idx, hash, key, &guard, |_| ()).is_some()
    }

    // ---- updates ----

    /// Insert `key` or overwrite its value, subject to `mode`.
    ///
    /// The replacement element is linked at the head of the chain before the
    /// old one is unlinked, so a concurrent lookup sees either the old value
    /// or the new one.
    ///
    /// On a dynamic store at capacity, overwriting an existing key uses the
    /// calling shard's spare element instead of failing, and the replaced
    /// element becomes that shard's spare. Inserting a new key at capacity
    /// fails with [`Error::Full`].
    ///
    /// For per-shard stores this writes the calling shard's slot, see
    /// [`write_shard_value`](Self::write_shard_value).
    pub fn insert_or_update(
        &self,
        ctx: ExecContext,
        key: &[u8],
        value: &[u8],
        mode: UpdateMode,
    ) -> Result<()> {
        if self.config.value_layout() == ValueLayout::PerShard {
            return self.write_shard_value(ctx, key, value, mode, ShardScope::Local);
        }

        self.check_update(ctx, key, value, mode)?;
        let shard = ctx.shard();
        let (hash, idx) = self.locate(key);
        let bucket = &self.buckets[idx];

        let guard = epoch::pin();
        let locked = bucket.lock.lock();
        let old = bucket.find_locked(&locked, hash, key, &guard);
        check_mode(mode, old.is_some())?;

        let (new, spare_pool) = match self.alloc.acquire(shard, &guard) {
            Ok(new) => (new, None),
            Err(err @ (Error::Full | Error::OutOfMemory)) if old.is_some() => {
                let pool = self.spares.as_ref().ok_or(err.clone())?;
                (pool.try_claim_spare(shard, &guard).ok_or(err)?, Some(pool))
            }
            Err(err) => return Err(err),
        };

        bucket.link_head(&locked, new, &guard, |e| {
            e.set_identity(hash, idx as u32, key);
            e.store_value(value);
        });
        if let Some(old) = old {
            bucket.unlink(&locked, old, &guard);
        }
        drop(locked);

        match (old, spare_pool) {
            // The replaced element takes the spare's place; no count changes.
            (Some(old), Some(pool)) => pool.return_spare(shard, old, &guard),
            // SAFETY: unlinked above under the bucket lock, released once.
            (Some(old), None) => unsafe { self.alloc.release(shard, old, &guard) },
            (None, _) => {}
        }
        Ok(())
    }

    /// Remove `key`.
    pub fn delete(&self, ctx: ExecContext, key: &[u8]) -> Result<()> {
        ctx.check(self.shards())?;
        self.check_key(key)?;

        let (hash, idx) = self.locate(key);
        let bucket = &self.buckets[idx];

        let guard = epoch::pin();
        let locked = bucket.lock.lock();
        let old = bucket
            .find_locked(&locked, hash, key, &guard)
            .ok_or(Error::NotFound)?;
        bucket.unlink(&locked, old, &guard);
        drop(locked);

        // SAFETY: unlinked above under the bucket lock, released once.
        unsafe { self.alloc.release(ctx.shard(), old, &guard) };
        Ok(())
    }

    // ---- per-shard values ----

    /// The calling shard's slot of a per-shard value.
    pub fn read_shard_value(&self, ctx: ExecContext, key: &[u8]) -> Result<Vec<u8>> {
        self.require_per_shard()?;
        self.lookup(ctx, key)
    }

    /// Every shard's slot of a per-shard value, in shard order.
    pub fn read_all_shards(&self, ctx: ExecContext, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.require_per_shard()?;
        ctx.check(self.shards())?;
        self.require_task(ctx, "reading every shard needs a task context")?;
        self.check_key(key)?;

        let (hash, idx) = self.locate(key);
        let guard = epoch::pin();
        let mut values = vec![vec![0; self.config.value_size()]; self.shards()];
        self.read_lockless(idx, hash, key, &guard, |elem| {
            for (shard, slot) in values.iter_mut().enumerate() {
                elem.load_value(shard, slot);
            }
        })
        .ok_or(Error::NotFound)?;
        Ok(values)
    }

    /// Write a per-shard value.
    ///
    /// Existing keys are rewritten in place: `Local` touches only the calling
    /// shard's slot, `AllShards` every slot. Slots are atomic bytes and
    /// lookups never wait on an in-place write; a read racing a write to the
    /// same slot may observe a mix of old and new bytes. New keys get a
    /// zeroed block with the selected slots filled in before they are
    /// linked.
    pub fn write_shard_value(
        &self,
        ctx: ExecContext,
        key: &[u8],
        value: &[u8],
        mode: UpdateMode,
        scope: ShardScope,
    ) -> Result<()> {
        self.require_per_shard()?;
        self.check_update(ctx, key, value, mode)?;
        let shard = ctx.shard();
        let (hash, idx) = self.locate(key);
        let bucket = &self.buckets[idx];

        let guard = epoch::pin();
        let locked = bucket.lock.lock();
        let old = bucket.find_locked(&locked, hash, key, &guard);
        check_mode(mode, old.is_some())?;

        if let Some(old) = old {
            // SAFETY: linked in this bucket and protected by its lock.
            store_scoped(unsafe { old.deref() }, shard, value, scope);
            return Ok(());
        }

        let new = self.alloc.acquire(shard, &guard)?;
        bucket.link_head(&locked, new, &guard, |e| {
            e.set_identity(hash, idx as u32, key);
            e.clear_value();
            store_scoped(e, shard, value, scope);
        });
        Ok(())
    }

    // ---- enumeration ----

    /// Key following `key` in table order, or the first key when `key` is
    /// `None` or no longer present.
    ///
    /// There is no snapshot: the answer is the structural successor of
    /// `key` at the instant both were observed. A full enumeration racing
    /// with inserts or deletes may skip keys or return a key twice.
    pub fn next_key(&self, ctx: ExecContext, key: Option<&[u8]>) -> Result<Vec<u8>> {
        ctx.check(self.shards())?;
        self.require_task(ctx, "key enumeration needs a task context")?;

        let guard = epoch::pin();
        let mut out = vec![0; self.config.key_size()];

        let start = match key {
            None => 0,
            Some(key) => {
                self.check_key(key)?;
                let (hash, idx) = self.locate(key);
                match self.chain_successor(idx, hash, key, &guard, &mut out) {
                    Some(true) => return Ok(out),
                    Some(false) => idx + 1,
                    None => 0,
                }
            }
        };

        for idx in start..self.buckets.len() {
            if self.first_key(idx, &guard, &mut out) {
                return Ok(out);
            }
        }
        Err(Error::EndOfIteration)
    }

    /// Iterator driving [`next_key`](Self::next_key) from the start of the
    /// table. Shares its consistency caveats.
    ///
    /// The context is checked up front, so the iterator itself only ends at
    /// the end of the table.
    pub fn keys(&self, ctx: ExecContext) -> Result<Keys<'_, S>> {
        ctx.check(self.shards())?;
        self.require_task(ctx, "key enumeration needs a task context")?;
        Ok(Keys {
            store: self,
            ctx,
            last: None,
            done: false,
        })
    }

    // ---- internals ----

    #[inline]
    fn locate(&self, key: &[u8]) -> (u64, usize) {
        let hash = self.hasher.hash_one(key);
        (hash, (hash as usize) & self.mask)
    }

    #[inline]
    fn check_key(&self, key: &[u8]) -> Result<()> {
        let expected = self.config.key_size();
        if key.len() == expected {
            Ok(())
        } else {
            Err(Error::KeySize {
                expected,
                actual: key.len(),
            })
        }
    }

    #[inline]
    fn check_value(&self, value: &[u8]) -> Result<()> {
        let expected = self.config.value_size();
        if value.len() == expected {
            Ok(())
        } else {
            Err(Error::ValueSize {
                expected,
                actual: value.len(),
            })
        }
    }

    fn check_update(&self, ctx: ExecContext, key: &[u8], value: &[u8], mode: UpdateMode) -> Result<()> {
        ctx.check(self.shards())?;
        self.check_key(key)?;
        self.check_value(value)?;
        // Only the dynamic allocator can stall; arena stores never allocate
        // after construction.
        if ctx.is_atomic()
            && mode != UpdateMode::Exist
            && self.config.allocator_mode() == AllocatorMode::Dynamic
        {
            return Err(Error::Unsupported(
                "non-blocking writes to a dynamic store must use UpdateMode::Exist",
            ));
        }
        Ok(())
    }

    fn require_per_shard(&self) -> Result<()> {
        match self.config.value_layout() {
            ValueLayout::PerShard => Ok(()),
            ValueLayout::Scalar => Err(Error::Unsupported("store does not have per-shard values")),
        }
    }

    fn require_task(&self, ctx: ExecContext, what: &'static str) -> Result<()> {
        if ctx.is_atomic() {
            Err(Error::Unsupported(what))
        } else {
            Ok(())
        }
    }

    /// Lock-free walk of bucket `idx` looking for `(hash, key)`; calls
    /// `read` on the match and returns its result once the element is known
    /// not to have been rewritten during the read.
    fn read_lockless<'g, R>(
        &self,
        idx: usize,
        hash: u64,
        key: &[u8],
        guard: &'g Guard,
        mut read: impl FnMut(&Element) -> R,
    ) -> Option<R> {
        let bucket = &self.buckets[idx];

        'restart: loop {
            let mut current = bucket.head.load(Ordering::Acquire, guard);

            while let Some(elem) = unsafe { current.as_ref() } {
                // Odd: the element is being recycled and is no longer
                // reachable from the head.
                let Some(seq) = elem.read_begin() else {
                    continue 'restart;
                };
                let home = elem.bucket();
                let found = (elem.hash() == hash && elem.key_eq(key)).then(|| read(elem));
                let next = elem.next.load(Ordering::Acquire, guard);

                if !elem.read_validate(seq) || home != idx as u32 {
                    // Recycled while we were looking at it.
                    continue 'restart;
                }
                if found.is_some() {
                    return found;
                }
                current = next;
            }
            return None;
        }
    }

    /// Copy the key that follows `key` in chain `idx` into `out`.
    ///
    /// `Some(true)` when a successor was copied, `Some(false)` when `key` is
    /// the last element of its chain, `None` when `key` is not in the chain.
    fn chain_successor(
        &self,
        idx: usize,
        hash: u64,
        key: &[u8],
        guard: &Guard,
        out: &mut [u8],
    ) -> Option<bool> {
        let bucket = &self.buckets[idx];

        'restart: loop {
            let mut current = bucket.head.load(Ordering::Acquire, guard);

            while let Some(elem) = unsafe { current.as_ref() } {
                let Some(seq) = elem.read_begin() else {
                    continue 'restart;
                };
                let home = elem.bucket();
                let hit = elem.hash() == hash && elem.key_eq(key);
                let next = elem.next.load(Ordering::Acquire, guard);
                if !elem.read_validate(seq) || home != idx as u32 {
                    continue 'restart;
                }

                if hit {
                    return match unsafe { next.as_ref() } {
                        None => Some(false),
                        Some(succ) if snapshot_key(succ, idx, out) => Some(true),
                        Some(_) => continue 'restart,
                    };
                }
                current = next;
            }
            return None;
        }
    }

    /// Copy the head key of chain `idx` into `out`. False for an empty chain.
    fn first_key(&self, idx: usize, guard: &Guard, out: &mut [u8]) -> bool {
        let bucket = &self.buckets[idx];
        loop {
            let head = bucket.head.load(Ordering::Acquire, guard);
            match unsafe { head.as_ref() } {
                None => return false,
                Some(elem) if snapshot_key(elem, idx, out) => return true,
                // Recycled after we loaded it; the head has moved on.
                Some(_) => {}
            }
        }
    }

    /// Number of elements in chain `idx`, restarting whenever the walk
    /// lands on an element recycled underneath it.
    fn chain_len(&self, idx: usize, guard: &Guard) -> usize {
        let bucket = &self.buckets[idx];

        'restart: loop {
            let mut count = 0;
            let mut current = bucket.head.load(Ordering::Acquire, guard);
            while let Some(elem) = unsafe { current.as_ref() } {
                match stable_next(elem, idx, guard) {
                    Some(next) => current = next,
                    None => continue 'restart,
                }
                count += 1;
            }
            return count;
        }
    }
}

/// Successor of `elem` if `elem` is a stable member of bucket `idx`.
fn stable_next<'g>(elem: &Element, idx: usize, guard: &'g Guard) -> Option<Shared<'g, Element>> {
    let seq = elem.read_begin()?;
    let home = elem.bucket();
    let next = elem.next.load(Ordering::Acquire, guard);
    (elem.read_validate(seq) && home == idx as u32).then_some(next)
}

/// Copy `elem`'s key if it is a stable member of bucket `idx`.
fn snapshot_key(elem: &Element, idx: usize, out: &mut [u8]) -> bool {
    let Some(seq) = elem.read_begin() else {
        return false;
    };
    let home = elem.bucket();
    elem.load_key(out);
    elem.read_validate(seq) && home == idx as u32
}

fn check_mode(mode: UpdateMode, exists: bool) -> Result<()> {
    match (mode, exists) {
        (UpdateMode::NoExist, true) => Err(Error::AlreadyExists),
        (UpdateMode::Exist, false) => Err(Error::NotFound),
        _ => Ok(()),
    }
}

fn store_scoped(elem: &Element, shard: usize, value: &[u8], scope: ShardScope) {
    match scope {
        ShardScope::Local => elem.store_slot(shard, value),
        ShardScope::AllShards => elem.store_value(value),
    }
}

impl<S> Drop for Store<S> {
    fn drop(&mut self) {
        let drained = self
            .alloc
            .dynamic()
            .is_none_or(|d| d.reclaimer().drain(DRAIN_ROUNDS));

        // SAFETY: `&mut self` means no reader or writer is left.
        let guard = unsafe { epoch::unprotected() };
        let mut freed = 0usize;
        for bucket in self.buckets.iter() {
            let mut current = bucket.head.swap(Shared::null(), Ordering::Relaxed, guard);
            while let Some(elem) = unsafe { current.as_ref() } {
                let next = elem.next.load(Ordering::Relaxed, guard);
                // Arena elements are owned by the arena.
                if elem.origin() == Origin::Heap {
                    drop(unsafe { current.into_owned() });
                    freed += 1;
                }
                current = next;
            }
        }

        tracing::trace!(drained, freed, "store torn down");
    }
}

/// Iterator over keys, see [`Store::keys`].
pub struct Keys<'a, S> {
    store: &'a Store<S>,
    ctx: ExecContext,
    last: Option<Vec<u8>>,
    done: bool,
}

impl<S: BuildHasher> Iterator for Keys<'_, S> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.store.next_key(self.ctx, self.last.as_deref()) {
            Ok(key) => {
                self.last = Some(key.clone());
                Some(key)
            }
            Err(err) => {
                // The context was checked by `Store::keys` and every cursor
                // key came from the store itself.
                debug_assert_eq!(err, Error::EndOfIteration);
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn k(i: u32) -> [u8; 4] {
        i.to_le_bytes()
    }

    fn per_shard() -> Store {
        Store::new(
            StoreConfig::new(4, 8, 4)
                .layout(ValueLayout::PerShard)
                .shards(2),
        )
        .unwrap()
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_lookup_does_not_wait_for_bucket_writer() {
        let store = Arc::new(per_shard());
        store
            .write_shard_value(
                ExecContext::task(0),
                &k(1),
                &5u64.to_le_bytes(),
                UpdateMode::Any,
                ShardScope::AllShards,
            )
            .unwrap();

        // Shard 0 sits inside a write critical section on the key's bucket.
        let (_, idx) = store.locate(&k(1));
        let locked = store.buckets[idx].lock.lock();

        let (tx, rx) = mpsc::channel();
        let reader = {
            let store = store.clone();
            thread::spawn(move || {
                let _ = tx.send(store.read_shard_value(ExecContext::task(1), &k(1)));
            })
        };
        let got = rx.recv_timeout(Duration::from_secs(10));
        drop(locked);
        reader.join().unwrap();

        assert_eq!(got.unwrap().unwrap(), 5u64.to_le_bytes());
    }

    #[test]
    fn test_in_place_write_keeps_element_readable() {
        let store = per_shard();
        let a = ExecContext::task(0);
        store
            .write_shard_value(a, &k(1), &1u64.to_le_bytes(), UpdateMode::Any, ShardScope::AllShards)
            .unwrap();

        let (_, idx) = store.locate(&k(1));
        let guard = epoch::pin();
        let elem = unsafe { store.buckets[idx].head.load(Ordering::Acquire, &guard).deref() };
        let seq = elem.read_begin().unwrap();

        store
            .write_shard_value(a, &k(1), &2u64.to_le_bytes(), UpdateMode::Exist, ShardScope::Local)
            .unwrap();
        store
            .write_shard_value(a, &k(1), &3u64.to_le_bytes(), UpdateMode::Exist, ShardScope::AllShards)
            .unwrap();

        // Linked elements are never put in the odd window readers retry on.
        assert!(elem.read_validate(seq));
        assert_eq!(store.read_shard_value(ExecContext::task(1), &k(1)).unwrap(), 3u64.to_le_bytes());
    }

    #[test]
    fn test_walk_rejects_element_recycled_into_other_bucket() {
        let store = Store::new(StoreConfig::new(4, 4, 2).shards(1)).unwrap();
        let ctx = ExecContext::task(0);

        let a = k(0);
        let (_, bucket_a) = store.locate(&a);
        let b = (1u32..)
            .map(k)
            .find(|key| store.locate(key).1 != bucket_a)
            .unwrap();
        let (_, bucket_b) = store.locate(&b);

        store.insert_or_update(ctx, &a, &k(10), UpdateMode::Any).unwrap();
        let guard = epoch::pin();
        let stale = store.buckets[bucket_a].head.load(Ordering::Acquire, &guard);
        let elem = unsafe { stale.deref() };
        assert!(stable_next(elem, bucket_a, &guard).is_some());

        store.delete(ctx, &a).unwrap();
        store.insert_or_update(ctx, &b, &k(20), UpdateMode::Any).unwrap();

        // The same arena slot now heads the other bucket.
        assert_eq!(store.buckets[bucket_b].head.load(Ordering::Acquire, &guard), stale);
        assert!(stable_next(elem, bucket_a, &guard).is_none());
        assert!(stable_next(elem, bucket_b, &guard).is_some());
        assert_eq!(store.chain_len(bucket_a, &guard), 0);
        assert_eq!(store.len(), 1);
    }
}
