//! Calling-context capability passed to every store operation.

use crate::error::{Error, Result};

/// Whether the caller may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Ordinary thread context; may enumerate and allocate.
    Task,
    /// Context that must never block or wait on allocation, e.g. an
    /// interrupt-like callback.
    Atomic,
}

/// The calling shard plus the kind of context the call is made from.
///
/// The store never discovers "the current CPU" by itself; the caller names
/// its shard explicitly, which keeps per-shard state testable on any number
/// of simulated shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecContext {
    shard: usize,
    kind: ContextKind,
}

impl ExecContext {
    /// Blocking-capable context running on `shard`.
    pub const fn task(shard: usize) -> Self {
        Self {
            shard,
            kind: ContextKind::Task,
        }
    }

    /// Non-blocking context running on `shard`.
    pub const fn atomic(shard: usize) -> Self {
        Self {
            shard,
            kind: ContextKind::Atomic,
        }
    }

    /// Shard index of the caller.
    #[inline]
    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Context kind.
    #[inline]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// True for [`ContextKind::Atomic`].
    #[inline]
    pub fn is_atomic(&self) -> bool {
        self.kind == ContextKind::Atomic
    }

    #[inline]
    pub(crate) fn check(&self, shards: usize) -> Result<()> {
        if self.shard < shards {
            Ok(())
        } else {
            Err(Error::InvalidShard {
                shard: self.shard,
                shards,
            })
        }
    }
}
