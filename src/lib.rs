//! Fixed-size concurrent hash table for callers that cannot block.
//!
//! `bucketmap` stores byte-string keys and values of sizes fixed at
//! construction. Lookups walk bucket chains without taking any lock;
//! updates and deletes take a short per-bucket spin lock. Removed elements
//! are reclaimed with crossbeam-epoch, so a lookup never sees freed memory.
//!
//! # Key Features
//!
//! - **Lock-Free Reads**: lookups never block writers and are never blocked
//! - **Two Allocators**: a preallocated arena with a hard ceiling and no
//!   allocation after construction, or dynamic allocation with an admitted
//!   count and deferred free
//! - **Spare Elements**: on a full dynamic store, overwriting a key that
//!   already exists still succeeds using the calling shard's spare
//! - **Per-Shard Values**: optional layout with one value slot per shard
//!
//! # Example
//!
//! ```rust
//! use bucketmap::{AllocatorMode, Error, ExecContext, Store, StoreConfig, UpdateMode};
//!
//! let config = StoreConfig::new(4, 4, 1)
//!     .allocator(AllocatorMode::Preallocated)
//!     .shards(2);
//! let store = Store::new(config).unwrap();
//! let cpu = ExecContext::task(0);
//!
//! store.insert_or_update(cpu, &1u32.to_le_bytes(), &100u32.to_le_bytes(), UpdateMode::Any).unwrap();
//! assert_eq!(
//!     store.insert_or_update(cpu, &2u32.to_le_bytes(), &200u32.to_le_bytes(), UpdateMode::Any),
//!     Err(Error::Full)
//! );
//! ```

#![warn(missing_docs)]

mod alloc;
mod bucket;
pub mod config;
mod context;
mod element;
mod error;
mod freelist;
mod reclaim;
mod spare;
mod store;

pub use config::{AllocatorMode, Geometry, Limits, StoreConfig, ValueLayout};
pub use context::{ContextKind, ExecContext};
pub use error::{ConfigError, Error, Result};
pub use store::{Keys, ShardScope, Store, UpdateMode};
