use thiserror::Error;

/// Reasons a [`StoreConfig`](crate::StoreConfig) is rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `max_entries` was zero
    #[error("max_entries must be non-zero")]
    ZeroEntries,
    /// `key_size` was zero
    #[error("key_size must be non-zero")]
    ZeroKeySize,
    /// `value_size` was zero
    #[error("value_size must be non-zero")]
    ZeroValueSize,
    /// The store was configured with no shards
    #[error("shard count must be non-zero")]
    ZeroShards,
    /// Key larger than the configured limit
    #[error("key_size {size} exceeds limit {max}")]
    KeyTooLarge {
        /// Requested size
        size: usize,
        /// Limit in effect
        max: usize,
    },
    /// Value larger than the configured limit
    #[error("value_size {size} exceeds limit {max}")]
    ValueTooLarge {
        /// Requested size
        size: usize,
        /// Limit in effect
        max: usize,
    },
    /// Per-shard value larger than the platform per-shard allocation limit
    #[error("per-shard value_size {size} exceeds per-shard limit {max}")]
    ShardValueTooLarge {
        /// Requested size
        size: usize,
        /// Limit in effect
        max: usize,
    },
    /// The bucket count derived from `max_entries` does not fit the table index
    #[error("max_entries {0} is too large for the bucket array")]
    TooManyEntries(usize),
    /// The precomputed footprint is over the admission ceiling
    #[error("store footprint {required} bytes exceeds admission ceiling {ceiling} bytes")]
    ExceedsCeiling {
        /// Computed footprint
        required: u64,
        /// Configured ceiling
        ceiling: u64,
    },
}

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Construction-time configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),
    /// No element can be admitted: arena exhausted or admitted count at capacity
    #[error("store is full")]
    Full,
    /// The element allocator failed
    #[error("out of memory")]
    OutOfMemory,
    /// `NoExist` update of a key that is present
    #[error("key already exists")]
    AlreadyExists,
    /// Key absent (lookup, delete, or `Exist` update)
    #[error("key not found")]
    NotFound,
    /// `next_key` walked past the last key
    #[error("end of iteration")]
    EndOfIteration,
    /// Key buffer length does not match the configured key size
    #[error("key is {actual} bytes, store expects {expected}")]
    KeySize {
        /// Configured key size
        expected: usize,
        /// Length passed in
        actual: usize,
    },
    /// Value buffer length does not match the configured value size
    #[error("value is {actual} bytes, store expects {expected}")]
    ValueSize {
        /// Configured value size
        expected: usize,
        /// Length passed in
        actual: usize,
    },
    /// Calling context names a shard the store does not have
    #[error("shard {shard} out of range, store has {shards} shards")]
    InvalidShard {
        /// Shard named by the caller
        shard: usize,
        /// Shards the store has
        shards: usize,
    },
    /// Operation not valid for this value layout or calling context
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
