//! Construction contract for a [`Store`](crate::Store).

use core::mem::size_of;
use std::thread;

use crate::bucket::Bucket;
use crate::element::Element;
use crate::error::ConfigError;

/// Largest key accepted by default.
pub const MAX_KEY_SIZE: usize = 512;

/// Largest scalar value accepted by default.
pub const MAX_VALUE_SIZE: usize = 1 << 20;

/// Largest value accepted by default for per-shard layouts; every shard
/// carries its own copy.
pub const MAX_SHARD_VALUE_SIZE: usize = 32 * 1024;

/// Per-shard slots are padded to this many bytes.
pub(crate) const SLOT_ALIGN: usize = 8;

/// Largest bucket count; bucket and arena indices are `u32`.
const MAX_BUCKETS: usize = 1 << 31;

/// How values are stored in an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueLayout {
    /// One value per key.
    #[default]
    Scalar,
    /// One value slot per shard per key.
    PerShard,
}

/// Where elements come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocatorMode {
    /// All elements carved at construction, recycled through a free-list.
    #[default]
    Preallocated,
    /// Elements allocated on insert, admitted against a counter and
    /// reclaimed after an epoch grace period.
    Dynamic,
}

/// Resource-governance limits applied before any allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Admission ceiling for the computed footprint, in bytes.
    pub memory_ceiling: Option<u64>,
    /// Largest permitted key.
    pub max_key_size: usize,
    /// Largest permitted scalar value.
    pub max_value_size: usize,
    /// Platform per-shard allocation limit.
    pub max_shard_value_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_ceiling: None,
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
            max_shard_value_size: MAX_SHARD_VALUE_SIZE,
        }
    }
}

/// Store configuration.
///
/// ```rust
/// use bucketmap::{AllocatorMode, StoreConfig, ValueLayout};
///
/// let config = StoreConfig::new(4, 8, 1024)
///     .allocator(AllocatorMode::Dynamic)
///     .layout(ValueLayout::Scalar)
///     .shards(4);
/// assert_eq!(config.max_entries(), 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    key_size: usize,
    value_size: usize,
    max_entries: usize,
    layout: ValueLayout,
    allocator: AllocatorMode,
    shards: usize,
    limits: Limits,
}

impl StoreConfig {
    /// Scalar, preallocated configuration with one shard per available CPU.
    pub fn new(key_size: usize, value_size: usize, max_entries: usize) -> Self {
        Self {
            key_size,
            value_size,
            max_entries,
            layout: ValueLayout::Scalar,
            allocator: AllocatorMode::Preallocated,
            shards: default_shards(),
            limits: Limits::default(),
        }
    }

    /// Set the value layout.
    pub fn layout(mut self, layout: ValueLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the allocator mode.
    pub fn allocator(mut self, allocator: AllocatorMode) -> Self {
        self.allocator = allocator;
        self
    }

    /// Set the number of shards (simulated CPUs).
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Replace the resource limits.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Shorthand for setting only the admission ceiling.
    pub fn memory_ceiling(mut self, bytes: u64) -> Self {
        self.limits.memory_ceiling = Some(bytes);
        self
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Value size in bytes (per shard for per-shard layouts).
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Capacity.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Value layout.
    pub fn value_layout(&self) -> ValueLayout {
        self.layout
    }

    /// Allocator mode.
    pub fn allocator_mode(&self) -> AllocatorMode {
        self.allocator
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards
    }

    /// Resource limits.
    pub fn resource_limits(&self) -> &Limits {
        &self.limits
    }

    /// Whether the dynamic scalar path keeps a spare element per shard.
    pub(crate) fn has_spares(&self) -> bool {
        self.allocator == AllocatorMode::Dynamic && self.layout == ValueLayout::Scalar
    }

    /// Check the configuration and derive the table geometry. No memory is
    /// allocated here.
    pub fn validate(&self) -> Result<Geometry, ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::ZeroEntries);
        }
        if self.key_size == 0 {
            return Err(ConfigError::ZeroKeySize);
        }
        if self.value_size == 0 {
            return Err(ConfigError::ZeroValueSize);
        }
        if self.shards == 0 {
            return Err(ConfigError::ZeroShards);
        }
        if self.key_size > self.limits.max_key_size {
            return Err(ConfigError::KeyTooLarge {
                size: self.key_size,
                max: self.limits.max_key_size,
            });
        }
        if self.value_size > self.limits.max_value_size {
            return Err(ConfigError::ValueTooLarge {
                size: self.value_size,
                max: self.limits.max_value_size,
            });
        }
        if self.layout == ValueLayout::PerShard
            && self.value_size > self.limits.max_shard_value_size
        {
            return Err(ConfigError::ShardValueTooLarge {
                size: self.value_size,
                max: self.limits.max_shard_value_size,
            });
        }

        let buckets = match self.max_entries.checked_next_power_of_two() {
            Some(n) if n <= MAX_BUCKETS => n,
            _ => return Err(ConfigError::TooManyEntries(self.max_entries)),
        };

        let (slot_stride, value_bytes) = match self.layout {
            ValueLayout::Scalar => (self.value_size, self.value_size),
            ValueLayout::PerShard => {
                let stride = self.value_size.next_multiple_of(SLOT_ALIGN);
                let bytes = stride
                    .checked_mul(self.shards)
                    .ok_or(ConfigError::TooManyEntries(self.max_entries))?;
                (stride, bytes)
            }
        };

        let spares = if self.has_spares() { self.shards } else { 0 };
        let elements = self.max_entries as u128 + spares as u128;
        let per_element = size_of::<Element>() as u128 + self.key_size as u128 + value_bytes as u128;
        let footprint = buckets as u128 * size_of::<Bucket>() as u128 + elements * per_element;
        let footprint = u64::try_from(footprint).unwrap_or(u64::MAX);

        if let Some(ceiling) = self.limits.memory_ceiling {
            if footprint > ceiling {
                return Err(ConfigError::ExceedsCeiling {
                    required: footprint,
                    ceiling,
                });
            }
        }

        Ok(Geometry {
            buckets,
            spares,
            slot_stride,
            value_bytes,
            footprint,
        })
    }
}

/// Sizes derived from a validated [`StoreConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Power-of-two bucket count.
    pub buckets: usize,
    /// Spare elements (one per shard on dynamic scalar stores, else zero).
    pub spares: usize,
    /// Distance between per-shard slots; equals the value size for scalars.
    pub slot_stride: usize,
    /// Bytes of value storage per element.
    pub value_bytes: usize,
    /// Worst-case memory footprint in bytes.
    pub footprint: u64,
}

fn default_shards() -> usize {
    thread::available_parallelism().map(|p| p.get()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_round_up() {
        let g = StoreConfig::new(4, 4, 1000).shards(2).validate().unwrap();
        assert_eq!(g.buckets, 1024);
        assert_eq!(g.spares, 0);

        let g = StoreConfig::new(4, 4, 1).shards(2).validate().unwrap();
        assert_eq!(g.buckets, 1);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert_eq!(
            StoreConfig::new(0, 4, 8).validate(),
            Err(ConfigError::ZeroKeySize)
        );
        assert_eq!(
            StoreConfig::new(4, 0, 8).validate(),
            Err(ConfigError::ZeroValueSize)
        );
        assert_eq!(
            StoreConfig::new(4, 4, 0)
                .allocator(AllocatorMode::Dynamic)
                .validate(),
            Err(ConfigError::ZeroEntries)
        );
        assert_eq!(
            StoreConfig::new(4, 4, 8).shards(0).validate(),
            Err(ConfigError::ZeroShards)
        );
    }

    #[test]
    fn test_per_shard_stride_and_limit() {
        let g = StoreConfig::new(4, 5, 16)
            .layout(ValueLayout::PerShard)
            .shards(3)
            .validate()
            .unwrap();
        assert_eq!(g.slot_stride, 8);
        assert_eq!(g.value_bytes, 24);

        let err = StoreConfig::new(4, MAX_SHARD_VALUE_SIZE + 1, 16)
            .layout(ValueLayout::PerShard)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ShardValueTooLarge { .. }));
    }

    #[test]
    fn test_spares_only_on_dynamic_scalar() {
        let g = StoreConfig::new(4, 4, 8)
            .allocator(AllocatorMode::Dynamic)
            .shards(4)
            .validate()
            .unwrap();
        assert_eq!(g.spares, 4);

        let g = StoreConfig::new(4, 4, 8)
            .allocator(AllocatorMode::Dynamic)
            .layout(ValueLayout::PerShard)
            .shards(4)
            .validate()
            .unwrap();
        assert_eq!(g.spares, 0);
    }

    #[test]
    fn test_memory_ceiling() {
        let config = StoreConfig::new(8, 64, 4096).shards(1);
        let footprint = config.validate().unwrap().footprint;

        assert!(config.clone().memory_ceiling(footprint).validate().is_ok());
        assert_eq!(
            config.memory_ceiling(footprint - 1).validate(),
            Err(ConfigError::ExceedsCeiling {
                required: footprint,
                ceiling: footprint - 1,
            })
        );
    }

    #[test]
    fn test_oversized_key_and_entries() {
        assert!(matches!(
            StoreConfig::new(MAX_KEY_SIZE + 1, 4, 8).validate(),
            Err(ConfigError::KeyTooLarge { .. })
        ));
        assert_eq!(
            StoreConfig::new(4, 4, usize::MAX).validate(),
            Err(ConfigError::TooManyEntries(usize::MAX))
        );
    }
}
