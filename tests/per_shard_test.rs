use bucketmap::{
    AllocatorMode, Error, ExecContext, ShardScope, Store, StoreConfig, UpdateMode, ValueLayout,
};

const SHARD_A: ExecContext = ExecContext::task(0);
const SHARD_B: ExecContext = ExecContext::task(1);

fn k(i: u32) -> [u8; 4] {
    i.to_le_bytes()
}

fn v(i: u64) -> [u8; 8] {
    i.to_le_bytes()
}

fn per_shard(allocator: AllocatorMode, max_entries: usize, shards: usize) -> Store {
    Store::new(
        StoreConfig::new(4, 8, max_entries)
            .layout(ValueLayout::PerShard)
            .allocator(allocator)
            .shards(shards),
    )
    .unwrap()
}

fn both_modes() -> [AllocatorMode; 2] {
    [AllocatorMode::Preallocated, AllocatorMode::Dynamic]
}

#[test]
fn test_local_then_all_shards() {
    for mode in both_modes() {
        let s = per_shard(mode, 8, 2);

        s.write_shard_value(SHARD_A, &k(1), &v(5), UpdateMode::Any, ShardScope::Local)
            .unwrap();
        assert_eq!(s.read_shard_value(SHARD_A, &k(1)).unwrap(), v(5));
        assert_eq!(s.read_shard_value(SHARD_B, &k(1)).unwrap(), v(0));

        s.write_shard_value(SHARD_A, &k(1), &v(7), UpdateMode::Any, ShardScope::AllShards)
            .unwrap();
        assert_eq!(s.read_shard_value(SHARD_A, &k(1)).unwrap(), v(7));
        assert_eq!(s.read_shard_value(SHARD_B, &k(1)).unwrap(), v(7));
    }
}

#[test]
fn test_local_writes_are_independent() {
    let s = per_shard(AllocatorMode::Preallocated, 8, 4);
    for shard in 0..4 {
        s.write_shard_value(
            ExecContext::task(shard),
            &k(9),
            &v(shard as u64 + 100),
            UpdateMode::Any,
            ShardScope::Local,
        )
        .unwrap();
    }

    let all = s.read_all_shards(SHARD_A, &k(9)).unwrap();
    assert_eq!(all.len(), 4);
    for (shard, value) in all.iter().enumerate() {
        assert_eq!(value.as_slice(), v(shard as u64 + 100));
    }
    assert_eq!(s.len(), 1);
}

#[test]
fn test_insert_or_update_writes_local_slot() {
    let s = per_shard(AllocatorMode::Dynamic, 8, 2);
    s.insert_or_update(SHARD_B, &k(3), &v(42), UpdateMode::Any)
        .unwrap();

    assert_eq!(s.lookup(SHARD_B, &k(3)).unwrap(), v(42));
    assert_eq!(s.lookup(SHARD_A, &k(3)).unwrap(), v(0));
}

#[test]
fn test_update_modes_apply() {
    let s = per_shard(AllocatorMode::Preallocated, 8, 2);
    assert_eq!(
        s.write_shard_value(SHARD_A, &k(1), &v(1), UpdateMode::Exist, ShardScope::Local),
        Err(Error::NotFound)
    );
    s.write_shard_value(SHARD_A, &k(1), &v(1), UpdateMode::NoExist, ShardScope::Local)
        .unwrap();
    assert_eq!(
        s.write_shard_value(SHARD_B, &k(1), &v(2), UpdateMode::NoExist, ShardScope::Local),
        Err(Error::AlreadyExists)
    );
    assert_eq!(s.read_shard_value(SHARD_B, &k(1)).unwrap(), v(0));
}

#[test]
fn test_recycled_element_starts_zeroed() {
    let s = per_shard(AllocatorMode::Preallocated, 1, 2);
    s.write_shard_value(SHARD_A, &k(1), &v(9), UpdateMode::Any, ShardScope::AllShards)
        .unwrap();
    s.delete(SHARD_A, &k(1)).unwrap();

    // Same arena element, different key: only the written slot is set.
    s.write_shard_value(SHARD_A, &k(2), &v(4), UpdateMode::Any, ShardScope::Local)
        .unwrap();
    assert_eq!(s.read_all_shards(SHARD_B, &k(2)).unwrap(), vec![v(4).to_vec(), v(0).to_vec()]);
}

#[test]
fn test_full_store_still_updates_in_place() {
    let s = per_shard(AllocatorMode::Dynamic, 2, 2);
    assert_eq!(s.spares_available(), 0);

    s.insert_or_update(SHARD_A, &k(1), &v(1), UpdateMode::Any)
        .unwrap();
    s.insert_or_update(SHARD_A, &k(2), &v(2), UpdateMode::Any)
        .unwrap();
    assert_eq!(
        s.insert_or_update(SHARD_A, &k(3), &v(3), UpdateMode::Any),
        Err(Error::Full)
    );
    s.insert_or_update(SHARD_B, &k(1), &v(11), UpdateMode::Exist)
        .unwrap();
    assert_eq!(s.read_all_shards(SHARD_A, &k(1)).unwrap(), vec![v(1).to_vec(), v(11).to_vec()]);
}

#[test]
fn test_shard_operations_need_per_shard_layout() {
    let scalar = Store::new(StoreConfig::new(4, 8, 8).shards(2)).unwrap();
    scalar
        .insert_or_update(SHARD_A, &k(1), &v(1), UpdateMode::Any)
        .unwrap();

    assert!(matches!(
        scalar.read_shard_value(SHARD_A, &k(1)),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        scalar.read_all_shards(SHARD_A, &k(1)),
        Err(Error::Unsupported(_))
    ));
    assert!(matches!(
        scalar.write_shard_value(SHARD_A, &k(1), &v(2), UpdateMode::Any, ShardScope::Local),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_read_all_shards_needs_task_context() {
    let s = per_shard(AllocatorMode::Preallocated, 8, 2);
    s.write_shard_value(SHARD_A, &k(1), &v(1), UpdateMode::Any, ShardScope::AllShards)
        .unwrap();

    let atomic = ExecContext::atomic(0);
    assert!(matches!(
        s.read_all_shards(atomic, &k(1)),
        Err(Error::Unsupported(_))
    ));
    assert_eq!(s.read_shard_value(atomic, &k(1)).unwrap(), v(1));
    assert_eq!(s.read_all_shards(SHARD_A, &k(2)), Err(Error::NotFound));
    assert_eq!(
        s.read_all_shards(ExecContext::task(2), &k(1)),
        Err(Error::InvalidShard {
            shard: 2,
            shards: 2
        })
    );
}
