//! Simple example demonstrating the store's basic API

use bucketmap::{
    AllocatorMode, Error, ExecContext, ShardScope, Store, StoreConfig, UpdateMode, ValueLayout,
};

fn main() -> Result<(), Error> {
    // A dynamic store with room for two entries and two simulated CPUs
    let store = Store::new(
        StoreConfig::new(4, 4, 2)
            .allocator(AllocatorMode::Dynamic)
            .shards(2),
    )?;
    let cpu0 = ExecContext::task(0);

    store.insert_or_update(cpu0, &1u32.to_le_bytes(), &10u32.to_le_bytes(), UpdateMode::Any)?;
    store.insert_or_update(cpu0, &2u32.to_le_bytes(), &20u32.to_le_bytes(), UpdateMode::Any)?;

    // Full for new keys...
    match store.insert_or_update(cpu0, &3u32.to_le_bytes(), &30u32.to_le_bytes(), UpdateMode::Any) {
        Err(Error::Full) => println!("store full, key 3 rejected"),
        other => println!("unexpected: {other:?}"),
    }

    // ...but existing keys can still be overwritten through the spare element
    store.insert_or_update(cpu0, &1u32.to_le_bytes(), &11u32.to_le_bytes(), UpdateMode::Exist)?;
    let value = store.lookup(cpu0, &1u32.to_le_bytes())?;
    println!("key 1 = {}", u32::from_le_bytes([value[0], value[1], value[2], value[3]]));

    // Walk every key
    for key in store.keys(cpu0)? {
        println!("key {key:?}");
    }

    // Per-shard values: each CPU owns a slot
    let counters = Store::new(
        StoreConfig::new(4, 8, 16)
            .layout(ValueLayout::PerShard)
            .shards(2),
    )?;
    let key = 7u32.to_le_bytes();
    counters.write_shard_value(cpu0, &key, &0u64.to_le_bytes(), UpdateMode::Any, ShardScope::AllShards)?;
    counters.write_shard_value(ExecContext::task(1), &key, &5u64.to_le_bytes(), UpdateMode::Exist, ShardScope::Local)?;

    for (shard, slot) in counters.read_all_shards(cpu0, &key)?.iter().enumerate() {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(slot);
        println!("shard {shard}: {}", u64::from_le_bytes(raw));
    }

    Ok(())
}
