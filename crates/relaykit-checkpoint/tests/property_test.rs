//! Property-based tests for offset persistence.
//!
//! Any printable map saved by one store must be loaded unchanged by a fresh
//! store on the same key, and repeated saves must not change what is loaded.

use std::sync::Arc;

use proptest::prelude::*;
use relaykit_checkpoint::{
    CheckpointOptions, CheckpointStore, KvOffsetPersistence, MemoryKvStore, OffsetMap,
};

fn offset_map_strategy() -> impl Strategy<Value = OffsetMap> {
    prop::collection::btree_map("[[:print:]]{0,40}", "[[:print:]]{0,80}", 0..16)
}

fn store_on(backend: &MemoryKvStore, key: &str) -> CheckpointStore {
    let options = CheckpointOptions { storage_key: Some(key.to_string()), ..Default::default() };
    CheckpointStore::configure(&options, Arc::new(KvOffsetPersistence::new(Arc::new(backend.clone()))))
}

proptest! {
    #[test]
    fn save_then_load_round_trips(offsets in offset_map_strategy(), key in "[a-z_]{1,20}") {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let backend = MemoryKvStore::new();

            let writer = store_on(&backend, &key);
            writer.start().await.unwrap();
            writer.set(offsets.clone()).await.unwrap();

            let reader = store_on(&backend, &key);
            reader.start().await.unwrap();
            prop_assert_eq!(reader.snapshot().await, offsets);
            Ok(())
        })?;
    }

    #[test]
    fn repeated_saves_are_idempotent(offsets in offset_map_strategy(), saves in 1usize..4) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let backend = MemoryKvStore::new();
            let writer = store_on(&backend, "offsets");
            writer.start().await.unwrap();
            writer.set(offsets.clone()).await.unwrap();

            for _ in 0..saves {
                writer.save().await.unwrap();

                let reader = store_on(&backend, "offsets");
                reader.start().await.unwrap();
                prop_assert_eq!(reader.snapshot().await, offsets.clone());
            }
            Ok(())
        })?;
    }
}
