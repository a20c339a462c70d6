//! Strategies for loading and saving an offset map.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::Result,
    kv::KvStore,
    offsets::{self, OffsetMap},
};

/// Where a checkpoint store keeps its snapshot.
#[async_trait]
pub trait OffsetPersistence: Send + Sync + std::fmt::Debug {
    /// Loads the snapshot stored under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<OffsetMap>>;

    /// Overwrites the snapshot under `key` with `offsets`.
    async fn save(&self, key: &str, offsets: &OffsetMap) -> Result<()>;
}

/// Stores the snapshot as one JSON object in a [`KvStore`].
#[derive(Debug, Clone)]
pub struct KvOffsetPersistence {
    store: Arc<dyn KvStore>,
}

impl KvOffsetPersistence {
    /// Uses `store` as the backend.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OffsetPersistence for KvOffsetPersistence {
    async fn load(&self, key: &str) -> Result<Option<OffsetMap>> {
        match self.store.get(key).await? {
            Some(value) => offsets::decode(key, &value).map(Some),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, offsets: &OffsetMap) -> Result<()> {
        let value = offsets::encode(offsets)?;
        self.store.set(key, value).await
    }
}
