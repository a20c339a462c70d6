//! Checkpoint store: offset cache plus persistence strategy.
//!
//! The store keeps the working offset map in memory and writes the whole map
//! under a single key on every save. `start`, `save`, `set`, and `stop` are
//! serialized by one async mutex, so a load never interleaves with a save
//! and two saves never interleave with each other.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    error::{CheckpointError, Result},
    offsets::{OffsetCache, OffsetMap},
    persistence::OffsetPersistence,
};

/// Storage key used when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "cdk_debezium_offset";

/// Checkpoint store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointOptions {
    /// Key the snapshot is stored under.
    pub storage_key: Option<String>,
    /// Offset value inserted before the first load.
    pub seed_offset: Option<String>,
    /// Capture engine name, part of the seed entry key.
    pub engine_name: Option<String>,
    /// Captured server name, part of the seed entry key.
    pub server_name: Option<String>,
}

impl CheckpointOptions {
    /// Storage key, falling back to [`DEFAULT_STORAGE_KEY`] when unset or empty.
    pub fn resolved_key(&self) -> &str {
        self.storage_key.as_deref().filter(|key| !key.is_empty()).unwrap_or(DEFAULT_STORAGE_KEY)
    }

    /// Key of the seed entry: `["<engine>",{"server":"<server>"}]` as
    /// compact JSON, with `null` for a missing name.
    pub fn seed_key(&self) -> String {
        json!([self.engine_name, { "server": self.server_name }]).to_string()
    }

    /// Seed entry, if a non-empty seed offset is configured.
    pub fn seed_entry(&self) -> Option<(String, String)> {
        self.seed_offset
            .as_deref()
            .filter(|seed| !seed.is_empty())
            .map(|seed| (self.seed_key(), seed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Configured,
    Started,
    Stopped,
}

#[derive(Debug)]
struct StoreState {
    cache: OffsetCache,
    lifecycle: Lifecycle,
}

/// Persists the offset map of one capture engine.
#[derive(Debug)]
pub struct CheckpointStore {
    key: String,
    persistence: Arc<dyn OffsetPersistence>,
    state: Mutex<StoreState>,
}

impl CheckpointStore {
    /// Creates a store and applies the seed entry, if any.
    pub fn configure(options: &CheckpointOptions, persistence: Arc<dyn OffsetPersistence>) -> Self {
        let key = options.resolved_key().to_string();
        let mut cache = OffsetCache::new();

        if let Some((seed_key, seed_value)) = options.seed_entry() {
            info!(storage_key = %key, seed_key = %seed_key, "seeding initial offset");
            cache.insert(seed_key, seed_value);
        }

        Self { key, persistence, state: Mutex::new(StoreState { cache, lifecycle: Lifecycle::Configured }) }
    }

    /// Key the snapshot is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the persisted snapshot.
    ///
    /// A stored snapshot replaces the in-memory map, seed included. With no
    /// stored snapshot the map is left as configured.
    ///
    /// # Errors
    ///
    /// Returns the backend or decoding error, or `Stopped` after `stop()`.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::Stopped {
            return Err(CheckpointError::Stopped);
        }

        match self.persistence.load(&self.key).await? {
            Some(stored) => {
                info!(storage_key = %self.key, entries = stored.len(), "loaded stored offsets");
                state.cache.replace(stored);
            },
            None => {
                info!(storage_key = %self.key, entries = state.cache.len(), "no stored offsets, starting fresh");
            },
        }

        state.lifecycle = Lifecycle::Started;
        Ok(())
    }

    /// Writes the entire map under the storage key.
    ///
    /// # Errors
    ///
    /// Returns the encoding or backend error, or `Stopped` after `stop()`.
    pub async fn save(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.persist(&state).await
    }

    /// Merges `entries` into the map and saves it.
    ///
    /// # Errors
    ///
    /// Same as [`CheckpointStore::save`].
    pub async fn set<I, K, V>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::Stopped {
            return Err(CheckpointError::Stopped);
        }

        state.cache.extend(entries);
        self.persist(&state).await
    }

    /// Value currently cached under `key`.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.state.lock().await.cache.get(key).map(str::to_string)
    }

    /// Copy of the current map.
    pub async fn snapshot(&self) -> OffsetMap {
        self.state.lock().await.cache.entries().clone()
    }

    /// Stops the store without flushing.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.lifecycle != Lifecycle::Stopped {
            state.lifecycle = Lifecycle::Stopped;
            info!(storage_key = %self.key, "checkpoint store stopped");
        }
    }

    async fn persist(&self, state: &StoreState) -> Result<()> {
        if state.lifecycle == Lifecycle::Stopped {
            return Err(CheckpointError::Stopped);
        }

        self.persistence.save(&self.key, state.cache.entries()).await?;
        debug!(storage_key = %self.key, entries = state.cache.len(), "offsets saved");
        Ok(())
    }
}
