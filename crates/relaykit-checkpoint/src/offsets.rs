//! In-memory offset map and its stored encoding.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::{CheckpointError, Result};

/// Opaque resume positions keyed by opaque strings.
pub type OffsetMap = BTreeMap<String, String>;

/// Working copy of the offsets between saves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetCache {
    entries: OffsetMap,
}

impl OffsetCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Inserts or replaces one entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Merges `entries` into the cache.
    pub fn extend<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.entries.extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Replaces the whole map.
    pub fn replace(&mut self, entries: OffsetMap) {
        self.entries = entries;
    }

    /// Borrow of the current map.
    pub fn entries(&self) -> &OffsetMap {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Encodes the map as one compact JSON object.
pub fn encode(offsets: &OffsetMap) -> Result<Bytes> {
    serde_json::to_vec(offsets).map(Bytes::from).map_err(CheckpointError::Encode)
}

/// Decodes a value written by [`encode`].
pub fn decode(key: &str, value: &[u8]) -> Result<OffsetMap> {
    serde_json::from_slice(value).map_err(|source| CheckpointError::Corrupt { key: key.to_string(), source })
}
