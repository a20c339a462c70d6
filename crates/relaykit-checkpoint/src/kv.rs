//! Key-value backends holding checkpoint blobs.
//!
//! Offsets are stored as one opaque value per key. [`MemoryKvStore`] keeps
//! values in process memory and is used by tests and by deployments that do
//! not need to survive restarts. [`FileKvStore`] keeps one file per key and
//! replaces values atomically.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt, sync::RwLock};
use tracing::debug;

use crate::error::{CheckpointError, Result};

/// Storage engine for checkpoint values.
#[async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Reads the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;
}

/// In-memory backend.
///
/// Clones share the same entries, so a clone outlives a checkpoint store the
/// way a database outlives a process.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Bytes>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail with a backend error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CheckpointError::backend(format!("write to '{key}' rejected")));
        }
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Directory backend storing one file per key.
///
/// Writes go to a temporary file in the same directory that is then renamed
/// over the target, so readers see either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    /// Opens the backend, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Backend` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|e| {
            CheckpointError::backend(format!("cannot create checkpoint directory {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    /// Directory holding the values.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointError::io(key, e)),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp_path = self.dir.join(format!(".{key}.{}.tmp", std::process::id()));

        if let Err(e) = replace_file(&tmp_path, &path, &value).await {
            // Best-effort cleanup.
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CheckpointError::io(key, e));
        }

        debug!(key, bytes = value.len(), "checkpoint value written");
        Ok(())
    }
}

/// Writes `value` to `tmp_path`, syncs it, and renames it over `path`.
async fn replace_file(tmp_path: &Path, path: &Path, value: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp_path).await?;
    file.write_all(value).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp_path, path).await
}

/// Keys must be non-empty, use only `[A-Za-z0-9._-]`, and not start with a dot.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CheckpointError::invalid_key(key, "empty key"));
    }
    if key.starts_with('.') {
        return Err(CheckpointError::invalid_key(key, "leading dot"));
    }
    if let Some(c) = key.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))) {
        return Err(CheckpointError::invalid_key(key, format!("unsupported character {c:?}")));
    }
    Ok(())
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum KvStoreConfig {
    /// Process-local memory; nothing survives a restart.
    #[default]
    Memory,
    /// One file per key under `dir`.
    File {
        /// Directory holding the values
        dir: PathBuf,
    },
}

impl KvStoreConfig {
    /// Constructs the configured backend.
    ///
    /// # Errors
    ///
    /// Returns `CheckpointError::Backend` if the backend cannot be created.
    pub async fn build(&self) -> Result<Arc<dyn KvStore>> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryKvStore::new())),
            Self::File { dir } => Ok(Arc::new(FileKvStore::open(dir.clone()).await?)),
        }
    }
}
