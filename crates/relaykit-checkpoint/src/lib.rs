//! Resumable checkpointing of capture progress.
//!
//! A [`CheckpointStore`] holds a flat map of offsets in memory and writes the
//! whole map as one JSON object under one key of a [`KvStore`]. At startup it
//! loads the map back, so a restarted source resumes where it left off.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use relaykit_checkpoint::{
//!     CheckpointOptions, CheckpointStore, KvOffsetPersistence, KvStoreConfig,
//! };
//!
//! # async fn example() -> relaykit_checkpoint::Result<()> {
//! let backend = KvStoreConfig::File { dir: "/var/lib/relaykit".into() }.build().await?;
//! let store = CheckpointStore::configure(
//!     &CheckpointOptions::default(),
//!     Arc::new(KvOffsetPersistence::new(backend)),
//! );
//!
//! store.start().await?;
//! store.set([("file:/var/log/events.jsonl", "1024")]).await?;
//! store.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod kv;
pub mod offsets;
pub mod persistence;
pub mod store;

pub use error::{CheckpointError, Result};
pub use kv::{FileKvStore, KvStore, KvStoreConfig, MemoryKvStore};
pub use offsets::{OffsetCache, OffsetMap};
pub use persistence::{KvOffsetPersistence, OffsetPersistence};
pub use store::{CheckpointOptions, CheckpointStore, DEFAULT_STORAGE_KEY};
