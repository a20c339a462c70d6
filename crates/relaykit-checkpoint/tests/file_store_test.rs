//! Integration tests for the file-per-key backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use relaykit_checkpoint::{
    CheckpointError, CheckpointOptions, CheckpointStore, FileKvStore, KvOffsetPersistence, KvStore,
    KvStoreConfig,
};
use tempfile::TempDir;

#[tokio::test]
async fn values_persist_across_instances() -> Result<()> {
    let dir = TempDir::new()?;

    let store = FileKvStore::open(dir.path()).await?;
    store.set("offsets", Bytes::from_static(b"{\"a\":\"1\"}")).await?;

    let reopened = FileKvStore::open(dir.path()).await?;
    assert_eq!(reopened.get("offsets").await?, Some(Bytes::from_static(b"{\"a\":\"1\"}")));
    assert_eq!(reopened.get("missing").await?, None);
    Ok(())
}

#[tokio::test]
async fn overwrite_leaves_no_temp_files() -> Result<()> {
    let dir = TempDir::new()?;
    let store = FileKvStore::open(dir.path()).await?;

    store.set("offsets", Bytes::from_static(b"first")).await?;
    store.set("offsets", Bytes::from_static(b"second")).await?;

    let names: Vec<_> = std::fs::read_dir(dir.path())?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(names, vec!["offsets".to_string()]);
    assert_eq!(store.get("offsets").await?, Some(Bytes::from_static(b"second")));
    Ok(())
}

#[tokio::test]
async fn failed_replace_removes_temp_file() -> Result<()> {
    let dir = TempDir::new()?;
    let store = FileKvStore::open(dir.path()).await?;

    // A non-empty directory under the key makes the final rename fail.
    std::fs::create_dir_all(dir.path().join("offsets").join("occupied"))?;

    let result = store.set("offsets", Bytes::from_static(b"value")).await;
    assert!(matches!(result, Err(CheckpointError::Io { .. })));

    let names: Vec<_> = std::fs::read_dir(dir.path())?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(names, vec!["offsets".to_string()]);
    Ok(())
}

#[tokio::test]
async fn path_like_keys_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let store = FileKvStore::open(dir.path()).await?;

    let result = store.set("../outside", Bytes::from_static(b"x")).await;
    assert!(matches!(result, Err(CheckpointError::InvalidKey { .. })));

    let result = store.get("nested/key").await;
    assert!(matches!(result, Err(CheckpointError::InvalidKey { .. })));
    Ok(())
}

#[tokio::test]
async fn config_build_creates_directory() -> Result<()> {
    let dir = TempDir::new()?;
    let nested = dir.path().join("state").join("checkpoints");

    let backend = KvStoreConfig::File { dir: nested.clone() }.build().await?;
    backend.set("k", Bytes::from_static(b"v")).await?;

    assert!(nested.join("k").is_file());
    Ok(())
}

#[tokio::test]
async fn unusable_directory_is_backend_error() -> Result<()> {
    let dir = TempDir::new()?;
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file in the way")?;

    let result = KvStoreConfig::File { dir: blocker.join("checkpoints") }.build().await;
    assert!(matches!(result, Err(CheckpointError::Backend { .. })));
    Ok(())
}

#[tokio::test]
async fn checkpoint_store_round_trips_through_files() -> Result<()> {
    let dir = TempDir::new()?;
    let options = CheckpointOptions::default();

    let backend = KvStoreConfig::File { dir: dir.path().to_path_buf() }.build().await?;
    let store = CheckpointStore::configure(&options, Arc::new(KvOffsetPersistence::new(backend)));
    store.start().await?;
    store.set([("file:/tmp/in.jsonl", "4096")]).await?;
    store.stop().await;

    let backend = KvStoreConfig::File { dir: dir.path().to_path_buf() }.build().await?;
    let restarted = CheckpointStore::configure(&options, Arc::new(KvOffsetPersistence::new(backend)));
    restarted.start().await?;

    assert_eq!(restarted.get("file:/tmp/in.jsonl").await.as_deref(), Some("4096"));
    Ok(())
}
