//! JSON-lines source tests: reading, tailing, and offset commits.

use std::{
    io::Write,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use relaykit::{offset_key, FileSourceError, JsonLinesConfig, JsonLinesSource};
use relaykit_checkpoint::{CheckpointError, CheckpointOptions, CheckpointStore, KvOffsetPersistence, MemoryKvStore};
use relaykit_core::{DeliveryOutcome, EventReceiver, Polled, Source, SourceError, Tuple};
use relaykit_testing::{json_lines, EventFixture};
use tempfile::TempDir;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

async fn started_store(kv: &MemoryKvStore) -> Result<Arc<CheckpointStore>> {
    let store = CheckpointStore::configure(
        &CheckpointOptions::default(),
        Arc::new(KvOffsetPersistence::new(Arc::new(kv.clone()))),
    );
    store.start().await?;
    Ok(Arc::new(store))
}

fn source_config(path: &Path) -> JsonLinesConfig {
    JsonLinesConfig {
        name: "jsonl".to_string(),
        path: path.to_path_buf(),
        poll_interval: POLL_INTERVAL,
        queue_capacity: 16,
    }
}

async fn next_tuple(receiver: &mut EventReceiver) -> Tuple {
    match receiver.poll(Duration::from_secs(5)).await {
        Polled::Item(tuple) => tuple,
        other => panic!("expected a tuple, got {other:?}"),
    }
}

async fn wait_for_offset(store: &CheckpointStore, key: &str, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if store.get(key).await == Some(expected.to_string()) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "offset never reached {expected}, last seen {:?}",
            store.get(key).await
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn delivered_lines_advance_offset() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.jsonl");
    let events = EventFixture::new().batch(3);
    let contents = json_lines(&events);
    std::fs::write(&path, &contents)?;

    let store = started_store(&MemoryKvStore::new()).await?;
    let (mut source, _failures) = JsonLinesSource::spawn(source_config(&path), store.clone());
    let mut receiver = source.queue()?;

    for expected in &events {
        let tuple = next_tuple(&mut receiver).await;
        assert_eq!(tuple.event().id(), expected.id());
        tuple.complete(DeliveryOutcome::Delivered);
    }

    wait_for_offset(&store, &offset_key(&path), contents.len()).await;
    source.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn failed_line_holds_offset_for_the_rest_of_the_run() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.jsonl");
    let events = EventFixture::new().batch(3);
    let first_line_len = json_lines(&events[..1]).len();
    std::fs::write(&path, json_lines(&events))?;

    let store = started_store(&MemoryKvStore::new()).await?;
    let (mut source, _failures) = JsonLinesSource::spawn(source_config(&path), store.clone());
    let mut receiver = source.queue()?;

    next_tuple(&mut receiver).await.complete(DeliveryOutcome::Delivered);
    next_tuple(&mut receiver).await.complete(DeliveryOutcome::failed("server error: HTTP 500"));
    next_tuple(&mut receiver).await.complete(DeliveryOutcome::Delivered);

    let key = offset_key(&path);
    wait_for_offset(&store, &key, first_line_len).await;
    tokio::time::sleep(POLL_INTERVAL * 5).await;
    assert_eq!(store.get(&key).await, Some(first_line_len.to_string()));

    source.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn reading_resumes_from_stored_offset() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.jsonl");
    let events = EventFixture::new().batch(3);
    std::fs::write(&path, json_lines(&events))?;

    let store = started_store(&MemoryKvStore::new()).await?;
    let first_line_len = json_lines(&events[..1]).len();
    store.set([(offset_key(&path), first_line_len.to_string())]).await?;

    let (mut source, _failures) = JsonLinesSource::spawn(source_config(&path), store.clone());
    let mut receiver = source.queue()?;

    assert_eq!(next_tuple(&mut receiver).await.event().id().as_str(), "evt-2");
    assert_eq!(next_tuple(&mut receiver).await.event().id().as_str(), "evt-3");

    source.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn malformed_and_blank_lines_are_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.jsonl");
    let events = EventFixture::new().batch(1);
    let contents = format!("not json at all\n\n{}", json_lines(&events));
    std::fs::write(&path, &contents)?;

    let store = started_store(&MemoryKvStore::new()).await?;
    let (mut source, _failures) = JsonLinesSource::spawn(source_config(&path), store.clone());
    let mut receiver = source.queue()?;

    let tuple = next_tuple(&mut receiver).await;
    assert_eq!(tuple.event().id().as_str(), "evt-1");
    tuple.complete(DeliveryOutcome::Delivered);

    wait_for_offset(&store, &offset_key(&path), contents.len()).await;
    source.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn appended_lines_are_picked_up() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.jsonl");
    let mut fixture = EventFixture::new();
    std::fs::write(&path, json_lines(&fixture.batch(1)))?;

    let store = started_store(&MemoryKvStore::new()).await?;
    let (mut source, _failures) = JsonLinesSource::spawn(source_config(&path), store);
    let mut receiver = source.queue()?;

    next_tuple(&mut receiver).await.complete(DeliveryOutcome::Delivered);
    assert!(matches!(receiver.poll(POLL_INTERVAL * 3).await, Polled::Empty));

    let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
    file.write_all(json_lines(&fixture.batch(1)).as_bytes())?;
    file.flush()?;

    assert_eq!(next_tuple(&mut receiver).await.event().id().as_str(), "evt-2");
    source.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn partial_line_waits_for_its_newline() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.jsonl");
    let line = json_lines(&EventFixture::new().batch(1));
    let (head, tail) = line.split_at(line.len() / 2);
    std::fs::write(&path, head)?;

    let store = started_store(&MemoryKvStore::new()).await?;
    let (mut source, _failures) = JsonLinesSource::spawn(source_config(&path), store);
    let mut receiver = source.queue()?;

    assert!(matches!(receiver.poll(POLL_INTERVAL * 5).await, Polled::Empty));

    let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
    file.write_all(tail.as_bytes())?;
    file.flush()?;

    assert_eq!(next_tuple(&mut receiver).await.event().id().as_str(), "evt-1");
    source.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn destroy_closes_queue_while_waiting_for_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("not-yet-written.jsonl");

    let store = started_store(&MemoryKvStore::new()).await?;
    let (mut source, _failures) = JsonLinesSource::spawn(source_config(&path), store);
    let mut receiver = source.queue()?;
    assert!(matches!(source.queue(), Err(SourceError::QueueTaken { .. })));

    tokio::time::timeout(Duration::from_secs(2), source.destroy()).await??;

    assert!(matches!(receiver.poll(Duration::from_secs(1)).await, Polled::Closed));
    Ok(())
}

#[tokio::test]
async fn failed_offset_commit_stops_the_source() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.jsonl");
    let events = EventFixture::new().batch(2);
    let first_line_len = json_lines(&events[..1]).len();
    std::fs::write(&path, json_lines(&events))?;

    let kv = MemoryKvStore::new();
    let store = started_store(&kv).await?;
    let (mut source, mut failures) = JsonLinesSource::spawn(source_config(&path), store.clone());
    let mut receiver = source.queue()?;

    next_tuple(&mut receiver).await.complete(DeliveryOutcome::Delivered);
    wait_for_offset(&store, &offset_key(&path), first_line_len).await;

    kv.set_fail_writes(true);
    next_tuple(&mut receiver).await.complete(DeliveryOutcome::Delivered);

    let failure = tokio::time::timeout(Duration::from_secs(5), failures.next()).await?;
    assert!(
        matches!(failure, FileSourceError::Checkpoint { source: CheckpointError::Backend { .. }, .. }),
        "unexpected failure: {failure:?}"
    );
    assert!(matches!(receiver.poll(Duration::from_secs(1)).await, Polled::Closed));

    source.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn unreadable_stored_offset_stops_the_source() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("events.jsonl");
    std::fs::write(&path, json_lines(&EventFixture::new().batch(2)))?;

    let store = started_store(&MemoryKvStore::new()).await?;
    store.set([(offset_key(&path), "{\"pos\":12}".to_string())]).await?;

    let (mut source, mut failures) = JsonLinesSource::spawn(source_config(&path), store);
    let mut receiver = source.queue()?;

    let failure = tokio::time::timeout(Duration::from_secs(5), failures.next()).await?;
    match failure {
        FileSourceError::CorruptOffset { key, value } => {
            assert_eq!(key, offset_key(&path));
            assert_eq!(value, "{\"pos\":12}");
        },
        other => panic!("expected CorruptOffset, got {other:?}"),
    }
    assert!(matches!(receiver.poll(Duration::from_secs(1)).await, Polled::Closed));

    source.destroy().await?;
    Ok(())
}
