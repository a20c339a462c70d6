//! JSON-lines file capture source.
//!
//! Each line of the input file is one structured CloudEvent. The byte offset
//! just past the last line whose delivery is confirmed is stored in the
//! checkpoint store under `file:<path>`, so a restarted relay resumes where
//! the previous run stopped. Outcomes are committed strictly in file order:
//! once a line fails, the offset stays put for the rest of the run and the
//! failed line is read again after a restart.
//!
//! A checkpoint write failure, an unreadable stored offset, or an I/O error
//! on the input file stops the source and is reported once through
//! [`SourceFailures`], so the caller can stop the relay instead of running on
//! without durable progress.

use std::{
    io::{ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use relaykit_checkpoint::{CheckpointError, CheckpointStore};
use relaykit_core::{
    event_queue, DeliveryOutcome, Event, EventReceiver, EventSender, Receipt, ReceiverSlot, Source, SourceError,
};
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncSeekExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

const DESTROY_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings of a [`JsonLinesSource`].
#[derive(Debug, Clone)]
pub struct JsonLinesConfig {
    /// Source name used in logs and the user agent.
    pub name: String,
    /// File to read.
    pub path: PathBuf,
    /// Wait between reads once the end of the file is reached.
    pub poll_interval: Duration,
    /// Capacity of the event queue.
    pub queue_capacity: usize,
}

/// Errors that stop a [`JsonLinesSource`].
#[derive(Debug, Error)]
pub enum FileSourceError {
    /// Writing the delivered offset to the checkpoint store failed.
    #[error("failed to commit offset for {key}")]
    Checkpoint {
        /// Checkpoint entry key
        key: String,
        /// Underlying store error
        source: CheckpointError,
    },

    /// The stored offset is not a byte position.
    #[error("stored offset for {key} is not a byte position: {value:?}")]
    CorruptOffset {
        /// Checkpoint entry key
        key: String,
        /// Value found in the store
        value: String,
    },

    /// Opening or reading the input file failed.
    #[error("failed to read {}", .path.display())]
    Io {
        /// Input file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The event queue rejected a tuple.
    #[error(transparent)]
    Queue(#[from] SourceError),
}

/// Receives the error that stopped a [`JsonLinesSource`].
#[derive(Debug)]
pub struct SourceFailures {
    rx: mpsc::Receiver<FileSourceError>,
}

impl SourceFailures {
    /// Waits for the source to fail.
    ///
    /// Never resolves if the source stops without an error.
    pub async fn next(&mut self) -> FileSourceError {
        match self.rx.recv().await {
            Some(error) => error,
            None => std::future::pending().await,
        }
    }
}

/// Reports the first fatal error and stops both source tasks.
#[derive(Debug, Clone)]
struct FailureReporter {
    tx: mpsc::Sender<FileSourceError>,
    cancellation_token: CancellationToken,
}

impl FailureReporter {
    fn report(&self, error: FileSourceError) {
        error!(error = %error, "json-lines source failed, stopping");
        // Capacity one: only the first failure is kept.
        let _ = self.tx.try_send(error);
        self.cancellation_token.cancel();
    }
}

/// Tails a JSON-lines file and commits delivered offsets.
#[derive(Debug)]
pub struct JsonLinesSource {
    name: String,
    slot: ReceiverSlot,
    cancellation_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl JsonLinesSource {
    /// Starts reading `config.path` from the offset stored in `checkpoint`.
    ///
    /// Must be called inside a tokio runtime. The checkpoint store should
    /// already be started so the stored offset is visible. The returned
    /// [`SourceFailures`] resolves if the source stops on an error.
    pub fn spawn(config: JsonLinesConfig, checkpoint: Arc<CheckpointStore>) -> (Self, SourceFailures) {
        let (sender, receiver) = event_queue(config.queue_capacity);
        let (commit_tx, commit_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (failure_tx, failure_rx) = mpsc::channel(1);
        let cancellation_token = CancellationToken::new();
        let key = offset_key(&config.path);
        let failures = FailureReporter { tx: failure_tx, cancellation_token: cancellation_token.clone() };

        let reader = LineReader {
            path: config.path.clone(),
            key: key.clone(),
            poll_interval: config.poll_interval,
            checkpoint: checkpoint.clone(),
            sender,
            commits: commit_tx,
            cancellation_token: cancellation_token.clone(),
            failures: failures.clone(),
        };
        let committer = OffsetCommitter {
            key,
            checkpoint,
            commits: commit_rx,
            cancellation_token: cancellation_token.clone(),
            failures,
        };

        info!(source = %config.name, path = %config.path.display(), "starting json-lines source");

        let source = Self {
            name: config.name,
            slot: ReceiverSlot::new(receiver),
            cancellation_token,
            tasks: vec![tokio::spawn(reader.run()), tokio::spawn(committer.run())],
        };
        (source, SourceFailures { rx: failure_rx })
    }
}

#[async_trait]
impl Source for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue(&mut self) -> Result<EventReceiver, SourceError> {
        self.slot.take(&self.name)
    }

    async fn destroy(&mut self) -> Result<(), SourceError> {
        self.cancellation_token.cancel();

        let mut failures = Vec::new();
        for handle in self.tasks.drain(..) {
            match tokio::time::timeout(DESTROY_TIMEOUT, handle).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => failures.push(format!("task panicked: {e}")),
                Err(_) => failures.push("task did not finish in time".to_string()),
            }
        }

        if failures.is_empty() {
            info!(source = %self.name, "json-lines source destroyed");
            Ok(())
        } else {
            Err(SourceError::teardown(failures.join("; ")))
        }
    }
}

impl Drop for JsonLinesSource {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// Checkpoint entry key for the file at `path`.
pub fn offset_key(path: &Path) -> String {
    format!("file:{}", path.display())
}

/// A line whose outcome must be known before the offset can move past it.
struct PendingLine {
    end_offset: u64,
    receipt: Option<Receipt>,
}

struct LineReader {
    path: PathBuf,
    key: String,
    poll_interval: Duration,
    checkpoint: Arc<CheckpointStore>,
    sender: EventSender,
    commits: mpsc::Sender<PendingLine>,
    cancellation_token: CancellationToken,
    failures: FailureReporter,
}

impl LineReader {
    async fn run(self) {
        if let Err(e) = self.read().await {
            self.failures.report(e);
        }
        debug!(path = %self.path.display(), "line reader finished");
    }

    async fn read(&self) -> Result<(), FileSourceError> {
        let mut offset = self.resume_offset().await?;

        let Some(mut file) = self.open().await? else {
            return Ok(());
        };
        file.seek(SeekFrom::Start(offset)).await.map_err(|e| self.io_error(e))?;
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        loop {
            let read = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => return Ok(()),
                read = reader.read_until(b'\n', &mut line) => read.map_err(|e| self.io_error(e))?,
            };

            // End of file, possibly in the middle of a line still being written.
            if read == 0 || line.last() != Some(&b'\n') {
                if self.idle().await {
                    return Ok(());
                }
                continue;
            }

            offset += line.len() as u64;
            let event = parse_line(&line, offset);
            line.clear();

            let receipt = match event {
                Some(event) => {
                    let submitted = tokio::select! {
                        biased;
                        () = self.cancellation_token.cancelled() => return Ok(()),
                        submitted = self.sender.submit(event) => submitted,
                    };
                    match submitted {
                        Ok(receipt) => Some(receipt),
                        Err(SourceError::QueueClosed) => {
                            info!(path = %self.path.display(), "event queue closed, stopping reader");
                            return Ok(());
                        },
                        Err(e) => return Err(e.into()),
                    }
                },
                None => None,
            };

            if self.commits.send(PendingLine { end_offset: offset, receipt }).await.is_err() {
                return Ok(());
            }
        }
    }

    async fn resume_offset(&self) -> Result<u64, FileSourceError> {
        let Some(stored) = self.checkpoint.get(&self.key).await else {
            return Ok(0);
        };

        let offset = stored
            .parse()
            .map_err(|_| FileSourceError::CorruptOffset { key: self.key.clone(), value: stored.clone() })?;
        info!(path = %self.path.display(), offset, "resuming from stored offset");
        Ok(offset)
    }

    fn io_error(&self, source: std::io::Error) -> FileSourceError {
        FileSourceError::Io { path: self.path.clone(), source }
    }

    /// Waits for the file to appear. `None` means the source was cancelled first.
    async fn open(&self) -> Result<Option<File>, FileSourceError> {
        loop {
            match File::open(&self.path).await {
                Ok(file) => return Ok(Some(file)),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "waiting for input file");
                    if self.idle().await {
                        return Ok(None);
                    }
                },
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    /// Sleeps one poll interval. Returns true if cancelled meanwhile.
    async fn idle(&self) -> bool {
        tokio::select! {
            () = self.cancellation_token.cancelled() => true,
            () = tokio::time::sleep(self.poll_interval) => false,
        }
    }
}

/// Decodes one line; blank and malformed lines yield `None`.
fn parse_line(line: &[u8], end_offset: u64) -> Option<Event> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        trace!(end_offset, "skipping blank line");
        return None;
    }

    match Event::from_json(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(end_offset, error = %e, "skipping malformed line");
            None
        },
    }
}

struct OffsetCommitter {
    key: String,
    checkpoint: Arc<CheckpointStore>,
    commits: mpsc::Receiver<PendingLine>,
    cancellation_token: CancellationToken,
    failures: FailureReporter,
}

impl OffsetCommitter {
    async fn run(mut self) {
        let mut frozen = false;

        while let Some(PendingLine { end_offset, receipt }) = self.commits.recv().await {
            if let Some(receipt) = receipt {
                let event_id = receipt.event_id().clone();
                let outcome = tokio::select! {
                    biased;
                    outcome = receipt => outcome,
                    () = self.cancellation_token.cancelled() => break,
                };

                if let DeliveryOutcome::Failed { reason } = outcome {
                    if !frozen {
                        warn!(
                            event_id = %event_id,
                            end_offset,
                            reason = %reason,
                            "delivery failed, offset held until restart"
                        );
                    }
                    frozen = true;
                }
            }

            if frozen {
                continue;
            }

            if let Err(source) = self.checkpoint.set([(self.key.clone(), end_offset.to_string())]).await {
                self.failures.report(FileSourceError::Checkpoint { key: self.key.clone(), source });
                break;
            }
            trace!(key = %self.key, end_offset, "offset committed");
        }
    }
}
