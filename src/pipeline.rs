//! Wires the checkpoint store, the JSON-lines source, and the delivery worker.

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use relaykit_checkpoint::{CheckpointStore, KvOffsetPersistence};
use relaykit_delivery::DeliveryWorker;
use tracing::{error, info};

use crate::{config::Config, file_source::JsonLinesSource};

/// A configured relay, run until a shutdown future completes.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    /// Creates a pipeline from validated configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Configuration the pipeline runs with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs the relay until `shutdown` resolves or the source fails, then
    /// stops the worker and the checkpoint store in that order.
    ///
    /// # Errors
    ///
    /// Fails before any event is read if the checkpoint backend cannot be
    /// opened, the stored offsets cannot be loaded, or the target is invalid.
    /// Fails after shutting down if the source stopped on an error, such as
    /// a checkpoint write failure or an unreadable stored offset.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let backend =
            self.config.to_kv_store_config().build().await.context("Failed to open checkpoint backend")?;
        let checkpoint = Arc::new(CheckpointStore::configure(
            &self.config.to_checkpoint_options(),
            Arc::new(KvOffsetPersistence::new(backend)),
        ));
        checkpoint.start().await.context("Failed to load stored offsets")?;

        let (source, mut failures) = JsonLinesSource::spawn(self.config.to_source_config()?, checkpoint.clone());
        let mut worker = DeliveryWorker::new(self.config.to_worker_config(), Box::new(source))
            .context("Failed to create delivery worker")?;

        if let Err(e) = worker.start().await {
            worker.stop().await;
            checkpoint.stop().await;
            return Err(e).context("Failed to start delivery worker");
        }

        info!(target_url = %self.config.target, "relay running");
        let failure = tokio::select! {
            () = shutdown => {
                info!("shutdown requested, stopping relay");
                None
            },
            failure = failures.next() => {
                error!(error = %failure, "source failed, stopping relay");
                Some(failure)
            },
        };

        worker.stop().await;
        checkpoint.stop().await;

        let stats = worker.stats().await;
        info!(
            received = stats.events_received,
            delivered = stats.events_delivered,
            failed = stats.events_failed,
            "relay stopped"
        );

        match failure {
            Some(failure) => Err(failure).context("Relay stopped after a source failure"),
            None => Ok(()),
        }
    }
}
