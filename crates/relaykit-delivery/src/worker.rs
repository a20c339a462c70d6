//! Delivery worker draining a source's queue into one HTTP target.
//!
//! The worker owns the source for its lifetime. `start()` validates the
//! target, takes the queue receiver, and spawns a single loop task; `stop()`
//! cancels the loop cooperatively and then tears the source down. Each tuple
//! is delivered through the circuit breaker and completed exactly once.

use std::{sync::Arc, time::Duration};

use relaykit_core::{Clock, DeliveryOutcome, Event, EventReceiver, Polled, RealClock, Source, Tuple};
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::{
    circuit::{CircuitBreaker, CircuitConfig},
    client::{ClientConfig, DeliveryClient, DeliveryResponse},
    error::{DeliveryError, ErrorCategory, Result},
};

/// Configuration for the delivery worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Absolute `http`/`https` URL every event is posted to.
    pub target: String,

    /// How long one queue wait lasts before the loop checks in again.
    pub poll_interval: Duration,

    /// Maximum time `stop()` waits for the loop task.
    pub shutdown_timeout: Duration,

    /// Retry budget, attempt timeout, and breaker thresholds.
    pub circuit: CircuitConfig,

    /// HTTP client configuration. The user agent is replaced with one
    /// derived from the source name.
    pub client: ClientConfig,
}

impl WorkerConfig {
    /// Default configuration for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        let circuit = CircuitConfig::with_send_attempts(crate::DEFAULT_SEND_ATTEMPTS);
        let client = ClientConfig { timeout: circuit.attempt_timeout, ..ClientConfig::default() };

        Self {
            target: target.into(),
            poll_interval: crate::DEFAULT_POLL_INTERVAL,
            shutdown_timeout: Duration::from_secs(30),
            circuit,
            client,
        }
    }
}

/// Counters for worker monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Tuples taken off the queue.
    pub events_received: u64,
    /// Tuples completed as delivered.
    pub events_delivered: u64,
    /// Tuples completed as failed.
    pub events_failed: u64,
    /// HTTP attempts made.
    pub send_attempts: u64,
}

/// Single-consumer delivery worker.
pub struct DeliveryWorker {
    config: WorkerConfig,
    source: Box<dyn Source>,
    client: Arc<DeliveryClient>,
    breaker: Arc<CircuitBreaker>,
    stats: Arc<RwLock<WorkerStats>>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    stopped: bool,
}

impl DeliveryWorker {
    /// Creates a worker for `source` using the wall clock.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn new(config: WorkerConfig, source: Box<dyn Source>) -> Result<Self> {
        Self::with_clock(config, source, Arc::new(RealClock::new()))
    }

    /// Creates a worker whose breaker measures time with `clock`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn with_clock(config: WorkerConfig, source: Box<dyn Source>, clock: Arc<dyn Clock>) -> Result<Self> {
        let client_config =
            ClientConfig { user_agent: format!("relaykit-{}", source.name()), ..config.client.clone() };
        let client = Arc::new(DeliveryClient::new(client_config)?);
        let breaker = Arc::new(CircuitBreaker::new(source.name(), config.circuit.clone(), clock));

        Ok(Self {
            config,
            source,
            client,
            breaker,
            stats: Arc::new(RwLock::new(WorkerStats::default())),
            cancellation_token: CancellationToken::new(),
            handle: None,
            stopped: false,
        })
    }

    /// Validates the target and spawns the delivery loop.
    ///
    /// Returns as soon as the loop task is spawned.
    ///
    /// # Errors
    ///
    /// - `InvalidTarget` if the target is not an absolute http(s) URL
    /// - `ConfigurationError` if the worker was already started or the
    ///   source's queue is unavailable
    pub async fn start(&mut self) -> Result<()> {
        info!(source = self.source.name(), url = %self.config.target, "starting delivery worker");

        if self.handle.is_some() || self.stopped {
            return Err(DeliveryError::configuration("delivery worker can only be started once"));
        }

        let target = parse_target(&self.config.target)?;
        let receiver = self
            .source
            .queue()
            .map_err(|e| DeliveryError::configuration(format!("source queue unavailable: {e}")))?;

        let delivery_loop = DeliveryLoop {
            target,
            receiver,
            client: self.client.clone(),
            breaker: self.breaker.clone(),
            stats: self.stats.clone(),
            cancellation_token: self.cancellation_token.clone(),
            poll_interval: self.config.poll_interval,
        };
        self.handle = Some(tokio::spawn(delivery_loop.run()));

        info!("delivery worker started");
        Ok(())
    }

    /// Stops the loop and tears down the source.
    ///
    /// The delivery in progress, if any, runs to completion. Tuples still in
    /// the queue resolve as abandoned. Teardown errors are logged. Calling
    /// this more than once has no further effect.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        info!(source = self.source.name(), "stopping delivery worker");
        self.cancellation_token.cancel();

        if let Some(handle) = self.handle.take() {
            match tokio::time::timeout(self.config.shutdown_timeout, handle).await {
                Ok(Ok(())) => debug!("delivery loop joined"),
                Ok(Err(join_error)) => error!(error = %join_error, "delivery loop panicked"),
                Err(_) => warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis(),
                    "delivery loop did not finish within shutdown timeout"
                ),
            }
        }

        if let Err(e) = self.source.destroy().await {
            error!(source = self.source.name(), error = %e, "source teardown failed");
        }

        info!("delivery worker stopped");
    }

    /// Whether the loop task is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Snapshot of the worker counters.
    pub async fn stats(&self) -> WorkerStats {
        self.stats.read().await.clone()
    }

    /// Circuit breaker guarding the target.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl Drop for DeliveryWorker {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// Parses a delivery target.
///
/// # Errors
///
/// Returns `DeliveryError::InvalidTarget` unless `target` is an absolute
/// `http` or `https` URL with a host.
pub fn parse_target(target: &str) -> Result<Url> {
    let url = Url::parse(target).map_err(|e| DeliveryError::invalid_target(target, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {},
        scheme => {
            return Err(DeliveryError::invalid_target(target, format!("unsupported scheme '{scheme}'")))
        },
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(DeliveryError::invalid_target(target, "missing host"));
    }

    Ok(url)
}

struct DeliveryLoop {
    target: Url,
    receiver: EventReceiver,
    client: Arc<DeliveryClient>,
    breaker: Arc<CircuitBreaker>,
    stats: Arc<RwLock<WorkerStats>>,
    cancellation_token: CancellationToken,
    poll_interval: Duration,
}

impl DeliveryLoop {
    async fn run(mut self) {
        debug!(url = %self.target, "delivery loop running");

        loop {
            let polled = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    debug!("queue wait interrupted by shutdown");
                    break;
                }
                polled = self.receiver.poll(self.poll_interval) => polled,
            };

            match polled {
                Polled::Item(tuple) => self.deliver(tuple).await,
                Polled::Empty => trace!("no events within poll interval"),
                Polled::Closed => {
                    info!("event queue closed, delivery loop exiting");
                    break;
                },
            }
        }

        self.receiver.close();
        debug!("delivery loop stopped");
    }

    async fn deliver(&self, tuple: Tuple) {
        let event = tuple.event();
        info!(event_id = %event.id(), "new event");
        self.stats.write().await.events_received += 1;

        let result = self.breaker.execute(|attempt| self.send_attempt(event, attempt)).await;

        match result {
            Ok(response) => {
                debug!(
                    event_id = %event.id(),
                    status = response.status_code,
                    envelope = %envelope_json(event),
                    "event delivered"
                );
                self.stats.write().await.events_delivered += 1;
                tuple.complete(DeliveryOutcome::Delivered);
            },
            Err(error) => {
                warn!(
                    event_id = %event.id(),
                    category = %ErrorCategory::from(&error),
                    error = %error,
                    "event delivery failed"
                );
                self.stats.write().await.events_failed += 1;
                tuple.complete(DeliveryOutcome::failed(error.to_string()));
            },
        }
    }

    async fn send_attempt(&self, event: &Event, attempt: u32) -> Result<DeliveryResponse> {
        self.stats.write().await.send_attempts += 1;

        let result =
            self.client.deliver(&self.target, event, attempt).await.and_then(DeliveryResponse::into_result);

        if let Err(error) = &result {
            info!(event_id = %event.id(), attempt, error = %error, "send event error");
        }
        result
    }
}

fn envelope_json(event: &Event) -> String {
    event.to_json().map(|bytes| String::from_utf8_lossy(&bytes).into_owned()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_targets_parse() {
        for target in ["http://localhost:8080/events", "https://sink.example.com", "http://10.0.0.1/x?y=1"] {
            assert!(parse_target(target).is_ok(), "{target} should be accepted");
        }
    }

    #[test]
    fn malformed_targets_rejected() {
        for target in ["", "not a url", "/relative/path", "ftp://example.com/file", "mailto:ops@example.com", "http://"]
        {
            match parse_target(target) {
                Err(DeliveryError::InvalidTarget { target: rejected, .. }) => assert_eq!(rejected, target),
                other => panic!("{target:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn default_config_matches_send_attempts() {
        let config = WorkerConfig::new("http://localhost/");
        assert_eq!(config.circuit.max_retries, 2);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.client.timeout, Duration::from_millis(3000));
    }
}
