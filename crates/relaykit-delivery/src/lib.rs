//! Reliable delivery of captured events to an HTTP target.
//!
//! A [`DeliveryWorker`] takes the queue of a [`relaykit_core::Source`] and
//! drains it one tuple at a time. Each event is posted as structured
//! CloudEvents JSON through a [`CircuitBreaker`] that bounds the number of
//! attempts, times out slow attempts, and fails fast while the target is
//! unhealthy. The tuple's receipt resolves to the final outcome.
//!
//! # Example
//!
//! ```no_run
//! use relaykit_core::Source;
//! use relaykit_delivery::{DeliveryError, DeliveryWorker, WorkerConfig};
//!
//! # async fn example(source: Box<dyn Source>) -> Result<(), DeliveryError> {
//! let config = WorkerConfig::new("http://localhost:8080/events");
//! let mut worker = DeliveryWorker::new(config, source)?;
//!
//! worker.start().await?;
//! // ... until shutdown is requested
//! worker.stop().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

pub mod circuit;
pub mod client;
pub mod error;
pub mod retry;
pub mod worker;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState, CircuitStats};
pub use client::{ClientConfig, DeliveryClient, DeliveryResponse};
pub use error::{DeliveryError, ErrorCategory, Result};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use worker::{parse_target, DeliveryWorker, WorkerConfig, WorkerStats};

/// Default number of attempts per event.
pub const DEFAULT_SEND_ATTEMPTS: u32 = 3;

/// Default wait on an idle queue before the loop checks in again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
