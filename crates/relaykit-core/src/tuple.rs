//! Events paired with their delivery-outcome channel.
//!
//! A producer that wants to know how delivery went creates a [`Tuple`] with
//! [`Tuple::new`] and keeps the returned [`Receipt`]. The consumer resolves the
//! tuple with [`Tuple::complete`], which takes `self`, so an outcome is
//! reported at most once per event. A tuple dropped without being completed
//! resolves its receipt as failed, so the receipt always yields exactly one
//! outcome.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::models::{Event, EventId};

/// Reason reported when a tuple is dropped before the consumer resolved it.
pub const ABANDONED_REASON: &str = "delivery abandoned before completion";

/// Final result of delivering one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The target accepted the event.
    Delivered,
    /// Delivery failed after the retry budget or was rejected outright.
    Failed {
        /// Human-readable failure reason
        reason: String,
    },
}

impl DeliveryOutcome {
    /// Creates a failed outcome.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: reason.into() }
    }

    /// Whether the event was delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Delivered => None,
            Self::Failed { reason } => Some(reason),
        }
    }
}

/// An event on its way to the delivery worker.
#[derive(Debug)]
pub struct Tuple {
    event: Event,
    outcome_tx: Option<oneshot::Sender<DeliveryOutcome>>,
}

impl Tuple {
    /// Wraps an event and returns the receipt that will carry its outcome.
    pub fn new(event: Event) -> (Self, Receipt) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let receipt = Receipt { event_id: event.id().clone(), outcome_rx };
        (Self { event, outcome_tx: Some(outcome_tx) }, receipt)
    }

    /// Wraps an event whose outcome nobody observes.
    pub fn detached(event: Event) -> Self {
        Self { event, outcome_tx: None }
    }

    /// The wrapped event.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Whether a producer is waiting on this tuple's outcome.
    pub fn has_receipt(&self) -> bool {
        self.outcome_tx.is_some()
    }

    /// Resolves the tuple, handing the outcome to the waiting producer.
    ///
    /// A producer that dropped its receipt is no longer interested; the
    /// outcome is discarded in that case.
    pub fn complete(mut self, outcome: DeliveryOutcome) {
        if let Some(outcome_tx) = self.outcome_tx.take() {
            let _ = outcome_tx.send(outcome);
        }
    }
}

/// Future resolving to the outcome of one tuple.
#[derive(Debug)]
pub struct Receipt {
    event_id: EventId,
    outcome_rx: oneshot::Receiver<DeliveryOutcome>,
}

impl Receipt {
    /// Id of the event this receipt tracks.
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }
}

impl Future for Receipt {
    type Output = DeliveryOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().outcome_rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| DeliveryOutcome::failed(ABANDONED_REASON)))
    }
}
