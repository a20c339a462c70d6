//! Bounded hand-off channel between a capture source and the delivery worker.
//!
//! The source keeps the [`EventSender`] and gives the [`EventReceiver`] to the
//! worker. The receiver is polled with a timeout so the consumer loop can
//! observe shutdown between items even when the source is idle.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::{
    error::SourceError,
    models::Event,
    tuple::{Receipt, Tuple},
};

/// Creates a bounded event queue.
///
/// A capacity of zero is raised to one.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer half of the event queue.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Tuple>,
}

impl EventSender {
    /// Enqueues a tuple, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::QueueClosed` if the receiver was dropped. The
    /// tuple is dropped with the error, which resolves its receipt as
    /// abandoned.
    pub async fn send(&self, tuple: Tuple) -> Result<(), SourceError> {
        self.tx.send(tuple).await.map_err(|_| SourceError::QueueClosed)
    }

    /// Wraps an event in a tuple, enqueues it, and returns its receipt.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::QueueClosed` if the receiver was dropped.
    pub async fn submit(&self, event: Event) -> Result<Receipt, SourceError> {
        let (tuple, receipt) = Tuple::new(event);
        self.send(tuple).await?;
        Ok(receipt)
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Result of waiting on the queue.
#[derive(Debug)]
pub enum Polled {
    /// A tuple arrived.
    Item(Tuple),
    /// Nothing arrived within the timeout.
    Empty,
    /// Every sender was dropped and the queue is drained.
    Closed,
}

/// Consumer half of the event queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Tuple>,
}

impl EventReceiver {
    /// Waits up to `timeout` for the next tuple.
    pub async fn poll(&mut self, timeout: Duration) -> Polled {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(tuple)) => Polled::Item(tuple),
            Ok(None) => Polled::Closed,
            Err(_elapsed) => Polled::Empty,
        }
    }

    /// Stops accepting new tuples; queued ones can still be polled.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::DeliveryOutcome;

    fn event(id: &str) -> Event {
        Event::builder().id(id).source("/test").event_type("test.event").build().unwrap()
    }

    #[tokio::test]
    async fn poll_times_out_when_idle() {
        let (_tx, mut rx) = event_queue(4);
        assert!(matches!(rx.poll(Duration::from_millis(10)).await, Polled::Empty));
    }

    #[tokio::test]
    async fn poll_reports_closed_after_senders_drop() {
        let (tx, mut rx) = event_queue(4);
        tx.send(Tuple::detached(event("e1"))).await.unwrap();
        drop(tx);

        assert!(matches!(rx.poll(Duration::from_millis(10)).await, Polled::Item(_)));
        assert!(matches!(rx.poll(Duration::from_millis(10)).await, Polled::Closed));
    }

    #[tokio::test]
    async fn tuples_arrive_in_fifo_order() {
        let (tx, mut rx) = event_queue(8);
        for id in ["a", "b", "c"] {
            tx.send(Tuple::detached(event(id))).await.unwrap();
        }

        for expected in ["a", "b", "c"] {
            match rx.poll(Duration::from_millis(10)).await {
                Polled::Item(tuple) => assert_eq!(tuple.event().id().as_str(), expected),
                other => panic!("expected item, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn submit_into_closed_queue_fails() {
        let (tx, rx) = event_queue(1);
        drop(rx);

        let result = tx.submit(event("e1")).await;
        assert!(matches!(result, Err(SourceError::QueueClosed)));
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn zero_capacity_is_usable() {
        let (tx, mut rx) = event_queue(0);
        let receipt = tx.submit(event("e1")).await.unwrap();

        let Polled::Item(tuple) = rx.poll(Duration::from_millis(10)).await else {
            panic!("expected queued tuple");
        };
        tuple.complete(DeliveryOutcome::Delivered);
        assert!(receipt.await.is_delivered());
    }
}
