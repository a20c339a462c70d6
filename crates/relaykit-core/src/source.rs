//! Capture source contract seen by the delivery worker.

use async_trait::async_trait;

use crate::{error::SourceError, queue::EventReceiver};

/// A producer of captured events.
///
/// The source owns its queue and hands the receiving half to exactly one
/// consumer. When the consumer stops it calls [`Source::destroy`] so the
/// source can release its capture resources.
#[async_trait]
pub trait Source: Send + Sync {
    /// Short name used in logs and in the HTTP user agent.
    fn name(&self) -> &str;

    /// Hands over the queue receiver.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::QueueTaken` on every call after the first.
    fn queue(&mut self) -> Result<EventReceiver, SourceError>;

    /// Teardown hook invoked by the consumer on stop.
    async fn destroy(&mut self) -> Result<(), SourceError>;
}

/// Holds a queue receiver until a consumer takes it.
#[derive(Debug)]
pub struct ReceiverSlot {
    receiver: Option<EventReceiver>,
}

impl ReceiverSlot {
    /// Stores a receiver for later hand-over.
    pub fn new(receiver: EventReceiver) -> Self {
        Self { receiver: Some(receiver) }
    }

    /// Takes the receiver on behalf of the named source.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::QueueTaken` if it was already taken.
    pub fn take(&mut self, source_name: &str) -> Result<EventReceiver, SourceError> {
        self.receiver
            .take()
            .ok_or_else(|| SourceError::QueueTaken { source_name: source_name.to_string() })
    }
}
