//! Scripted capture source for worker tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use relaykit_core::{event_queue, EventReceiver, EventSender, ReceiverSlot, Source, SourceError};

/// Source whose queue is fed directly by the test.
#[derive(Debug)]
pub struct ChannelSource {
    name: String,
    sender: Option<EventSender>,
    slot: ReceiverSlot,
    destroyed: Arc<AtomicUsize>,
    fail_destroy: bool,
}

impl ChannelSource {
    /// Creates a source with a queue of `capacity`.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = event_queue(capacity);
        Self {
            name: name.into(),
            sender: Some(sender),
            slot: ReceiverSlot::new(receiver),
            destroyed: Arc::new(AtomicUsize::new(0)),
            fail_destroy: false,
        }
    }

    /// Makes `destroy()` report an error.
    #[must_use]
    pub fn failing_destroy(mut self) -> Self {
        self.fail_destroy = true;
        self
    }

    /// Producer handle for feeding the queue.
    ///
    /// # Panics
    ///
    /// Panics if the source was already destroyed.
    pub fn sender(&self) -> EventSender {
        self.sender.clone().expect("source already destroyed")
    }

    /// Probe counting `destroy()` calls.
    pub fn destroy_probe(&self) -> DestroyProbe {
        DestroyProbe { count: self.destroyed.clone() }
    }
}

#[async_trait]
impl Source for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn queue(&mut self) -> Result<EventReceiver, SourceError> {
        self.slot.take(&self.name)
    }

    async fn destroy(&mut self) -> Result<(), SourceError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.sender = None;

        if self.fail_destroy {
            return Err(SourceError::teardown("scripted teardown failure"));
        }
        Ok(())
    }
}

/// Observes how often a source was destroyed.
#[derive(Debug, Clone)]
pub struct DestroyProbe {
    count: Arc<AtomicUsize>,
}

impl DestroyProbe {
    /// Number of `destroy()` calls so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}
