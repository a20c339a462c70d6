//! Error types for event construction and source lifecycle.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building or decoding events.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required envelope attribute is missing or has an invalid value.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// The JSON document is not a structured CloudEvent.
    #[error("Malformed event JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors raised by capture sources and their queues.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The queue receiver was already handed to a consumer.
    #[error("queue for source '{source_name}' was already taken")]
    QueueTaken {
        /// Name of the source whose queue was requested twice
        source_name: String,
    },

    /// The consumer side of the queue is gone.
    #[error("event queue closed")]
    QueueClosed,

    /// Reading captured data failed.
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Teardown did not complete cleanly.
    #[error("source teardown failed: {message}")]
    Teardown {
        /// Description of the teardown failure
        message: String,
    },
}

impl SourceError {
    /// Creates a teardown error from a message.
    pub fn teardown(message: impl Into<String>) -> Self {
        Self::Teardown { message: message.into() }
    }
}
