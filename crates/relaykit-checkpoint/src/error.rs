//! Error types for checkpoint persistence.
//!
//! Every variant is fatal to the caller: a checkpoint that cannot be read or
//! written means resume positions can no longer be trusted.

use thiserror::Error;

/// Result type alias for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors raised while loading or saving offsets.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The key-value backend could not be constructed or refused an operation.
    #[error("checkpoint backend failed: {message}")]
    Backend {
        /// Backend error message
        message: String,
    },

    /// Filesystem access for a key failed.
    #[error("checkpoint I/O failed for key '{key}': {source}")]
    Io {
        /// Key being read or written
        key: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The key cannot be stored by this backend.
    #[error("invalid checkpoint key '{key}': {reason}")]
    InvalidKey {
        /// Rejected key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// The offset map could not be encoded.
    #[error("failed to encode offsets: {0}")]
    Encode(#[source] serde_json::Error),

    /// The stored value is not a JSON object of strings.
    #[error("stored offsets under '{key}' are corrupt: {source}")]
    Corrupt {
        /// Key the value was read from
        key: String,
        /// Decoder error
        #[source]
        source: serde_json::Error,
    },

    /// The store was stopped.
    #[error("checkpoint store is stopped")]
    Stopped,
}

impl CheckpointError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    /// Creates an I/O error for `key`.
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { key: key.into(), source }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into(), reason: reason.into() }
    }
}
