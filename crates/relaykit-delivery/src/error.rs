//! Error types for event delivery.
//!
//! Covers transport failures, HTTP status failures, circuit-breaker
//! rejections, and the startup errors that abort the worker. Producers only
//! ever see the display string of these errors; the variants exist so the
//! worker and breaker can categorize failures for logging and retry
//! decisions.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors that can occur while delivering events.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// An attempt did not complete within its timeout.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Attempt timeout in milliseconds
        timeout_ms: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP response indicated a non-success status other than 4xx.
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Circuit breaker is open, the call was not attempted.
    #[error("circuit breaker '{breaker}' is open")]
    CircuitOpen {
        /// Name of the breaker that rejected the call
        breaker: String,
    },

    /// Every attempt allowed by the retry budget failed.
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: Box<DeliveryError>,
    },

    /// The configured target is not a usable URL.
    #[error("target is invalid {target}: {message}")]
    InvalidTarget {
        /// The rejected target string
        target: String,
        /// Why it was rejected
        message: String,
    },

    /// Invalid worker configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// The event could not be encoded as a request body.
    #[error("event serialization failed: {message}")]
    Serialization {
        /// Encoder error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) }
    }

    /// Creates a client error from HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a circuit open error.
    pub fn circuit_open(breaker: impl Into<String>) -> Self {
        Self::CircuitOpen { breaker: breaker.into() }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(attempts: u32, last_error: Self) -> Self {
        Self::RetriesExhausted { attempts, last_error: Box::new(last_error) }
    }

    /// Creates an invalid target error.
    pub fn invalid_target(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTarget { target: target.into(), message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Whether another attempt could succeed.
    ///
    /// Every failure reported by the endpoint or the network is retried,
    /// including 4xx responses. Local failures (encoding, configuration) and
    /// breaker outcomes are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ClientError { .. }
            | Self::ServerError { .. } => true,

            Self::CircuitOpen { .. }
            | Self::RetriesExhausted { .. }
            | Self::InvalidTarget { .. }
            | Self::ConfigurationError { .. }
            | Self::Serialization { .. } => false,
        }
    }
}

/// Category of delivery error for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Circuit breaker protection.
    Circuit,
    /// Configuration problems.
    Configuration,
    /// Local encoding failures.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::CircuitOpen { .. } => Self::Circuit,
            DeliveryError::RetriesExhausted { last_error, .. } => Self::from(last_error.as_ref()),
            DeliveryError::InvalidTarget { .. } | DeliveryError::ConfigurationError { .. } => {
                Self::Configuration
            },
            DeliveryError::Serialization { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Circuit => write!(f, "circuit"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(Duration::from_secs(3)).is_retryable());
        assert!(DeliveryError::server_error(503, "unavailable").is_retryable());
        assert!(DeliveryError::client_error(404, "not found").is_retryable());

        assert!(!DeliveryError::circuit_open("target").is_retryable());
        assert!(!DeliveryError::serialization("bad extension").is_retryable());
        assert!(!DeliveryError::invalid_target("nope", "relative URL").is_retryable());
        assert!(!DeliveryError::retries_exhausted(3, DeliveryError::network("x")).is_retryable());
    }

    #[test]
    fn exhausted_retries_categorized_by_last_error() {
        let error = DeliveryError::retries_exhausted(3, DeliveryError::server_error(500, ""));
        assert_eq!(ErrorCategory::from(&error), ErrorCategory::Server);

        let error = DeliveryError::retries_exhausted(2, DeliveryError::timeout(Duration::ZERO));
        assert_eq!(ErrorCategory::from(&error), ErrorCategory::Network);
    }

    #[test]
    fn error_display_format() {
        let error = DeliveryError::timeout(Duration::from_millis(3000));
        assert_eq!(error.to_string(), "request timed out after 3000ms");

        let exhausted = DeliveryError::retries_exhausted(3, error);
        assert_eq!(
            exhausted.to_string(),
            "delivery failed after 3 attempts: request timed out after 3000ms"
        );

        let invalid = DeliveryError::invalid_target("not a url", "relative URL without a base");
        assert_eq!(invalid.to_string(), "target is invalid not a url: relative URL without a base");
    }
}
