//! HTTP client posting structured CloudEvents to the target.
//!
//! Handles request construction, response processing, and error categorization
//! for the circuit breaker's retry decisions.

use std::time::{Duration, Instant};

use relaykit_core::{Event, STRUCTURED_CONTENT_TYPE};
use reqwest::{header::CONTENT_TYPE, Response};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use url::Url;

use crate::error::{DeliveryError, Result};

/// Header carrying the 1-based attempt number.
pub const ATTEMPT_HEADER: &str = "X-Relaykit-Delivery-Attempt";

/// Response bodies kept beyond this many bytes are cut and marked truncated.
const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;
const TRUNCATED_SUFFIX: &str = "... (truncated)";

/// Configuration for the delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for one HTTP request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            user_agent: "relaykit".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// HTTP client for event delivery.
///
/// Holds a pooled `reqwest::Client`; clones share the pool.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

/// Response from a delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body (limited size).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the request was successful (2xx status).
    pub is_success: bool,
}

impl DeliveryResponse {
    /// Turns a non-2xx response into the matching error.
    ///
    /// # Errors
    ///
    /// `ClientError` for 4xx, `ServerError` for any other non-2xx status.
    pub fn into_result(self) -> Result<Self> {
        match self.status_code {
            200..=299 => Ok(self),
            400..=499 => Err(DeliveryError::client_error(self.status_code, self.body)),
            _ => Err(DeliveryError::server_error(self.status_code, self.body)),
        }
    }
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Posts `event` to `target` as structured CloudEvents JSON.
    ///
    /// Any HTTP response, including non-2xx, is returned as `Ok`; use
    /// [`DeliveryResponse::into_result`] to classify it.
    ///
    /// # Errors
    ///
    /// - `Serialization` if the event cannot be encoded
    /// - `Timeout` if the request exceeded the client timeout
    /// - `NetworkError` for connection and transport failures
    pub async fn deliver(&self, target: &Url, event: &Event, attempt: u32) -> Result<DeliveryResponse> {
        let span = info_span!(
            "event_delivery",
            event_id = %event.id(),
            url = %target,
            attempt
        );

        async move {
            let body = event.to_json().map_err(|e| DeliveryError::serialization(e.to_string()))?;
            let start_time = Instant::now();

            let request = self
                .client
                .post(target.clone())
                .header(CONTENT_TYPE, STRUCTURED_CONTENT_TYPE)
                .header(ATTEMPT_HEADER, attempt.to_string())
                .body(body);

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    tracing::debug!(duration_ms = duration.as_millis(), error = %e, "request failed");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start_time.elapsed();
            let delivery_response = Self::parse_response(response, duration).await;

            tracing::debug!(
                status = delivery_response.status_code,
                duration_ms = duration.as_millis(),
                "received response"
            );

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }

    async fn parse_response(response: Response, duration: Duration) -> DeliveryResponse {
        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();

        let body = match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
                let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE - TRUNCATED_SUFFIX.len()]);
                format!("{truncated}{TRUNCATED_SUFFIX}")
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read response body");
                format!("[failed to read response body: {e}]")
            },
        };

        DeliveryResponse { status_code, body, duration, is_success }
    }
}
