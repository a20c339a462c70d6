//! HTTP sink mocking for delivery tests.

use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use http::HeaderMap;
use relaykit_core::Event;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Path every mocked target listens on.
pub const EVENTS_PATH: &str = "/events";

/// A scripted response of the mock target.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Respond immediately with the status.
    Status(u16),
    /// Respond with the status after a delay.
    Delayed {
        /// Status code
        status: u16,
        /// Delay before the response is sent
        delay: Duration,
    },
}

impl MockResponse {
    fn template(&self) -> ResponseTemplate {
        match self {
            Self::Status(status) => ResponseTemplate::new(*status),
            Self::Delayed { status, delay } => ResponseTemplate::new(*status).set_delay(*delay),
        }
    }
}

/// Mock HTTP target receiving events on [`EVENTS_PATH`].
pub struct MockTarget {
    server: MockServer,
}

impl MockTarget {
    /// Starts a new mock target on a random port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// URL the worker should deliver to.
    pub fn url(&self) -> String {
        format!("{}{EVENTS_PATH}", self.server.uri())
    }

    /// Base URL of the underlying server.
    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Answers every request with `status`.
    pub async fn respond_always(&self, status: u16) {
        self.mount(MockResponse::Status(status), None).await;
    }

    /// Answers every request with `status` after `delay`.
    pub async fn respond_slowly(&self, status: u16, delay: Duration) {
        self.mount(MockResponse::Delayed { status, delay }, None).await;
    }

    /// Answers requests with `responses` in order, then with `fallback`.
    pub async fn respond_sequence(&self, responses: Vec<MockResponse>, fallback: u16) {
        for response in responses {
            self.mount(response, Some(1)).await;
        }
        self.respond_always(fallback).await;
    }

    /// Fails the first `failures` requests with `status`, then accepts.
    pub async fn fail_then_succeed(&self, failures: usize, status: u16) {
        self.respond_sequence(vec![MockResponse::Status(status); failures], 200).await;
    }

    async fn mount(&self, response: MockResponse, times: Option<u64>) {
        let mut mock = Mock::given(method("POST")).and(path(EVENTS_PATH)).respond_with(response.template());
        if let Some(times) = times {
            mock = mock.up_to_n_times(times);
        }
        mock.mount(&self.server).await;
    }

    /// Returns all requests received by the target.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                method: request.method.to_string(),
                path: request.url.path().to_string(),
                headers: request.headers,
                body: Bytes::from(request.body),
            })
            .collect()
    }

    /// Number of requests received so far.
    pub async fn request_count(&self) -> usize {
        self.received_requests().await.len()
    }

    /// Asserts that exactly n requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let actual = self.request_count().await;
        assert_eq!(actual, expected, "expected {expected} requests, received {actual}");
    }

    /// Ids of the delivered events in arrival order.
    pub async fn received_event_ids(&self) -> Result<Vec<String>> {
        self.received_requests()
            .await
            .iter()
            .map(|request| request.event().map(|event| event.id().to_string()))
            .collect()
    }
}

/// A recorded HTTP request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Request headers
    pub headers: HeaderMap,
    /// Raw request body
    pub body: Bytes,
}

impl RecordedRequest {
    /// Decodes the body as a structured CloudEvent.
    pub fn event(&self) -> Result<Event> {
        Event::from_json(&self.body).context("request body is not a structured CloudEvent")
    }

    /// Value of a header, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}
