//! Test infrastructure for relaykit crates.
//!
//! Provides a wiremock-backed HTTP target, a capture source the test feeds
//! directly, and event fixtures with predictable ids.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod fixtures;
pub mod http;
pub mod source;

pub use fixtures::{json_lines, test_event, EventFixture};
pub use http::{MockResponse, MockTarget, RecordedRequest, EVENTS_PATH};
pub use relaykit_core::TestClock;
pub use source::{ChannelSource, DestroyProbe};
