//! relaykit: reliable delivery of captured change events to an HTTP target.
//!
//! The binary tails a JSON-lines file of CloudEvents, posts each event to the
//! configured target through a circuit breaker, and checkpoints the file
//! offset of every delivered line so a restart resumes where it stopped.
//!
//! The building blocks live in the member crates:
//! - `relaykit-core`: event model, queue, and source contract
//! - `relaykit-delivery`: HTTP client, circuit breaker, and delivery worker
//! - `relaykit-checkpoint`: offset checkpoint store and its backends

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod file_source;
pub mod pipeline;

pub use config::Config;
pub use file_source::{offset_key, FileSourceError, JsonLinesConfig, JsonLinesSource, SourceFailures};
pub use pipeline::Pipeline;
