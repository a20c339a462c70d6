//! Core event model and producer/consumer plumbing.
//!
//! Provides the CloudEvents envelope that flows through the relay, the tuple
//! that pairs an event with its delivery-outcome channel, the bounded queue
//! between a capture source and the delivery worker, and the clock
//! abstraction shared by time-dependent components.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod queue;
pub mod source;
pub mod time;
pub mod tuple;

pub use error::{CoreError, Result, SourceError};
pub use models::{Event, EventBuilder, EventId, SPEC_VERSION, STRUCTURED_CONTENT_TYPE};
pub use queue::{event_queue, EventReceiver, EventSender, Polled};
pub use source::{ReceiverSlot, Source};
pub use time::{Clock, RealClock, TestClock};
pub use tuple::{DeliveryOutcome, Receipt, Tuple, ABANDONED_REASON};
