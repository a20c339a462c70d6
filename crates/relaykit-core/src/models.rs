//! CloudEvents envelope carried from capture source to HTTP target.
//!
//! Events are immutable once built: fields are private, construction goes
//! through [`EventBuilder`] or [`Event::from_json`], both of which enforce the
//! required CloudEvents v1.0 attributes. The serialized form is the
//! structured JSON mode, with metadata and payload in one document.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// The only CloudEvents specification version this crate produces.
pub const SPEC_VERSION: &str = "1.0";

/// `content-type` of a structured-mode CloudEvents JSON body.
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json; charset=utf-8";

const RESERVED_ATTRIBUTES: &[&str] = &[
    "id",
    "source",
    "type",
    "specversion",
    "time",
    "subject",
    "datacontenttype",
    "dataschema",
    "data",
    "data_base64",
];

/// Identifier of a captured event.
///
/// CloudEvents ids are opaque strings that are unique per `source`. Capture
/// engines usually derive them from their own positions (log sequence
/// numbers, line offsets), so this wraps a `String` rather than a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random identifier for sources without a natural one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EventId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A captured event in CloudEvents v1.0 form.
///
/// # Example
///
/// ```
/// use relaykit_core::Event;
/// use serde_json::json;
///
/// let event = Event::builder()
///     .id("e1")
///     .source("/inventory/orders")
///     .event_type("com.example.order.created")
///     .data(json!({"order": 42}))
///     .build()
///     .unwrap();
///
/// assert_eq!(event.id().as_str(), "e1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EventEnvelope")]
pub struct Event {
    id: EventId,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    specversion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    datacontenttype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dataschema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(flatten)]
    extensions: BTreeMap<String, Value>,
}

impl Event {
    /// Starts building a new event.
    pub fn builder() -> EventBuilder {
        EventBuilder::default()
    }

    /// Decodes a structured-mode CloudEvents JSON document.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Malformed` if the bytes are not a JSON object with
    /// the required attributes, or if any attribute value is invalid.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes the event as a structured-mode CloudEvents JSON document.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Malformed` if an extension value cannot be encoded.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Event identifier.
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Context in which the event happened.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Type of occurrence, e.g. `com.example.order.created`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Timestamp of the occurrence, if the source recorded one.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    /// Subject of the event within the source.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Media type of `data`.
    pub fn datacontenttype(&self) -> Option<&str> {
        self.datacontenttype.as_deref()
    }

    /// Event payload.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Extension attributes by name.
    pub fn extension(&self, name: &str) -> Option<&Value> {
        self.extensions.get(name)
    }
}

/// Builder for [`Event`].
#[derive(Debug, Default)]
pub struct EventBuilder {
    id: Option<EventId>,
    source: Option<String>,
    event_type: Option<String>,
    time: Option<DateTime<Utc>>,
    subject: Option<String>,
    datacontenttype: Option<String>,
    dataschema: Option<String>,
    data: Option<Value>,
    extensions: BTreeMap<String, Value>,
}

impl EventBuilder {
    /// Sets the event id.
    #[must_use]
    pub fn id(mut self, id: impl Into<EventId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the event source.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the occurrence timestamp.
    #[must_use]
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the schema URI of `data`.
    #[must_use]
    pub fn dataschema(mut self, dataschema: impl Into<String>) -> Self {
        self.dataschema = Some(dataschema.into());
        self
    }

    /// Sets a JSON payload and marks it `application/json`.
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self.datacontenttype.get_or_insert_with(|| "application/json".to_string());
        self
    }

    /// Overrides the media type of `data`.
    #[must_use]
    pub fn datacontenttype(mut self, content_type: impl Into<String>) -> Self {
        self.datacontenttype = Some(content_type.into());
        self
    }

    /// Adds an extension attribute.
    #[must_use]
    pub fn extension(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(name.into(), value.into());
        self
    }

    /// Validates the attributes and builds the event.
    ///
    /// A missing id is filled with a random one; `source` and `type` are
    /// required.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidEvent` when a required attribute is missing
    /// or empty, or when an extension name is not a valid CloudEvents
    /// attribute name.
    pub fn build(self) -> Result<Event> {
        EventEnvelope {
            id: self.id.unwrap_or_else(EventId::generate),
            source: self.source.unwrap_or_default(),
            event_type: self.event_type.unwrap_or_default(),
            specversion: SPEC_VERSION.to_string(),
            time: self.time,
            subject: self.subject,
            datacontenttype: self.datacontenttype,
            dataschema: self.dataschema,
            data: self.data,
            extensions: self.extensions,
        }
        .validate()
    }
}

/// Unvalidated wire form, checked before it becomes an [`Event`].
#[derive(Deserialize)]
struct EventEnvelope {
    id: EventId,
    source: String,
    #[serde(rename = "type")]
    event_type: String,
    specversion: String,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    datacontenttype: Option<String>,
    #[serde(default)]
    dataschema: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(flatten)]
    extensions: BTreeMap<String, Value>,
}

impl EventEnvelope {
    fn validate(self) -> Result<Event> {
        if self.id.as_str().is_empty() {
            return Err(CoreError::InvalidEvent("id must not be empty".to_string()));
        }
        if self.source.is_empty() {
            return Err(CoreError::InvalidEvent("source must not be empty".to_string()));
        }
        if self.event_type.is_empty() {
            return Err(CoreError::InvalidEvent("type must not be empty".to_string()));
        }
        if self.specversion != SPEC_VERSION {
            return Err(CoreError::InvalidEvent(format!(
                "unsupported specversion '{}'",
                self.specversion
            )));
        }
        for name in self.extensions.keys() {
            if !is_valid_extension_name(name) {
                return Err(CoreError::InvalidEvent(format!("invalid attribute name '{name}'")));
            }
        }

        Ok(Event {
            id: self.id,
            source: self.source,
            event_type: self.event_type,
            specversion: self.specversion,
            time: self.time,
            subject: self.subject,
            datacontenttype: self.datacontenttype,
            dataschema: self.dataschema,
            data: self.data,
            extensions: self.extensions,
        })
    }
}

impl TryFrom<EventEnvelope> for Event {
    type Error = CoreError;

    fn try_from(envelope: EventEnvelope) -> Result<Self> {
        envelope.validate()
    }
}

/// CloudEvents attribute names are lowercase ASCII letters and digits.
fn is_valid_extension_name(name: &str) -> bool {
    !name.is_empty()
        && !RESERVED_ATTRIBUTES.contains(&name)
        && name.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn order_event() -> Event {
        Event::builder()
            .id("e1")
            .source("/orders")
            .event_type("order.created")
            .data(json!({"order": 42}))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_defaults_datacontenttype_for_json_data() {
        let event = order_event();
        assert_eq!(event.datacontenttype(), Some("application/json"));
        assert_eq!(event.specversion, SPEC_VERSION);
    }

    #[test]
    fn builder_generates_missing_id() {
        let event = Event::builder().source("/s").event_type("t").build().unwrap();
        assert!(!event.id().as_str().is_empty());
    }

    #[test]
    fn builder_rejects_missing_source_and_type() {
        assert!(Event::builder().id("x").event_type("t").build().is_err());
        assert!(Event::builder().id("x").source("/s").build().is_err());
    }

    #[test]
    fn structured_json_has_flat_attributes() {
        let event = Event::builder()
            .id("e2")
            .source("/orders")
            .event_type("order.updated")
            .extension("partition", 3)
            .build()
            .unwrap();

        let value: Value = serde_json::from_slice(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["id"], "e2");
        assert_eq!(value["type"], "order.updated");
        assert_eq!(value["specversion"], "1.0");
        assert_eq!(value["partition"], 3);
        assert!(value.get("data").is_none());
    }

    #[test]
    fn extension_names_validated() {
        assert!(is_valid_extension_name("traceparent"));
        assert!(is_valid_extension_name("shard2"));
        assert!(!is_valid_extension_name("Trace"));
        assert!(!is_valid_extension_name("data_base64"));
        assert!(!is_valid_extension_name("subject"));
        assert!(!is_valid_extension_name(""));
    }
}
