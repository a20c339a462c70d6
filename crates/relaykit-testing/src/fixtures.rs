//! Event fixtures with deterministic ids.

use relaykit_core::Event;
use serde_json::json;

/// Builds a minimal valid event with the given id.
///
/// # Panics
///
/// Panics if `id` is empty.
pub fn test_event(id: &str) -> Event {
    Event::builder()
        .id(id)
        .source("/relaykit/tests")
        .event_type("com.relaykit.test")
        .data(json!({ "id": id }))
        .build()
        .expect("fixture event is valid")
}

/// Produces numbered events (`evt-1`, `evt-2`, ...).
#[derive(Debug, Clone)]
pub struct EventFixture {
    source: String,
    event_type: String,
    next_id: u64,
}

impl EventFixture {
    /// Creates a fixture with test defaults.
    pub fn new() -> Self {
        Self { source: "/relaykit/tests".to_string(), event_type: "com.relaykit.test".to_string(), next_id: 1 }
    }

    /// Sets the `source` attribute of produced events.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the `type` attribute of produced events.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Next event in the sequence.
    ///
    /// # Panics
    ///
    /// Panics if source or type were set to empty strings.
    pub fn next_event(&mut self) -> Event {
        let seq = self.next_id;
        self.next_id += 1;

        Event::builder()
            .id(format!("evt-{seq}"))
            .source(self.source.clone())
            .event_type(self.event_type.clone())
            .data(json!({ "seq": seq }))
            .build()
            .expect("fixture event is valid")
    }

    /// The next `count` events.
    pub fn batch(&mut self, count: usize) -> Vec<Event> {
        (0..count).map(|_| self.next_event()).collect()
    }
}

impl Default for EventFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes events as newline-terminated JSON lines.
///
/// # Panics
///
/// Panics if an event cannot be encoded.
pub fn json_lines(events: &[Event]) -> String {
    events
        .iter()
        .map(|event| {
            let bytes = event.to_json().expect("fixture event encodes");
            format!("{}\n", String::from_utf8_lossy(&bytes))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_numbers_events() {
        let mut fixture = EventFixture::new().source("/orders");
        let ids: Vec<_> = fixture.batch(3).iter().map(|event| event.id().to_string()).collect();

        assert_eq!(ids, vec!["evt-1", "evt-2", "evt-3"]);
        assert_eq!(fixture.next_event().source(), "/orders");
    }

    #[test]
    fn json_lines_are_newline_terminated() {
        let text = json_lines(&[test_event("a"), test_event("b")]);
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }
}
