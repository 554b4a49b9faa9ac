//! Event records for the Qorzen platform.
//!
//! An [`Event`] is an immutable value: once published it is shared as
//! `Arc<Event>` and never mutated. Subscribers may observe the same event
//! concurrently, but never a partially constructed one — construction goes
//! through [`EventBuilder`], which hands the finished record to the bus.
//!
//! Event types are slash-delimited strings (`plugin/loaded`, `ui/ready`,
//! `custom/foo`). The first segment is the namespace; a set of namespaces is
//! reserved for the platform (see [`RESERVED_PREFIXES`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Event type namespaces reserved for the platform.
///
/// Plugins must publish their own events under `<plugin_name>/...`; the
/// plugin-facing API rejects types starting with any of these.
pub const RESERVED_PREFIXES: &[&str] = &[
    "system/",
    "ui/",
    "log/",
    "plugin/",
    "plugin_manager/",
    "config/",
    "monitoring/",
    "error/",
];

/// Returns `true` if `event_type` starts with a reserved platform namespace.
pub fn is_reserved_type(event_type: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| event_type.starts_with(p))
}

/// An immutable publish/subscribe message.
///
/// Field access is read-only by construction; the bus hands out `Arc<Event>`
/// and there are no mutating methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique id assigned at build time.
    pub id: Uuid,
    /// Slash-delimited type, e.g. `plugin/loaded`.
    pub event_type: String,
    /// Logical origin (component or plugin name).
    pub source: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Optional id linking this event to a causing request or event.
    pub correlation_id: Option<Uuid>,
    /// Opaque key/value payload. Filters match against these entries.
    pub payload: Map<String, Value>,
}

impl Event {
    /// Starts building an event of the given type from the given source.
    pub fn builder(event_type: impl Into<String>, source: impl Into<String>) -> EventBuilder {
        EventBuilder {
            event_type: event_type.into(),
            source: source.into(),
            correlation_id: None,
            payload: Map::new(),
        }
    }

    /// Shorthand for an event with no payload.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self::builder(event_type, source).build()
    }

    /// Returns the namespace segment of the type (up to the first `/`).
    pub fn namespace(&self) -> &str {
        self.event_type
            .split_once('/')
            .map_or(self.event_type.as_str(), |(ns, _)| ns)
    }

    /// Returns a payload entry by key.
    pub fn payload_get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// Builder for [`Event`].
///
/// The id and timestamp are assigned in [`build`](EventBuilder::build), so
/// two events built from the same builder inputs are still distinct records.
#[derive(Debug)]
pub struct EventBuilder {
    event_type: String,
    source: String,
    correlation_id: Option<Uuid>,
    payload: Map<String, Value>,
}

impl EventBuilder {
    /// Sets the correlation id.
    pub fn correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Inserts a single payload entry.
    pub fn payload_entry(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Replaces the whole payload map.
    pub fn payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Finishes the record, assigning id and timestamp.
    pub fn build(self) -> Event {
        Event {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            source: self.source,
            timestamp: Utc::now(),
            correlation_id: self.correlation_id,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assigns_unique_ids() {
        let a = Event::new("custom/foo", "test");
        let b = Event::new("custom/foo", "test");
        assert_ne!(a.id, b.id);
        assert_eq!(a.event_type, "custom/foo");
        assert_eq!(a.source, "test");
    }

    #[test]
    fn test_payload_entries() {
        let event = Event::builder("plugin/loaded", "plugin_manager")
            .payload_entry("name", "sample")
            .payload_entry("version", "1.0.0")
            .build();
        assert_eq!(
            event.payload_get("name"),
            Some(&Value::String("sample".into()))
        );
        assert_eq!(event.namespace(), "plugin");
    }

    #[test]
    fn test_reserved_prefixes() {
        assert!(is_reserved_type("system/started"));
        assert!(is_reserved_type("plugin_manager/discovered"));
        assert!(!is_reserved_type("sample/refresh"));
    }

    #[test]
    fn test_serde_round_trip() {
        let event = Event::builder("config/changed", "config")
            .payload_entry("key", "logging.level")
            .build();
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.event_type, event.event_type);
        assert_eq!(back.payload, event.payload);
    }
}
