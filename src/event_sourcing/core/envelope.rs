use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use uuid::Uuid;

use super::error::EventError;
use super::event::{decode_payload, Event, SharedEvent};

// ============================================================================
// Event Envelope
// ============================================================================
//
// Wraps one event with the identity and metadata assigned by the store at
// persistence time. Envelopes are never built before an event is saved, and
// are immutable afterwards: fields are private and cloning shares the event.
//
// ============================================================================

/// Open key/value metadata attached to every envelope.
pub type Metadata = HashMap<String, serde_json::Value>;

/// Keys every derived metadata map contains.
pub mod metadata_keys {
    pub const AGGREGATE_ID: &str = "aggregate_id";
    pub const EVENT_TYPE: &str = "event_type";
    pub const SEQUENCE_NO: &str = "sequence_no";
    pub const CREATED_AT: &str = "created_at";
}

#[derive(Clone, Debug)]
pub struct Envelope {
    event: SharedEvent,
    event_id: Uuid,
    timestamp: DateTime<Utc>,
    metadata: Metadata,
}

impl Envelope {
    pub fn new(event: SharedEvent, event_id: Uuid, timestamp: DateTime<Utc>, metadata: Metadata) -> Self {
        Self {
            event,
            event_id,
            timestamp,
            metadata,
        }
    }

    pub fn event(&self) -> &dyn Event {
        self.event.as_ref()
    }

    pub fn shared_event(&self) -> SharedEvent {
        self.event.clone()
    }

    /// Globally unique, time-sortable id assigned at persistence time.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Persistence time (not the domain time, see `created_at`).
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    pub fn event_type(&self) -> &str {
        self.event.event_type()
    }

    pub fn aggregate_id(&self) -> &str {
        self.event.aggregate_id()
    }

    pub fn sequence_no(&self) -> i64 {
        self.event.sequence_no()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.event.created_at()
    }

    /// Typed view of the payload without downcasting the event.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        let bytes = self.event.payload()?;
        decode_payload(self.event_type(), &bytes)
    }
}

/// Metadata every stored event carries.
pub fn derive_metadata(event: &dyn Event) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        metadata_keys::AGGREGATE_ID.to_string(),
        serde_json::Value::from(event.aggregate_id()),
    );
    metadata.insert(
        metadata_keys::EVENT_TYPE.to_string(),
        serde_json::Value::from(event.event_type()),
    );
    metadata.insert(
        metadata_keys::SEQUENCE_NO.to_string(),
        serde_json::Value::from(event.sequence_no()),
    );
    metadata.insert(
        metadata_keys::CREATED_AT.to_string(),
        serde_json::Value::from(event.created_at().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)),
    );
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::event::GenericEvent;
    use std::sync::Arc;

    #[test]
    fn test_derive_metadata_contains_required_keys() {
        let event = GenericEvent::new("user", "created", "user-42", 7, b"{}".to_vec());
        let metadata = derive_metadata(&event);

        assert_eq!(metadata[metadata_keys::AGGREGATE_ID], "user-42");
        assert_eq!(metadata[metadata_keys::EVENT_TYPE], "user.created");
        assert_eq!(metadata[metadata_keys::SEQUENCE_NO], 7);
        assert!(metadata[metadata_keys::CREATED_AT].is_string());
    }

    #[test]
    fn test_envelope_delegates_to_event() {
        let event = GenericEvent::new("user", "renamed", "user-1", 2, br#"{"name":"Ada"}"#.to_vec());
        let created_at = event.created_at();
        let metadata = derive_metadata(&event);
        let event_id = Uuid::now_v7();
        let timestamp = Utc::now();

        let envelope = Envelope::new(Arc::new(event), event_id, timestamp, metadata);

        assert_eq!(envelope.event_id(), event_id);
        assert_eq!(envelope.timestamp(), timestamp);
        assert_eq!(envelope.event_type(), "user.renamed");
        assert_eq!(envelope.aggregate_id(), "user-1");
        assert_eq!(envelope.sequence_no(), 2);
        assert_eq!(envelope.created_at(), created_at);

        let payload: serde_json::Value = envelope.decode_payload().unwrap();
        assert_eq!(payload["name"], "Ada");
    }
}
