use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use super::envelope::Envelope;
use super::error::EventError;

// ============================================================================
// Event Capability Set
// ============================================================================
//
// Every event flowing through the runtime exposes the same five capabilities,
// whatever its concrete shape:
// - event type in "<entity>.<verb>" form (e.g. "order.created")
// - the aggregate it belongs to
// - its per-aggregate sequence number (assigned before buffering)
// - the domain time it occurred at
// - an opaque, serialized payload
//
// Two shapes are provided: `GenericEvent` (entity/verb + raw bytes) and
// `DomainEvent<P>` for typed payloads.
//
// ============================================================================

/// Wildcard segment used in topic patterns.
pub const WILDCARD: &str = "*";

pub trait Event: fmt::Debug + Send + Sync + 'static {
    /// "<entity>.<verb>"
    fn event_type(&self) -> &str;

    fn aggregate_id(&self) -> &str;

    /// Position in the aggregate stream. Strictly increasing, gapless.
    fn sequence_no(&self) -> i64;

    /// Domain time of occurrence.
    fn created_at(&self) -> DateTime<Utc>;

    /// Serialized payload, opaque to the store and the dispatcher.
    fn payload(&self) -> Result<Vec<u8>, EventError>;
}

/// Events are shared between the unit of work buffer, envelopes and handlers.
pub type SharedEvent = Arc<dyn Event>;

/// Split "<entity>.<verb>" at the first dot.
pub fn split_event_type(event_type: &str) -> Option<(&str, &str)> {
    event_type.split_once('.')
}

pub fn event_type_of(entity: &str, verb: &str) -> String {
    format!("{}.{}", entity, verb)
}

/// Routing topics for an event type: exact, "<entity>.*", "*.<verb>", "*.*".
///
/// Duplicates are removed while keeping the order above, so a literal
/// "order.*" event is not delivered twice to the same subscription. A type
/// without a dot only reaches its exact topic and "*.*".
pub fn topics_for(event_type: &str) -> Vec<String> {
    let catch_all = event_type_of(WILDCARD, WILDCARD);

    let candidates = match split_event_type(event_type) {
        Some((entity, verb)) => vec![
            event_type.to_string(),
            event_type_of(entity, WILDCARD),
            event_type_of(WILDCARD, verb),
            catch_all,
        ],
        None => vec![event_type.to_string(), catch_all],
    };

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|topic| seen.insert(topic.clone()))
        .collect()
}

// ============================================================================
// Payload Serialization Helpers
// ============================================================================

pub fn encode_payload<T: Serialize>(event_type: &str, value: &T) -> Result<Vec<u8>, EventError> {
    serde_json::to_vec(value).map_err(|source| EventError::Serialization {
        event_type: event_type.to_string(),
        source,
    })
}

pub fn decode_payload<T: DeserializeOwned>(event_type: &str, bytes: &[u8]) -> Result<T, EventError> {
    serde_json::from_slice(bytes).map_err(|source| EventError::Deserialization {
        event_type: event_type.to_string(),
        source,
    })
}

// ============================================================================
// Event Header
// ============================================================================

/// The non-payload half of an event, as recovered from storage or transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub event_type: String,
    pub aggregate_id: String,
    pub sequence_no: i64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Generic Event
// ============================================================================

/// Catch-all event: entity/verb strings plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericEvent {
    event_type: String,
    aggregate_id: String,
    sequence_no: i64,
    created_at: DateTime<Utc>,
    payload: Vec<u8>,
}

impl GenericEvent {
    pub fn new(
        entity: &str,
        verb: &str,
        aggregate_id: impl Into<String>,
        sequence_no: i64,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            event_type: event_type_of(entity, verb),
            aggregate_id: aggregate_id.into(),
            sequence_no,
            created_at: Utc::now(),
            payload,
        }
    }

    pub fn from_header(header: EventHeader, payload: Vec<u8>) -> Self {
        Self {
            event_type: header.event_type,
            aggregate_id: header.aggregate_id,
            sequence_no: header.sequence_no,
            created_at: header.created_at,
            payload,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn entity(&self) -> &str {
        split_event_type(&self.event_type)
            .map(|(entity, _)| entity)
            .unwrap_or(&self.event_type)
    }

    pub fn verb(&self) -> &str {
        split_event_type(&self.event_type)
            .map(|(_, verb)| verb)
            .unwrap_or("")
    }

    pub fn raw_payload(&self) -> &[u8] {
        &self.payload
    }
}

impl Event for GenericEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    fn sequence_no(&self) -> i64 {
        self.sequence_no
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn payload(&self) -> Result<Vec<u8>, EventError> {
        Ok(self.payload.clone())
    }
}

// ============================================================================
// Typed Domain Events
// ============================================================================

/// A serializable domain payload that knows its own "<entity>.<verb>" type.
///
/// Enums are the usual shape: one variant per fact, each reporting its own
/// type string.
pub trait EventPayload:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    fn event_type(&self) -> &'static str;
}

/// A typed payload stamped with aggregate identity and position.
#[derive(Debug, Clone)]
pub struct DomainEvent<P> {
    aggregate_id: String,
    sequence_no: i64,
    created_at: DateTime<Utc>,
    data: P,
}

impl<P: EventPayload> DomainEvent<P> {
    pub fn new(aggregate_id: impl Into<String>, sequence_no: i64, data: P) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            sequence_no,
            created_at: Utc::now(),
            data,
        }
    }

    pub fn from_header(header: EventHeader, data: P) -> Self {
        Self {
            aggregate_id: header.aggregate_id,
            sequence_no: header.sequence_no,
            created_at: header.created_at,
            data,
        }
    }

    /// Rebuild the typed event from a persisted or delivered envelope.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, EventError> {
        let data: P = envelope.decode_payload()?;
        if data.event_type() != envelope.event_type() {
            return Err(EventError::TypeMismatch {
                expected: envelope.event_type().to_string(),
                found: data.event_type().to_string(),
            });
        }

        Ok(Self {
            aggregate_id: envelope.aggregate_id().to_string(),
            sequence_no: envelope.sequence_no(),
            created_at: envelope.created_at(),
            data,
        })
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn data(&self) -> &P {
        &self.data
    }

    pub fn into_data(self) -> P {
        self.data
    }
}

impl<P: EventPayload> Event for DomainEvent<P> {
    fn event_type(&self) -> &str {
        self.data.event_type()
    }

    fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    fn sequence_no(&self) -> i64 {
        self.sequence_no
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn payload(&self) -> Result<Vec<u8>, EventError> {
        encode_payload(self.event_type(), &self.data)
    }
}

// ============================================================================
// Tests
// ============================================================================
