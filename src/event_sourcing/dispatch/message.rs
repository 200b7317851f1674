use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::event_sourcing::core::{Envelope, EventError, EventHeader, EventRegistry, Metadata};

// ============================================================================
// Transport Message
// ============================================================================
//
// What actually travels over the pub/sub transport: the serialized payload
// plus string headers. The message id is the envelope's event_id, so a handler
// sees the same identity the store assigned.
//
// ============================================================================

pub mod header_keys {
    pub const EVENT_TYPE: &str = "event_type";
    pub const AGGREGATE_ID: &str = "aggregate_id";
    pub const SEQUENCE_NO: &str = "sequence_no";
    pub const OCCURRED_AT: &str = "occurred_at";
    pub const TIMESTAMP: &str = "timestamp";
    pub const METADATA: &str = "metadata";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub uuid: Uuid,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl Message {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, EventError> {
        let payload = envelope.event().payload()?;
        let metadata = serde_json::to_string(envelope.metadata()).map_err(|source| EventError::Serialization {
            event_type: envelope.event_type().to_string(),
            source,
        })?;

        let headers = HashMap::from([
            (header_keys::EVENT_TYPE.to_string(), envelope.event_type().to_string()),
            (header_keys::AGGREGATE_ID.to_string(), envelope.aggregate_id().to_string()),
            (header_keys::SEQUENCE_NO.to_string(), envelope.sequence_no().to_string()),
            (header_keys::OCCURRED_AT.to_string(), rfc3339(envelope.created_at())),
            (header_keys::TIMESTAMP.to_string(), rfc3339(envelope.timestamp())),
            (header_keys::METADATA.to_string(), metadata),
        ]);

        Ok(Self {
            uuid: envelope.event_id(),
            payload,
            headers,
        })
    }

    pub fn header(&self, key: &'static str) -> Result<&str, EventError> {
        self.headers
            .get(key)
            .map(String::as_str)
            .ok_or(EventError::MissingField(key))
    }

    /// Rebuild the envelope on the receiving side.
    pub fn to_envelope(&self, registry: &EventRegistry) -> Result<Envelope, EventError> {
        let sequence_no = self
            .header(header_keys::SEQUENCE_NO)?
            .parse::<i64>()
            .map_err(|e| invalid(header_keys::SEQUENCE_NO, e))?;
        let created_at = parse_time(header_keys::OCCURRED_AT, self.header(header_keys::OCCURRED_AT)?)?;
        let timestamp = parse_time(header_keys::TIMESTAMP, self.header(header_keys::TIMESTAMP)?)?;
        let metadata: Metadata = serde_json::from_str(self.header(header_keys::METADATA)?)
            .map_err(|e| invalid(header_keys::METADATA, e))?;

        let header = EventHeader {
            event_type: self.header(header_keys::EVENT_TYPE)?.to_string(),
            aggregate_id: self.header(header_keys::AGGREGATE_ID)?.to_string(),
            sequence_no,
            created_at,
        };
        let event = registry.decode(header, &self.payload)?;

        Ok(Envelope::new(event, self.uuid, timestamp, metadata))
    }
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, EventError> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| invalid(field, e))
}

fn invalid(field: &'static str, err: impl std::fmt::Display) -> EventError {
    EventError::InvalidField {
        field,
        reason: err.to_string(),
    }
}
