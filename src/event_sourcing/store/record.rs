use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{
    derive_metadata, metadata_keys, Envelope, EventError, EventHeader, EventRegistry, Metadata,
    SharedEvent,
};

// ============================================================================
// Event Record - At-Rest Representation
// ============================================================================
//
// One row per event. For a fixed aggregate_id, records are totally ordered by
// sequence_no with no duplicates.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: Uuid,
    pub aggregate_id: String,
    pub event_type: String,
    pub sequence_no: i64,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// Serialize an event for storage and build the envelope returned to the caller.
    pub fn from_event(
        event: &SharedEvent,
        id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<(Self, Envelope), EventError> {
        let data = event.payload()?;
        let metadata = derive_metadata(event.as_ref());
        let metadata_bytes = serde_json::to_vec(&metadata).map_err(|source| EventError::Serialization {
            event_type: event.event_type().to_string(),
            source,
        })?;

        let record = Self {
            id,
            aggregate_id: event.aggregate_id().to_string(),
            event_type: event.event_type().to_string(),
            sequence_no: event.sequence_no(),
            data,
            metadata: metadata_bytes,
            timestamp,
        };
        let envelope = Envelope::new(Arc::clone(event), id, timestamp, metadata);

        Ok((record, envelope))
    }

    pub fn decode_metadata(&self) -> Result<Metadata, EventError> {
        serde_json::from_slice(&self.metadata).map_err(|source| EventError::Deserialization {
            event_type: self.event_type.clone(),
            source,
        })
    }

    /// Rebuild the envelope through the registry's tagged decoding.
    pub fn into_envelope(self, registry: &EventRegistry) -> Result<Envelope, EventError> {
        let metadata = self.decode_metadata()?;
        let created_at = match metadata.get(metadata_keys::CREATED_AT) {
            Some(value) => serde_json::from_value::<DateTime<Utc>>(value.clone()).map_err(|e| {
                EventError::InvalidField {
                    field: metadata_keys::CREATED_AT,
                    reason: e.to_string(),
                }
            })?,
            None => return Err(EventError::MissingField(metadata_keys::CREATED_AT)),
        };

        let header = EventHeader {
            event_type: self.event_type,
            aggregate_id: self.aggregate_id,
            sequence_no: self.sequence_no,
            created_at,
        };
        let event = registry.decode(header, &self.data)?;

        Ok(Envelope::new(event, self.id, self.timestamp, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::GenericEvent;

    #[test]
    fn test_from_event_shares_id_and_timestamp_with_envelope() {
        let event: SharedEvent = Arc::new(GenericEvent::new("user", "created", "u-1", 1, b"{\"a\":1}".to_vec()));
        let id = Uuid::now_v7();
        let now = Utc::now();

        let (record, envelope) = EventRecord::from_event(&event, id, now).unwrap();

        assert_eq!(record.id, envelope.event_id());
        assert_eq!(record.timestamp, envelope.timestamp());
        assert_eq!(record.event_type, "user.created");
        assert_eq!(record.sequence_no, 1);
        assert_eq!(record.data, b"{\"a\":1}".to_vec());
        assert_eq!(record.decode_metadata().unwrap(), *envelope.metadata());
    }

    #[test]
    fn test_into_envelope_restores_created_at() {
        let created_at = Utc::now() - chrono::Duration::minutes(5);
        let event: SharedEvent =
            Arc::new(GenericEvent::new("user", "created", "u-1", 1, b"{}".to_vec()).with_created_at(created_at));
        let (record, _) = EventRecord::from_event(&event, Uuid::now_v7(), Utc::now()).unwrap();

        let envelope = record.into_envelope(&EventRegistry::new()).unwrap();

        assert_eq!(envelope.created_at(), created_at);
        assert_eq!(envelope.aggregate_id(), "u-1");
    }

    #[test]
    fn test_into_envelope_requires_created_at() {
        let record = EventRecord {
            id: Uuid::now_v7(),
            aggregate_id: "u-1".into(),
            event_type: "user.created".into(),
            sequence_no: 1,
            data: b"{}".to_vec(),
            metadata: b"{}".to_vec(),
            timestamp: Utc::now(),
        };

        let err = record.into_envelope(&EventRegistry::new()).unwrap_err();
        assert!(matches!(err, EventError::MissingField("created_at")));
    }
}
