use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::EventError;
use super::event::{decode_payload, DomainEvent, EventHeader, EventPayload, GenericEvent, SharedEvent};

// ============================================================================
// Event Registry - Tagged Deserialization
// ============================================================================
//
// Rebuilds events read back from storage or transport. The event type string
// is the tag: a registered type decodes into its typed `DomainEvent<P>`,
// anything else falls back to `GenericEvent` with the raw payload bytes.
//
// Built once at startup and shared read-only (`Arc<EventRegistry>`) between
// the store and the dispatcher.
//
// ============================================================================

type Decoder = Arc<dyn Fn(EventHeader, &[u8]) -> Result<SharedEvent, EventError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<String, Decoder>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the listed event types into `DomainEvent<P>`.
    pub fn register<P: EventPayload>(&mut self, event_types: &[&str]) -> &mut Self {
        for event_type in event_types {
            let decoder: Decoder = Arc::new(|header: EventHeader, data: &[u8]| {
                let payload: P = decode_payload(&header.event_type, data)?;
                if payload.event_type() != header.event_type {
                    return Err(EventError::TypeMismatch {
                        expected: header.event_type,
                        found: payload.event_type().to_string(),
                    });
                }
                Ok(Arc::new(DomainEvent::from_header(header, payload)) as SharedEvent)
            });
            self.decoders.insert(event_type.to_string(), decoder);
        }
        self
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    pub fn decode(&self, header: EventHeader, data: &[u8]) -> Result<SharedEvent, EventError> {
        match self.decoders.get(&header.event_type) {
            Some(decoder) => decoder(header, data),
            None => Ok(Arc::new(GenericEvent::from_header(header, data.to_vec()))),
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.decoders.keys().collect();
        types.sort();
        f.debug_struct("EventRegistry").field("event_types", &types).finish()
    }
}
