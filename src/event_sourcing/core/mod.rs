// ============================================================================
// Event Sourcing Core - Event & Envelope Model
// ============================================================================
//
// The immutable data carried through the runtime:
// - Event capability set, generic and typed event shapes
// - Envelopes (store-assigned identity, timestamp, metadata)
// - Tagged decoding of events read back from storage/transport
// - Aggregate trait used by domain code to produce sequenced events
//
// ============================================================================

pub mod aggregate;
pub mod envelope;
pub mod error;
pub mod event;
pub mod registry;

// Re-export core types for convenience
pub use aggregate::{sequence_events, Aggregate};
pub use envelope::{derive_metadata, metadata_keys, Envelope, Metadata};
pub use error::EventError;
pub use event::{
    decode_payload, encode_payload, event_type_of, split_event_type, topics_for, DomainEvent, Event,
    EventHeader, EventPayload, GenericEvent, SharedEvent, WILDCARD,
};
pub use registry::EventRegistry;
