// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure.
// Domain-specific code is in src/domain/
//
// ============================================================================

// Core abstractions (GENERIC - works with any aggregate)
pub mod core;
pub mod dispatch;
pub mod store;
pub mod unit_of_work;

// Re-export core infrastructure
pub use self::core::{
    decode_payload, derive_metadata, encode_payload, event_type_of, metadata_keys, sequence_events,
    split_event_type, topics_for, Aggregate, DomainEvent, Envelope, Event, EventError, EventHeader, EventPayload,
    EventRegistry, GenericEvent, Metadata, SharedEvent, WILDCARD,
};
pub use self::dispatch::{
    header_keys, Delivery, DispatchError, DispatchQueue, EventDispatcher, EventHandler, FnHandler, HandlerFailure,
    InProcessPubSub, Message, PendingAck, SubscriptionId, TopicDispatcher, TransportError,
};
pub use self::store::{
    BackendError, BackendTransaction, EventBackend, EventRecord, EventStore, EventStoreConfig, InMemoryBackend,
    PostgresBackend, SequenceCheck, StoreError, TransactionalEventStore,
};
pub use self::unit_of_work::{DispatchMode, UnitOfWork, UnitOfWorkError};
