// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// This module contains GENERIC persistence infrastructure for event sourcing.
// All components work with ANY aggregate/event type.
//
// - EventStore: atomic batch append + ordered replay
// - EventBackend: transaction contract implemented by PostgreSQL and memory
//
// ============================================================================

pub mod backend;
pub mod error;
pub mod event_store;
pub mod memory;
pub mod postgres;
pub mod record;

pub use backend::{BackendError, BackendTransaction, EventBackend};
pub use error::StoreError;
pub use event_store::{EventStore, EventStoreConfig, SequenceCheck, TransactionalEventStore};
pub use memory::InMemoryBackend;
pub use postgres::PostgresBackend;
pub use record::EventRecord;
