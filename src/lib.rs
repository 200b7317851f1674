// ============================================================================
// Event Runtime
// ============================================================================
//
// Event-sourcing runtime: a transactional event store, a unit of work that
// persists then dispatches, and an in-process wildcard dispatcher.
//
// ============================================================================

pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod metrics;

pub use config::{ConfigError, RuntimeConfig};
pub use event_sourcing::{
    DispatchError, DispatchMode, DispatchQueue, Envelope, Event, EventDispatcher, EventHandler, EventRegistry,
    EventStore, SharedEvent, StoreError, TopicDispatcher, TransactionalEventStore, UnitOfWork, UnitOfWorkError,
};
pub use metrics::Metrics;
