// ============================================================================
// Event Dispatch - In-Process Publish/Subscribe
// ============================================================================
//
// Delivers persisted envelopes to handlers after commit:
// - TopicDispatcher: wildcard fan-out, per-subscription workers
// - DispatchQueue: ordered background dispatch for detached commits
// - InProcessPubSub: non-persistent transport with per-delivery acks
// - Message: payload + headers as carried on the transport
//
// ============================================================================

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod pubsub;
pub mod queue;

pub use dispatcher::{EventDispatcher, TopicDispatcher};
pub use error::{DispatchError, HandlerFailure};
pub use handler::{EventHandler, FnHandler};
pub use message::{header_keys, Message};
pub use pubsub::{Delivery, InProcessPubSub, PendingAck, SubscriptionId, TransportError};
pub use queue::DispatchQueue;
