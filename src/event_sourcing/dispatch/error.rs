use std::fmt;
use uuid::Uuid;

use crate::event_sourcing::core::EventError;

use super::pubsub::TransportError;

// ============================================================================
// Dispatch Errors
// ============================================================================

/// One handler that did not process one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub topic: String,
    pub event_type: String,
    pub event_id: Uuid,
    pub cause: String,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler '{}' failed on {} ({}) via topic '{}': {}",
            self.handler, self.event_type, self.event_id, self.topic, self.cause
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is closed")]
    Closed,

    #[error("failed to encode event {event_id} for transport: {source}")]
    Encode {
        event_id: Uuid,
        #[source]
        source: EventError,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{} handler failure(s): {}", .0.len(), summarize(.0))]
    HandlerFailures(Vec<HandlerFailure>),
}

impl DispatchError {
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            DispatchError::HandlerFailures(failures) => failures,
            _ => &[],
        }
    }
}

fn summarize(failures: &[HandlerFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
