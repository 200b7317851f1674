use crate::event_sourcing::core::EventError;

use super::backend::BackendError;

// ============================================================================
// Event Store Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An event could not be serialized (nothing was written) or a stored
    /// record could not be decoded.
    #[error(transparent)]
    Event(#[from] EventError),

    #[error("sequence conflict for aggregate {aggregate_id}: expected {expected}, got {found}")]
    SequenceConflict {
        aggregate_id: String,
        expected: i64,
        found: i64,
    },

    #[error("duplicate event rejected by backend: {0}")]
    Duplicate(String),

    #[error("persistence failure during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

impl StoreError {
    pub(crate) fn from_backend(operation: &'static str, err: BackendError) -> Self {
        match err {
            BackendError::Conflict(message) => StoreError::Duplicate(message),
            source => StoreError::Persistence { operation, source },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::SequenceConflict { .. } | StoreError::Duplicate(_))
    }
}
