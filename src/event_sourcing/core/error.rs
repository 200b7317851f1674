// ============================================================================
// Event Model Errors
// ============================================================================
//
// Failures that can happen while turning events into bytes (for storage or
// transport) and back again.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("failed to serialize {event_type} event: {source}")]
    Serialization {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to deserialize {event_type} event: {source}")]
    Deserialization {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("decoded payload reports type {found}, expected {expected}")]
    TypeMismatch { expected: String, found: String },

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}
