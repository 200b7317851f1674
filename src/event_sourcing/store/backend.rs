use async_trait::async_trait;
use std::sync::Arc;

use super::record::EventRecord;

// ============================================================================
// Persistence Backend Contract
// ============================================================================
//
// The store never talks to a database directly. It needs:
// - a transaction that can report the last stored sequence of an aggregate,
//   insert records, and commit or roll back
// - a query returning an aggregate's records ordered by sequence
//
// Dropping a transaction without committing discards everything it wrote.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// A uniqueness rule on (aggregate_id, sequence_no) was violated.
    #[error("{0}")]
    Conflict(String),

    #[error("{operation} failed: {message}")]
    Failed { operation: &'static str, message: String },
}

impl BackendError {
    pub fn failed(operation: &'static str, message: impl Into<String>) -> Self {
        BackendError::Failed {
            operation,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait BackendTransaction: Send {
    async fn last_sequence(&mut self, aggregate_id: &str) -> Result<Option<i64>, BackendError>;

    async fn insert_records(&mut self, records: &[EventRecord]) -> Result<(), BackendError>;

    async fn commit(self: Box<Self>) -> Result<(), BackendError>;

    async fn rollback(self: Box<Self>) -> Result<(), BackendError>;
}

#[async_trait]
pub trait EventBackend: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn BackendTransaction>, BackendError>;

    /// Records with `sequence_no >= from_sequence`, ascending.
    async fn query_records(&self, aggregate_id: &str, from_sequence: i64) -> Result<Vec<EventRecord>, BackendError>;
}

#[async_trait]
impl<B> EventBackend for Arc<B>
where
    B: EventBackend + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn BackendTransaction>, BackendError> {
        (**self).begin().await
    }

    async fn query_records(&self, aggregate_id: &str, from_sequence: i64) -> Result<Vec<EventRecord>, BackendError> {
        (**self).query_records(aggregate_id, from_sequence).await
    }
}
