use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::backend::{BackendError, BackendTransaction, EventBackend};
use super::record::EventRecord;

// ============================================================================
// In-Memory Backend
// ============================================================================
//
// Transactions stage their writes privately and apply them under a single
// write lock at commit, after checking (aggregate_id, sequence_no) uniqueness
// against both the committed streams and the staged batch. Either every staged
// record lands or none does.
//
// Intended for tests, demos and single-process deployments.
//
// ============================================================================

type Streams = HashMap<String, Vec<EventRecord>>;

#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    streams: Arc<RwLock<Streams>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total committed records across all aggregates
    pub fn record_count(&self) -> usize {
        self.streams
            .read()
            .map(|streams| streams.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Committed records of one aggregate, ascending
    pub fn records(&self, aggregate_id: &str) -> Vec<EventRecord> {
        self.streams
            .read()
            .ok()
            .and_then(|streams| streams.get(aggregate_id).cloned())
            .unwrap_or_default()
    }
}

fn poisoned(operation: &'static str) -> BackendError {
    BackendError::failed(operation, "in-memory store lock poisoned")
}

#[async_trait]
impl EventBackend for InMemoryBackend {
    async fn begin(&self) -> Result<Box<dyn BackendTransaction>, BackendError> {
        Ok(Box::new(InMemoryTransaction {
            streams: Arc::clone(&self.streams),
            staged: Vec::new(),
        }))
    }

    async fn query_records(&self, aggregate_id: &str, from_sequence: i64) -> Result<Vec<EventRecord>, BackendError> {
        let streams = self.streams.read().map_err(|_| poisoned("query_records"))?;

        Ok(streams
            .get(aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|record| record.sequence_no >= from_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

struct InMemoryTransaction {
    streams: Arc<RwLock<Streams>>,
    staged: Vec<EventRecord>,
}

#[async_trait]
impl BackendTransaction for InMemoryTransaction {
    async fn last_sequence(&mut self, aggregate_id: &str) -> Result<Option<i64>, BackendError> {
        let streams = self.streams.read().map_err(|_| poisoned("last_sequence"))?;

        let committed = streams
            .get(aggregate_id)
            .and_then(|stream| stream.iter().map(|r| r.sequence_no).max());
        let staged = self
            .staged
            .iter()
            .filter(|r| r.aggregate_id == aggregate_id)
            .map(|r| r.sequence_no)
            .max();

        Ok(committed.max(staged))
    }

    async fn insert_records(&mut self, records: &[EventRecord]) -> Result<(), BackendError> {
        self.staged.extend_from_slice(records);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        let InMemoryTransaction { streams, staged } = *self;
        let mut streams = streams.write().map_err(|_| poisoned("commit"))?;

        {
            let mut batch_keys = HashSet::new();
            for record in &staged {
                let key = (record.aggregate_id.as_str(), record.sequence_no);
                let already_stored = streams
                    .get(&record.aggregate_id)
                    .is_some_and(|stream| stream.iter().any(|r| r.sequence_no == record.sequence_no));

                if already_stored || !batch_keys.insert(key) {
                    return Err(BackendError::Conflict(format!(
                        "aggregate {} already has an event with sequence {}",
                        record.aggregate_id, record.sequence_no
                    )));
                }
            }
        }

        let mut touched = HashSet::new();
        for record in staged {
            touched.insert(record.aggregate_id.clone());
            streams.entry(record.aggregate_id.clone()).or_default().push(record);
        }
        for aggregate_id in touched {
            if let Some(stream) = streams.get_mut(&aggregate_id) {
                stream.sort_by_key(|r| r.sequence_no);
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(aggregate_id: &str, sequence_no: i64) -> EventRecord {
        EventRecord {
            id: Uuid::now_v7(),
            aggregate_id: aggregate_id.to_string(),
            event_type: "account.opened".to_string(),
            sequence_no,
            data: b"{}".to_vec(),
            metadata: b"{}".to_vec(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let backend = InMemoryBackend::new();

        let mut tx = backend.begin().await.unwrap();
        tx.insert_records(&[record("acc-1", 1)]).await.unwrap();

        assert_eq!(backend.record_count(), 0);
        drop(tx);
        assert_eq!(backend.record_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_applies_all_staged_records() {
        let backend = InMemoryBackend::new();

        let mut tx = backend.begin().await.unwrap();
        tx.insert_records(&[record("acc-1", 2), record("acc-1", 1)]).await.unwrap();
        tx.insert_records(&[record("acc-2", 1)]).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(backend.record_count(), 3);
        let sequence: Vec<i64> = backend.records("acc-1").iter().map(|r| r.sequence_no).collect();
        assert_eq!(sequence, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_rejects_whole_commit() {
        let backend = InMemoryBackend::new();

        let mut tx = backend.begin().await.unwrap();
        tx.insert_records(&[record("acc-1", 1)]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.insert_records(&[record("acc-2", 1), record("acc-1", 1)]).await.unwrap();
        let err = tx.commit().await.unwrap_err();

        assert!(matches!(err, BackendError::Conflict(_)));
        assert_eq!(backend.record_count(), 1);
        assert!(backend.records("acc-2").is_empty());
    }

    #[tokio::test]
    async fn test_last_sequence_includes_staged_records() {
        let backend = InMemoryBackend::new();

        let mut tx = backend.begin().await.unwrap();
        assert_eq!(tx.last_sequence("acc-1").await.unwrap(), None);
        tx.insert_records(&[record("acc-1", 1), record("acc-1", 2)]).await.unwrap();
        assert_eq!(tx.last_sequence("acc-1").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_query_records_from_sequence() {
        let backend = InMemoryBackend::new();
        let mut tx = backend.begin().await.unwrap();
        tx.insert_records(&[record("acc-1", 1), record("acc-1", 2), record("acc-1", 3)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let tail = backend.query_records("acc-1", 2).await.unwrap();
        let sequence: Vec<i64> = tail.iter().map(|r| r.sequence_no).collect();
        assert_eq!(sequence, vec![2, 3]);
        assert!(backend.query_records("missing", 0).await.unwrap().is_empty());
    }
}
