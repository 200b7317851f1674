use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::event_sourcing::core::{Envelope, EventRegistry, SharedEvent};
use crate::metrics::Metrics;

use super::backend::{BackendTransaction, EventBackend};
use super::error::StoreError;
use super::record::EventRecord;

// ============================================================================
// Event Store - Durable, Ordered Append and Replay
// ============================================================================
//
// Responsibilities:
// 1. Persist a batch of events in ONE backend transaction (all or nothing)
// 2. Assign event ids (UUIDv7) and one shared persistence timestamp per save
// 3. Optionally verify per-aggregate sequence continuity
// 4. Replay an aggregate's history in sequence order
//
// Large batches are written in sub-batches, all inside the same transaction.
//
// ============================================================================

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist all events atomically, returning one envelope per event in input order.
    async fn save(&self, events: &[SharedEvent]) -> Result<Vec<Envelope>, StoreError>;

    /// Full history of an aggregate, ascending by sequence number.
    async fn load(&self, aggregate_id: &str) -> Result<Vec<Envelope>, StoreError>;

    /// History from `sequence_no` (inclusive), ascending.
    async fn load_from_sequence(&self, aggregate_id: &str, sequence_no: i64) -> Result<Vec<Envelope>, StoreError>;
}

/// How `save` treats the sequence numbers events carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Each aggregate's events must continue its last stored sequence without gaps.
    #[default]
    Strict,
    /// Accept whatever sequence numbers the events carry.
    Unchecked,
}

impl FromStr for SequenceCheck {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SequenceCheck::Strict),
            "unchecked" => Ok(SequenceCheck::Unchecked),
            other => Err(format!("unknown sequence check '{}', expected 'strict' or 'unchecked'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Records written per backend insert
    pub batch_size: usize,
    pub sequence_check: SequenceCheck,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            sequence_check: SequenceCheck::Strict,
        }
    }
}

impl EventStoreConfig {
    /// Accept any sequence numbers (duplicates are still rejected by the backend)
    pub fn unchecked() -> Self {
        Self {
            sequence_check: SequenceCheck::Unchecked,
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

pub struct TransactionalEventStore<B> {
    backend: B,
    registry: Arc<EventRegistry>,
    config: EventStoreConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<B: EventBackend> TransactionalEventStore<B> {
    pub fn new(backend: B, registry: Arc<EventRegistry>) -> Self {
        Self {
            backend,
            registry,
            config: EventStoreConfig::default(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: EventStoreConfig) -> Self {
        self.config = EventStoreConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Serialize everything up front so a bad event aborts before any write.
    fn prepare(events: &[SharedEvent]) -> Result<(Vec<EventRecord>, Vec<Envelope>), StoreError> {
        let now = Utc::now();
        let mut records = Vec::with_capacity(events.len());
        let mut envelopes = Vec::with_capacity(events.len());

        for event in events {
            let (record, envelope) = EventRecord::from_event(event, Uuid::now_v7(), now)?;
            records.push(record);
            envelopes.push(envelope);
        }

        Ok((records, envelopes))
    }

    async fn persist(&self, records: &[EventRecord]) -> Result<(), StoreError> {
        let mut tx = self
            .backend
            .begin()
            .await
            .map_err(|e| StoreError::from_backend("begin_transaction", e))?;

        if self.config.sequence_check == SequenceCheck::Strict {
            if let Err(err) = check_sequences(tx.as_mut(), records).await {
                rollback_quietly(tx).await;
                return Err(err);
            }
        }

        for (index, chunk) in records.chunks(self.config.batch_size).enumerate() {
            if let Err(err) = tx.insert_records(chunk).await {
                tracing::warn!(
                    sub_batch = index,
                    sub_batch_size = chunk.len(),
                    error = %err,
                    "Sub-batch insert failed, rolling back save"
                );
                rollback_quietly(tx).await;
                return Err(StoreError::from_backend("insert_records", err));
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::from_backend("commit_transaction", e))
    }
}

/// Events of each aggregate must continue its stream: last + 1, last + 2, ...
async fn check_sequences(tx: &mut dyn BackendTransaction, records: &[EventRecord]) -> Result<(), StoreError> {
    let mut next_expected: HashMap<&str, i64> = HashMap::new();

    for record in records {
        let expected = match next_expected.get(record.aggregate_id.as_str()) {
            Some(next) => *next,
            None => {
                let last = tx
                    .last_sequence(&record.aggregate_id)
                    .await
                    .map_err(|e| StoreError::from_backend("last_sequence", e))?;
                last.unwrap_or(0) + 1
            }
        };

        if record.sequence_no != expected {
            return Err(StoreError::SequenceConflict {
                aggregate_id: record.aggregate_id.clone(),
                expected,
                found: record.sequence_no,
            });
        }

        next_expected.insert(record.aggregate_id.as_str(), expected + 1);
    }

    Ok(())
}

async fn rollback_quietly(tx: Box<dyn BackendTransaction>) {
    if let Err(err) = tx.rollback().await {
        tracing::warn!(error = %err, "Rollback failed; transaction is discarded on drop");
    }
}

#[async_trait]
impl<B: EventBackend> EventStore for TransactionalEventStore<B> {
    async fn save(&self, events: &[SharedEvent]) -> Result<Vec<Envelope>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let (records, envelopes) = Self::prepare(events)?;
        let result = self.persist(&records).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_save(records.len(), started.elapsed().as_secs_f64(), result.is_ok());
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    event_count = records.len(),
                    sub_batches = records.len().div_ceil(self.config.batch_size),
                    "✅ Saved events to event store"
                );
                Ok(envelopes)
            }
            Err(err) => {
                tracing::error!(event_count = records.len(), error = %err, "Event store save failed");
                Err(err)
            }
        }
    }

    async fn load(&self, aggregate_id: &str) -> Result<Vec<Envelope>, StoreError> {
        self.load_from_sequence(aggregate_id, i64::MIN).await
    }

    async fn load_from_sequence(&self, aggregate_id: &str, sequence_no: i64) -> Result<Vec<Envelope>, StoreError> {
        let records = self
            .backend
            .query_records(aggregate_id, sequence_no)
            .await
            .map_err(|e| StoreError::from_backend("query_records", e))?;

        let envelopes = records
            .into_iter()
            .map(|record| record.into_envelope(&self.registry))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            aggregate_id = %aggregate_id,
            from_sequence = sequence_no,
            event_count = envelopes.len(),
            "Loaded events"
        );
        Ok(envelopes)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
