use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};

use super::backend::{BackendError, BackendTransaction, EventBackend};
use super::record::EventRecord;

// ============================================================================
// PostgreSQL Backend (sqlx)
// ============================================================================
//
// One row per event in `event_records`. The unique index on
// (aggregate_id, sequence_no) is what finally guarantees per-aggregate order
// under concurrent writers; unique violations surface as conflicts.
//
// Each sub-batch is written with multi-row INSERTs inside the caller's
// transaction, split so no statement exceeds the protocol's 65535 bind
// parameters.
//
// ============================================================================

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS event_records (
        id UUID PRIMARY KEY,
        aggregate_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        sequence_no BIGINT NOT NULL,
        data BYTEA NOT NULL,
        metadata BYTEA NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS event_records_aggregate_sequence_idx
        ON event_records (aggregate_id, sequence_no)",
    "CREATE INDEX IF NOT EXISTS event_records_event_type_idx ON event_records (event_type)",
    "CREATE INDEX IF NOT EXISTS event_records_timestamp_idx ON event_records (timestamp)",
];

const UNIQUE_VIOLATION: &str = "23505";

const COLUMNS_PER_ROW: usize = 7;
const MAX_BIND_PARAMETERS: usize = u16::MAX as usize;
const MAX_ROWS_PER_INSERT: usize = MAX_BIND_PARAMETERS / COLUMNS_PER_ROW;

#[derive(Debug, Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        tracing::info!(max_connections, "Connected to PostgreSQL event backend");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the records table and its indexes if missing
    pub async fn ensure_schema(&self) -> Result<(), BackendError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventBackend for PostgresBackend {
    async fn begin(&self) -> Result<Box<dyn BackendTransaction>, BackendError> {
        let tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn query_records(&self, aggregate_id: &str, from_sequence: i64) -> Result<Vec<EventRecord>, BackendError> {
        let rows = sqlx::query(
            "SELECT id, aggregate_id, event_type, sequence_no, data, metadata, timestamp
             FROM event_records
             WHERE aggregate_id = $1 AND sequence_no >= $2
             ORDER BY sequence_no ASC",
        )
        .bind(aggregate_id)
        .bind(from_sequence)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("query_records", e))?;

        rows.iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("decode_row", e))
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl BackendTransaction for PostgresTransaction {
    async fn last_sequence(&mut self, aggregate_id: &str) -> Result<Option<i64>, BackendError> {
        sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(sequence_no) FROM event_records WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("last_sequence", e))
    }

    async fn insert_records(&mut self, records: &[EventRecord]) -> Result<(), BackendError> {
        if records.is_empty() {
            return Ok(());
        }

        for chunk in records.chunks(MAX_ROWS_PER_INSERT) {
            let mut statement = insert_statement(chunk);
            statement
                .build()
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("insert_records", e))?;
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn insert_statement(records: &[EventRecord]) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO event_records (id, aggregate_id, event_type, sequence_no, data, metadata, timestamp) ",
    );
    builder.push_values(records, |mut row, record| {
        row.push_bind(record.id)
            .push_bind(record.aggregate_id.clone())
            .push_bind(record.event_type.clone())
            .push_bind(record.sequence_no)
            .push_bind(record.data.clone())
            .push_bind(record.metadata.clone())
            .push_bind(record.timestamp);
    });
    builder
}

fn record_from_row(row: &PgRow) -> Result<EventRecord, sqlx::Error> {
    Ok(EventRecord {
        id: row.try_get("id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        sequence_no: row.try_get("sequence_no")?,
        data: row.try_get("data")?,
        metadata: row.try_get("metadata")?,
        timestamp: row.try_get("timestamp")?,
    })
}

/// Map SQLx errors to BackendError.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                BackendError::Conflict(format!("unique violation in {}: {}", operation, db_err.message()))
            } else {
                BackendError::failed(operation, format!("database error: {}", db_err.message()))
            }
        }
        sqlx::Error::PoolClosed => BackendError::failed(operation, "connection pool closed"),
        other => BackendError::failed(operation, other.to_string()),
    }
}
