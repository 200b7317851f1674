use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::metrics::Metrics;

use super::core::{Envelope, SharedEvent};
use super::dispatch::{DispatchError, DispatchQueue, EventDispatcher};
use super::store::{EventStore, StoreError};

// ============================================================================
// Unit of Work - Persist-Then-Dispatch
// ============================================================================
//
// Buffers the events produced while handling one command, then commits them:
//
//   Open --commit--> [Committing] --save ok--> Committed --dispatch--> done
//                          |
//                          +--save failed / future dropped--> Open
//
// Dispatch happens strictly after the events are durable. A dispatch failure
// never undoes persistence: the error carries the persisted envelopes.
//
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// `commit` returns once every envelope has been dispatched.
    #[default]
    Synchronous,
    /// `commit` returns after persistence; dispatch runs later on a shared
    /// `DispatchQueue`, in commit order.
    Detached,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(DispatchMode::Synchronous),
            "detached" | "async" => Ok(DispatchMode::Detached),
            other => Err(format!("unknown dispatch mode '{}', expected 'sync' or 'detached'", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UnitOfWorkError {
    #[error("unit of work already committed")]
    AlreadyCommitted,

    #[error("cannot roll back a committed unit of work")]
    RollbackAfterCommit,

    #[error("a commit is in progress")]
    CommitInProgress,

    #[error("failed to persist events: {0}")]
    Store(#[from] StoreError),

    #[error("{} event(s) persisted but dispatch failed: {source}", envelopes.len())]
    Dispatch {
        envelopes: Vec<Envelope>,
        #[source]
        source: DispatchError,
    },
}

impl UnitOfWorkError {
    /// Envelopes that are durably stored despite the error.
    pub fn persisted(&self) -> &[Envelope] {
        match self {
            UnitOfWorkError::Dispatch { envelopes, .. } => envelopes,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Committing,
    Committed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Open => write!(f, "open"),
            Phase::Committing => write!(f, "committing"),
            Phase::Committed => write!(f, "committed"),
        }
    }
}

struct State {
    phase: Phase,
    events: Vec<SharedEvent>,
}

pub struct UnitOfWork {
    id: Uuid,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<dyn EventDispatcher>,
    detached: Option<Arc<DispatchQueue>>,
    state: RwLock<State>,
    commit_gate: tokio::sync::Mutex<()>,
    metrics: Option<Arc<Metrics>>,
}

impl UnitOfWork {
    pub fn new(store: Arc<dyn EventStore>, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            dispatcher,
            detached: None,
            state: RwLock::new(State {
                phase: Phase::Open,
                events: Vec::new(),
            }),
            commit_gate: tokio::sync::Mutex::new(()),
            metrics: None,
        }
    }

    /// Switch to detached dispatch: `commit` hands persisted envelopes to
    /// `queue` instead of dispatching them itself.
    pub fn with_dispatch_queue(mut self, queue: Arc<DispatchQueue>) -> Self {
        self.detached = Some(queue);
        self
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        match self.detached {
            Some(_) => DispatchMode::Detached,
            None => DispatchMode::Synchronous,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Buffer events for the next commit.
    ///
    /// # Panics
    ///
    /// When the unit is committed or a commit is in flight. Registering late
    /// is a programming error, not a runtime condition.
    pub fn register_events<I>(&self, events: I)
    where
        I: IntoIterator<Item = SharedEvent>,
    {
        let mut state = self.write_state();
        if state.phase != Phase::Open {
            let phase = state.phase;
            drop(state);
            panic!("cannot register events on unit of work {} while it is {}", self.id, phase);
        }
        state.events.extend(events);
    }

    pub fn register(&self, event: SharedEvent) {
        self.register_events(std::iter::once(event));
    }

    pub async fn commit(&self) -> Result<Vec<Envelope>, UnitOfWorkError> {
        let _gate = self.commit_gate.lock().await;

        let events = {
            let mut state = self.write_state();
            match state.phase {
                Phase::Committed => return Err(UnitOfWorkError::AlreadyCommitted),
                Phase::Committing => return Err(UnitOfWorkError::CommitInProgress),
                Phase::Open => {}
            }

            if state.events.is_empty() {
                state.phase = Phase::Committed;
                drop(state);
                self.record_commit("empty");
                tracing::debug!(unit_of_work = %self.id, "Committed empty unit of work");
                return Ok(Vec::new());
            }

            state.phase = Phase::Committing;
            state.events.clone()
        };

        let guard = CommittingGuard::new(&self.state);
        let envelopes = match self.store.save(&events).await {
            Ok(envelopes) => envelopes,
            Err(err) => {
                tracing::error!(
                    unit_of_work = %self.id,
                    event_count = events.len(),
                    error = %err,
                    "Commit failed, nothing was persisted"
                );
                self.record_commit("store_failed");
                return Err(UnitOfWorkError::Store(err));
            }
        };
        guard.complete();

        tracing::info!(unit_of_work = %self.id, event_count = envelopes.len(), "✅ Unit of work committed");

        if let Some(queue) = &self.detached {
            return match queue.enqueue(self.id, envelopes.clone()) {
                Ok(()) => Ok(envelopes),
                Err(source) => {
                    tracing::warn!(
                        unit_of_work = %self.id,
                        event_count = envelopes.len(),
                        error = %source,
                        "Events persisted but the dispatch queue is closed"
                    );
                    self.record_commit("dispatch_failed");
                    Err(UnitOfWorkError::Dispatch { envelopes, source })
                }
            };
        }

        match self.dispatcher.dispatch(&envelopes).await {
            Ok(()) => {
                self.record_commit("committed");
                Ok(envelopes)
            }
            Err(source) => {
                tracing::warn!(
                    unit_of_work = %self.id,
                    event_count = envelopes.len(),
                    error = %source,
                    "Events persisted but dispatch failed"
                );
                self.record_commit("dispatch_failed");
                Err(UnitOfWorkError::Dispatch { envelopes, source })
            }
        }
    }

    /// Discard buffered events. Only valid before commit.
    pub fn rollback(&self) -> Result<(), UnitOfWorkError> {
        let mut state = self.write_state();
        match state.phase {
            Phase::Open => {
                let discarded = state.events.len();
                state.events.clear();
                tracing::debug!(unit_of_work = %self.id, discarded, "Unit of work rolled back");
                Ok(())
            }
            Phase::Committing => Err(UnitOfWorkError::CommitInProgress),
            Phase::Committed => Err(UnitOfWorkError::RollbackAfterCommit),
        }
    }

    pub fn event_count(&self) -> usize {
        self.read_state().events.len()
    }

    pub fn is_committed(&self) -> bool {
        self.read_state().phase == Phase::Committed
    }

    /// Snapshot of the buffered events.
    pub fn events(&self) -> Vec<SharedEvent> {
        self.read_state().events.clone()
    }

    fn record_commit(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_commit(outcome);
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the unit to Open unless the save completed. Covers both a failed
/// save and a commit future dropped mid-save.
struct CommittingGuard<'a> {
    state: &'a RwLock<State>,
    completed: bool,
}

impl<'a> CommittingGuard<'a> {
    fn new(state: &'a RwLock<State>) -> Self {
        Self { state, completed: false }
    }

    fn complete(mut self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.phase = Phase::Committed;
        self.completed = true;
    }
}

impl Drop for CommittingGuard<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.phase == Phase::Committing {
            state.phase = Phase::Open;
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
