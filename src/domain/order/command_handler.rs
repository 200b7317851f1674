use anyhow::{Context, Result};
use std::sync::Arc;

use crate::event_sourcing::core::{sequence_events, Aggregate, Envelope};
use crate::event_sourcing::dispatch::{DispatchQueue, EventDispatcher};
use crate::event_sourcing::store::EventStore;
use crate::event_sourcing::unit_of_work::UnitOfWork;
use crate::metrics::Metrics;

use super::aggregate::OrderAggregate;
use super::commands::OrderCommand;

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: Command → Aggregate → Events → Unit of Work → Store → Handlers
//
// ============================================================================

pub struct OrderCommandHandler {
    store: Arc<dyn EventStore>,
    dispatcher: Arc<dyn EventDispatcher>,
    queue: Option<Arc<DispatchQueue>>,
    metrics: Option<Arc<Metrics>>,
}

impl OrderCommandHandler {
    pub fn new(store: Arc<dyn EventStore>, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            queue: None,
            metrics: None,
        }
    }

    /// Commit in detached mode, dispatching through `queue`.
    pub fn with_dispatch_queue(mut self, queue: Arc<DispatchQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current state of an order, `None` if it has no history.
    pub async fn load(&self, order_id: &str) -> Result<Option<OrderAggregate>> {
        let history = self
            .store
            .load(order_id)
            .await
            .with_context(|| format!("Failed to load order {}", order_id))?;

        if history.is_empty() {
            return Ok(None);
        }

        OrderAggregate::load_from_envelopes(&history).map(Some)
    }

    /// Handle a command and commit the resulting events.
    ///
    /// Business rule violations come back as `OrderError`, commit failures as
    /// `UnitOfWorkError` (both reachable through `anyhow::Error::downcast_ref`).
    pub async fn handle(&self, order_id: &str, command: OrderCommand) -> Result<Vec<Envelope>> {
        let (version, payloads) = match self.load(order_id).await? {
            Some(order) => (order.version(), order.handle_command(&command)?),
            None => (0, OrderAggregate::handle_initial_command(&command)?),
        };

        let mut unit_of_work = UnitOfWork::new(Arc::clone(&self.store), Arc::clone(&self.dispatcher));
        if let Some(queue) = &self.queue {
            unit_of_work = unit_of_work.with_dispatch_queue(Arc::clone(queue));
        }
        if let Some(metrics) = &self.metrics {
            unit_of_work = unit_of_work.with_metrics(Arc::clone(metrics));
        }
        unit_of_work.register_events(sequence_events(order_id, version, payloads));

        let envelopes = unit_of_work.commit().await?;

        tracing::info!(
            order_id = %order_id,
            version = version + envelopes.len() as i64,
            events = envelopes.len(),
            "Order command handled"
        );
        Ok(envelopes)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
