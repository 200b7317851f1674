use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::event_sourcing::core::Envelope;
use crate::metrics::Metrics;

use super::dispatcher::EventDispatcher;
use super::error::DispatchError;

// ============================================================================
// Dispatch Queue - Ordered Background Dispatch
// ============================================================================
//
// Detached commits hand their envelopes to one queue. A single worker drains
// it, dispatching each batch to completion before starting the next, so
// handlers observe batches in the order their commits finished.
//
// Failures are logged and counted; they are never reported back to the
// committing caller.
//
// ============================================================================

struct QueuedDispatch {
    unit_of_work: Uuid,
    envelopes: Vec<Envelope>,
}

pub struct DispatchQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<QueuedDispatch>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Start the draining worker. Must be called from within a tokio runtime.
    pub fn spawn(dispatcher: Arc<dyn EventDispatcher>, metrics: Option<Arc<Metrics>>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(drain(dispatcher, rx, metrics));

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn enqueue(&self, unit_of_work: Uuid, envelopes: Vec<Envelope>) -> Result<(), DispatchError> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return Err(DispatchError::Closed);
        };

        tx.send(QueuedDispatch { unit_of_work, envelopes })
            .map_err(|_| DispatchError::Closed)
    }

    /// Stop accepting work and wait until everything already queued has been
    /// dispatched.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().unwrap_or_else(PoisonError::into_inner).take());

        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Dispatch queue worker did not finish cleanly");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }
}

async fn drain(
    dispatcher: Arc<dyn EventDispatcher>,
    mut rx: mpsc::UnboundedReceiver<QueuedDispatch>,
    metrics: Option<Arc<Metrics>>,
) {
    while let Some(queued) = rx.recv().await {
        let outcome = match dispatcher.dispatch(&queued.envelopes).await {
            Ok(()) => "committed",
            Err(err) => {
                tracing::error!(
                    unit_of_work = %queued.unit_of_work,
                    event_count = queued.envelopes.len(),
                    error = %err,
                    "Detached dispatch failed"
                );
                "dispatch_failed"
            }
        };

        if let Some(metrics) = &metrics {
            metrics.record_commit(outcome);
        }
    }

    tracing::debug!("Dispatch queue drained");
}
