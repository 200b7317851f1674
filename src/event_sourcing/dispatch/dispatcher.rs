use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::event_sourcing::core::{topics_for, Envelope, EventRegistry};
use crate::metrics::Metrics;

use super::error::{DispatchError, HandlerFailure};
use super::handler::EventHandler;
use super::message::Message;
use super::pubsub::{Delivery, InProcessPubSub, PendingAck, SubscriptionId, TransportError};

// ============================================================================
// Topic Dispatcher - Wildcard Fan-Out to Handlers
// ============================================================================
//
// Every envelope is published to up to four topics derived from its type:
//
//   "order.created" -> "order.created", "order.*", "*.created", "*.*"
//
// Each subscription is serviced by its own worker task reading its own
// channel, so deliveries to one handler are FIFO and a slow or failing
// handler never holds up another. `dispatch` waits for every reached
// subscription to ack before reporting the collected failures.
//
// ============================================================================

#[async_trait]
pub trait EventDispatcher: Send + Sync {
    async fn dispatch(&self, envelopes: &[Envelope]) -> Result<(), DispatchError>;

    async fn close(&self) -> Result<(), DispatchError>;
}

struct Registration {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    worker: JoinHandle<()>,
}

pub struct TopicDispatcher {
    transport: Arc<InProcessPubSub>,
    registry: Arc<EventRegistry>,
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
    closed: AtomicBool,
    metrics: Option<Arc<Metrics>>,
}

impl TopicDispatcher {
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self {
            transport: Arc::new(InProcessPubSub::new()),
            registry,
            handlers: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register `handler` on one exact topic string (which may itself be a
    /// wildcard pattern). Must be called from within a tokio runtime.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<SubscriptionId, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }

        let (id, rx) = self.transport.subscribe(topic, handler.name())?;
        let worker = tokio::spawn(run_worker(
            Arc::clone(&handler),
            Arc::clone(&self.registry),
            rx,
            self.metrics.clone(),
        ));

        self.register(topic, Registration { id, handler: Arc::clone(&handler), worker })?;

        tracing::info!(topic = %topic, handler = %handler.name(), subscription_id = id, "Handler subscribed");
        Ok(id)
    }

    /// Record a started worker, unless `close` got in first; in that case the
    /// worker is aborted and its transport subscription dropped.
    fn register(&self, topic: &str, registration: Registration) -> Result<(), DispatchError> {
        let mut handlers = self.handlers.write().map_err(|_| TransportError::Poisoned)?;
        if self.is_closed() {
            drop(handlers);
            registration.worker.abort();
            self.transport.unsubscribe(registration.id)?;
            return Err(DispatchError::Closed);
        }

        handlers.entry(topic.to_string()).or_default().push(registration);
        Ok(())
    }

    /// Subscribe a handler to every topic it declares.
    pub fn subscribe_handler(&self, handler: Arc<dyn EventHandler>) -> Result<Vec<SubscriptionId>, DispatchError> {
        handler
            .event_types()
            .iter()
            .map(|topic| self.subscribe(topic, Arc::clone(&handler)))
            .collect()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, DispatchError> {
        self.transport.unsubscribe(id)?;

        let mut handlers = self.handlers.write().map_err(|_| TransportError::Poisoned)?;
        let mut removed = false;
        handlers.retain(|_, registrations| {
            registrations.retain(|registration| {
                if registration.id == id {
                    registration.worker.abort();
                    removed = true;
                    false
                } else {
                    true
                }
            });
            !registrations.is_empty()
        });

        Ok(removed)
    }

    /// Handlers registered on exactly this topic string.
    pub fn handler_count(&self, topic: &str) -> usize {
        self.handlers
            .read()
            .map(|handlers| handlers.get(topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn handler_names(&self, topic: &str) -> Vec<String> {
        self.handlers
            .read()
            .map(|handlers| {
                handlers
                    .get(topic)
                    .map(|regs| regs.iter().map(|r| r.handler.name().to_string()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .handlers
            .read()
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventDispatcher for TopicDispatcher {
    async fn dispatch(&self, envelopes: &[Envelope]) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }

        let messages = envelopes
            .iter()
            .map(|envelope| {
                Message::from_envelope(envelope).map_err(|source| DispatchError::Encode {
                    event_id: envelope.event_id(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut pending: Vec<(PendingAck, String, Uuid)> = Vec::new();
        for (envelope, message) in envelopes.iter().zip(&messages) {
            if let Some(metrics) = &self.metrics {
                metrics.record_dispatch(envelope.event_type());
            }

            let mut reached = 0;
            for topic in topics_for(envelope.event_type()) {
                let acks = self.transport.publish(&topic, message)?;
                reached += acks.len();
                pending.extend(
                    acks.into_iter()
                        .map(|ack| (ack, envelope.event_type().to_string(), envelope.event_id())),
                );
            }

            if reached == 0 {
                tracing::debug!(
                    event_type = %envelope.event_type(),
                    event_id = %envelope.event_id(),
                    "No handlers subscribed, event dropped"
                );
            }
        }

        let delivered = pending.len();
        let failures: Vec<HandlerFailure> = join_all(pending.into_iter().map(|(ack, event_type, event_id)| async move {
            let handler = ack.subscriber.clone();
            let topic = ack.topic.clone();
            ack.wait().await.err().map(|cause| HandlerFailure {
                handler,
                topic,
                event_type,
                event_id,
                cause,
            })
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        if failures.is_empty() {
            tracing::debug!(envelopes = envelopes.len(), deliveries = delivered, "Dispatched events");
            Ok(())
        } else {
            tracing::warn!(
                envelopes = envelopes.len(),
                deliveries = delivered,
                failed = failures.len(),
                "Dispatch completed with handler failures"
            );
            Err(DispatchError::HandlerFailures(failures))
        }
    }

    async fn close(&self) -> Result<(), DispatchError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.transport.close();
        let mut handlers = self.handlers.write().map_err(|_| TransportError::Poisoned)?;
        let mut workers = 0;
        for (_, registrations) in handlers.drain() {
            for registration in registrations {
                registration.worker.abort();
                workers += 1;
            }
        }

        tracing::info!(workers, "Dispatcher closed");
        Ok(())
    }
}

impl Drop for TopicDispatcher {
    fn drop(&mut self) {
        if let Ok(handlers) = self.handlers.get_mut() {
            for registration in handlers.values().flatten() {
                registration.worker.abort();
            }
        }
    }
}

async fn run_worker(
    handler: Arc<dyn EventHandler>,
    registry: Arc<EventRegistry>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    metrics: Option<Arc<Metrics>>,
) {
    while let Some(delivery) = rx.recv().await {
        match deliver(handler.as_ref(), &registry, &delivery.message).await {
            Ok(()) => delivery.ack(),
            Err(cause) => {
                tracing::error!(
                    handler = %handler.name(),
                    topic = %delivery.topic,
                    event_id = %delivery.message.uuid,
                    error = %cause,
                    "Event handler failed"
                );
                if let Some(metrics) = &metrics {
                    metrics.record_handler_failure(handler.name());
                }
                delivery.nack(cause);
            }
        }
    }
}

async fn deliver(handler: &dyn EventHandler, registry: &EventRegistry, message: &Message) -> Result<(), String> {
    let envelope = message
        .to_envelope(registry)
        .map_err(|e| format!("failed to reconstruct envelope: {}", e))?;

    match AssertUnwindSafe(handler.handle(&envelope)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{
        derive_metadata, DomainEvent, EventHeader, EventPayload, GenericEvent, SharedEvent,
    };
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    /// Records every envelope it receives; optionally fails or panics.
    struct Recorder {
        name: String,
        topics: Vec<String>,
        seen: Mutex<Vec<(String, i64)>>,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Panic,
    }

    impl Recorder {
        fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                topics: Vec::new(),
                seen: Mutex::new(Vec::new()),
                behavior,
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }

        fn sequence(&self) -> Vec<i64> {
            self.seen.lock().unwrap().iter().map(|(_, seq)| *seq).collect()
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn event_types(&self) -> Vec<String> {
            self.topics.clone()
        }

        async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push((envelope.event_type().to_string(), envelope.sequence_no()));
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => anyhow::bail!("{} refused {}", self.name, envelope.event_type()),
                Behavior::Panic => panic!("{} exploded", self.name),
            }
        }
    }

    fn envelope(entity: &str, verb: &str, aggregate_id: &str, sequence_no: i64) -> Envelope {
        let event: SharedEvent = Arc::new(GenericEvent::new(entity, verb, aggregate_id, sequence_no, b"{}".to_vec()));
        let metadata = derive_metadata(event.as_ref());
        Envelope::new(event, Uuid::now_v7(), chrono::Utc::now(), metadata)
    }

    fn dispatcher() -> TopicDispatcher {
        TopicDispatcher::new(Arc::new(EventRegistry::new()))
    }

    #[tokio::test]
    async fn test_exact_subscribers_receive_only_their_type() {
        let dispatcher = dispatcher();
        let h1 = Recorder::new("h1", Behavior::Succeed);
        let h2 = Recorder::new("h2", Behavior::Succeed);
        let h3 = Recorder::new("h3", Behavior::Succeed);
        dispatcher.subscribe("order.created", h1.clone()).unwrap();
        dispatcher.subscribe("order.created", h2.clone()).unwrap();
        dispatcher.subscribe("invoice.created", h3.clone()).unwrap();

        dispatcher.dispatch(&[envelope("order", "created", "o-1", 1)]).await.unwrap();

        assert_eq!(h1.calls(), 1);
        assert_eq!(h2.calls(), 1);
        assert_eq!(h3.calls(), 0);
    }

    #[tokio::test]
    async fn test_wildcard_patterns_each_receive_one_delivery() {
        let dispatcher = dispatcher();
        let handlers: Vec<_> = ["order.created", "order.*", "*.created", "*.*"]
            .iter()
            .map(|topic| {
                let handler = Recorder::new(topic, Behavior::Succeed);
                dispatcher.subscribe(topic, handler.clone()).unwrap();
                handler
            })
            .collect();
        let unrelated = Recorder::new("order.shipped", Behavior::Succeed);
        dispatcher.subscribe("order.shipped", unrelated.clone()).unwrap();

        dispatcher.dispatch(&[envelope("order", "created", "o-1", 1)]).await.unwrap();

        for handler in &handlers {
            assert_eq!(handler.calls(), 1, "handler {}", handler.name());
        }
        assert_eq!(unrelated.calls(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_without_handlers_is_ok() {
        let dispatcher = dispatcher();
        dispatcher.dispatch(&[envelope("order", "created", "o-1", 1)]).await.unwrap();
        dispatcher.dispatch(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_others() {
        let dispatcher = dispatcher();
        let failing = Recorder::new("failing", Behavior::Fail);
        let healthy = Recorder::new("healthy", Behavior::Succeed);
        dispatcher.subscribe("order.created", failing.clone()).unwrap();
        dispatcher.subscribe("order.*", healthy.clone()).unwrap();

        let envelopes = vec![envelope("order", "created", "o-1", 1), envelope("order", "created", "o-1", 2)];
        let err = dispatcher.dispatch(&envelopes).await.unwrap_err();

        let failures = err.failures();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().all(|f| f.handler == "failing" && f.topic == "order.created"));
        assert_eq!(failures[0].event_id, envelopes[0].event_id());
        assert!(failures[0].cause.contains("refused"));
        assert_eq!(healthy.calls(), 2);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_reported_and_worker_survives() {
        let dispatcher = dispatcher();
        let panicking = Recorder::new("panicking", Behavior::Panic);
        let healthy = Recorder::new("healthy", Behavior::Succeed);
        dispatcher.subscribe("order.created", panicking.clone()).unwrap();
        dispatcher.subscribe("order.created", healthy.clone()).unwrap();

        let first = dispatcher.dispatch(&[envelope("order", "created", "o-1", 1)]).await.unwrap_err();
        let second = dispatcher.dispatch(&[envelope("order", "created", "o-1", 2)]).await.unwrap_err();

        assert!(first.failures()[0].cause.contains("panicked"));
        assert_eq!(second.failures().len(), 1);
        assert_eq!(panicking.calls(), 2);
        assert_eq!(healthy.calls(), 2);
    }

    #[tokio::test]
    async fn test_deliveries_to_one_handler_preserve_order() {
        let dispatcher = dispatcher();
        let handler = Recorder::new("ordered", Behavior::Succeed);
        dispatcher.subscribe("order.*", handler.clone()).unwrap();

        let envelopes: Vec<_> = (1..=20).map(|seq| envelope("order", "updated", "o-1", seq)).collect();
        dispatcher.dispatch(&envelopes).await.unwrap();

        assert_eq!(handler.sequence(), (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_untyped_event_reaches_exact_and_catch_all_only() {
        let dispatcher = dispatcher();
        let exact = Recorder::new("exact", Behavior::Succeed);
        let catch_all = Recorder::new("catch_all", Behavior::Succeed);
        dispatcher.subscribe("heartbeat", exact.clone()).unwrap();
        dispatcher.subscribe("*.*", catch_all.clone()).unwrap();

        let event: SharedEvent = Arc::new(GenericEvent::from_header(
            EventHeader {
                event_type: "heartbeat".into(),
                aggregate_id: "node-1".into(),
                sequence_no: 1,
                created_at: chrono::Utc::now(),
            },
            b"{}".to_vec(),
        ));
        let metadata = derive_metadata(event.as_ref());
        let heartbeat = Envelope::new(event, Uuid::now_v7(), chrono::Utc::now(), metadata);

        dispatcher.dispatch(&[heartbeat]).await.unwrap();

        assert_eq!(exact.calls(), 1);
        assert_eq!(catch_all.calls(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_handler_uses_declared_types() {
        let dispatcher = dispatcher();
        let handler = Arc::new(Recorder {
            name: "projector".into(),
            topics: vec!["order.created".into(), "order.shipped".into()],
            seen: Mutex::new(Vec::new()),
            behavior: Behavior::Succeed,
        });

        let ids = dispatcher.subscribe_handler(handler.clone()).unwrap();

        assert_eq!(ids.len(), 2);
        assert_eq!(dispatcher.topics(), vec!["order.created".to_string(), "order.shipped".to_string()]);
        assert_eq!(dispatcher.handler_names("order.created"), vec!["projector".to_string()]);

        assert!(dispatcher.unsubscribe(ids[0]).unwrap());
        assert_eq!(dispatcher.handler_count("order.created"), 0);
        dispatcher.dispatch(&[envelope("order", "created", "o-1", 1)]).await.unwrap();
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn test_handlers_receive_typed_events() {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
        struct Paid {
            amount: u64,
        }

        impl EventPayload for Paid {
            fn event_type(&self) -> &'static str {
                "invoice.paid"
            }
        }

        struct Collector(Mutex<Vec<u64>>);

        #[async_trait]
        impl EventHandler for Collector {
            fn name(&self) -> &str {
                "collector"
            }

            fn event_types(&self) -> Vec<String> {
                vec!["invoice.paid".into()]
            }

            async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
                let paid = DomainEvent::<Paid>::from_envelope(envelope)?;
                self.0.lock().unwrap().push(paid.data().amount);
                Ok(())
            }
        }

        let mut registry = EventRegistry::new();
        registry.register::<Paid>(&["invoice.paid"]);
        let dispatcher = TopicDispatcher::new(Arc::new(registry));
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        dispatcher.subscribe_handler(collector.clone()).unwrap();

        let event: SharedEvent = Arc::new(DomainEvent::new("inv-1", 1, Paid { amount: 250 }));
        let metadata = derive_metadata(event.as_ref());
        let paid = Envelope::new(event, Uuid::now_v7(), chrono::Utc::now(), metadata);
        dispatcher.dispatch(&[paid]).await.unwrap();

        assert_eq!(*collector.0.lock().unwrap(), vec![250]);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_rejects_work() {
        let dispatcher = dispatcher();
        dispatcher.subscribe("order.created", Recorder::new("h", Behavior::Succeed)).unwrap();

        dispatcher.close().await.unwrap();
        dispatcher.close().await.unwrap();

        assert!(matches!(
            dispatcher.dispatch(&[envelope("order", "created", "o-1", 1)]).await,
            Err(DispatchError::Closed)
        ));
        assert!(matches!(
            dispatcher.subscribe("order.created", Recorder::new("late", Behavior::Succeed)),
            Err(DispatchError::Closed)
        ));
        assert_eq!(dispatcher.handler_count("order.created"), 0);
    }

    #[tokio::test]
    async fn test_registration_racing_close_is_aborted() {
        let dispatcher = dispatcher();
        let (id, _rx) = dispatcher.transport.subscribe("order.created", "late").unwrap();
        let (tx, worker_gone) = tokio::sync::oneshot::channel::<()>();
        let worker = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await
        });

        dispatcher.closed.store(true, Ordering::SeqCst);
        let registration = Registration {
            id,
            handler: Recorder::new("late", Behavior::Succeed),
            worker,
        };

        assert!(matches!(
            dispatcher.register("order.created", registration),
            Err(DispatchError::Closed)
        ));
        assert_eq!(dispatcher.handler_count("order.created"), 0);
        assert_eq!(dispatcher.transport.subscriber_count("order.created"), 0);

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), worker_gone).await;
        assert!(matches!(outcome, Ok(Err(_))), "worker should have been aborted");
    }

    #[tokio::test]
    async fn test_metrics_count_dispatches_and_failures() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let dispatcher = dispatcher().with_metrics(metrics.clone());
        dispatcher.subscribe("order.created", Recorder::new("failing", Behavior::Fail)).unwrap();

        let _ = dispatcher.dispatch(&[envelope("order", "created", "o-1", 1)]).await;

        assert_eq!(metrics.events_dispatched_total.with_label_values(&["order.created"]).get(), 1);
        assert_eq!(metrics.handler_failures_total.with_label_values(&["failing"]).get(), 1);
    }
}
