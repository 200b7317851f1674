use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};

use super::message::Message;

// ============================================================================
// In-Process Pub/Sub Transport
// ============================================================================
//
// Non-persistent, topic-keyed fan-out inside one process:
// - every subscription owns an unbounded tokio mpsc channel (FIFO)
// - publish clones the message into each live subscription on the topic and
//   hands back one pending acknowledgement per delivery
// - subscriptions whose receiver is gone are pruned while publishing
//
// The subscriber acks or nacks each delivery; nothing is redelivered.
//
// ============================================================================

pub type SubscriptionId = u64;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("transport lock poisoned")]
    Poisoned,
}

/// One message handed to one subscription.
#[derive(Debug)]
pub struct Delivery {
    pub topic: String,
    pub message: Message,
    ack: oneshot::Sender<Result<(), String>>,
}

impl Delivery {
    pub fn ack(self) {
        let _ = self.ack.send(Ok(()));
    }

    pub fn nack(self, cause: impl Into<String>) {
        let _ = self.ack.send(Err(cause.into()));
    }
}

/// Waits for the subscriber's verdict on one delivery.
#[derive(Debug)]
pub struct PendingAck {
    pub subscriber: String,
    pub topic: String,
    rx: oneshot::Receiver<Result<(), String>>,
}

impl PendingAck {
    /// A delivery dropped without a verdict counts as a failure.
    pub async fn wait(self) -> Result<(), String> {
        match self.rx.await {
            Ok(verdict) => verdict,
            Err(_) => Err("delivery abandoned".to_string()),
        }
    }
}

struct Subscriber {
    id: SubscriptionId,
    name: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
pub struct InProcessPubSub {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl InProcessPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        topic: &str,
        name: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Delivery>), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let mut topics = self.topics.write().map_err(|_| TransportError::Poisoned)?;
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        topics.entry(topic.to_string()).or_default().push(Subscriber {
            id,
            name: name.to_string(),
            tx,
        });

        Ok((id, rx))
    }

    /// Deliver to every live subscription on `topic`, in subscription order.
    ///
    /// Runs under the read lock; subscriptions found dead are pruned
    /// afterwards in a separate write pass.
    pub fn publish(&self, topic: &str, message: &Message) -> Result<Vec<PendingAck>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut pending = Vec::new();
        let mut dead = Vec::new();
        {
            let topics = self.topics.read().map_err(|_| TransportError::Poisoned)?;
            let Some(subscribers) = topics.get(topic) else {
                return Ok(pending);
            };

            for subscriber in subscribers {
                let (ack, rx) = oneshot::channel();
                let delivery = Delivery {
                    topic: topic.to_string(),
                    message: message.clone(),
                    ack,
                };

                if subscriber.tx.send(delivery).is_err() {
                    dead.push(subscriber.id);
                    continue;
                }

                pending.push(PendingAck {
                    subscriber: subscriber.name.clone(),
                    topic: topic.to_string(),
                    rx,
                });
            }
        }

        if !dead.is_empty() {
            self.prune(topic, &dead)?;
        }

        Ok(pending)
    }

    fn prune(&self, topic: &str, dead: &[SubscriptionId]) -> Result<(), TransportError> {
        let mut topics = self.topics.write().map_err(|_| TransportError::Poisoned)?;
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| !dead.contains(&s.id));
            tracing::debug!(topic = %topic, pruned = dead.len(), "Pruned dead subscriptions");
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
        Ok(())
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, TransportError> {
        let mut topics = self.topics.write().map_err(|_| TransportError::Poisoned)?;
        let mut removed = false;

        topics.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            removed |= subscribers.len() != before;
            !subscribers.is_empty()
        });

        Ok(removed)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .map(|topics| topics.get(topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Refuse further publishes and drop every subscription channel.
    pub fn close(&self) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::SeqCst);
        topics.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message() -> Message {
        Message {
            uuid: Uuid::now_v7(),
            payload: b"{}".to_vec(),
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_on_topic() {
        let pubsub = InProcessPubSub::new();
        let (_, mut first) = pubsub.subscribe("order.created", "first").unwrap();
        let (_, mut second) = pubsub.subscribe("order.created", "second").unwrap();
        let (_, mut other) = pubsub.subscribe("invoice.created", "other").unwrap();

        let pending = pubsub.publish("order.created", &message()).unwrap();
        assert_eq!(pending.len(), 2);

        first.recv().await.unwrap().ack();
        second.recv().await.unwrap().nack("boom");
        assert!(other.try_recv().is_err());

        let verdicts: Vec<_> = futures_util::future::join_all(pending.into_iter().map(PendingAck::wait)).await;
        assert_eq!(verdicts, vec![Ok(()), Err("boom".to_string())]);
    }

    #[tokio::test]
    async fn test_publish_only_needs_shared_access() {
        let pubsub = InProcessPubSub::new();
        let (_, mut rx) = pubsub.subscribe("order.created", "reader").unwrap();

        let held = pubsub.topics.read().unwrap();
        let pending = pubsub.publish("order.created", &message()).unwrap();
        drop(held);

        assert_eq!(pending.len(), 1);
        rx.recv().await.unwrap().ack();
        assert_eq!(pending.into_iter().next().unwrap().wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_empty() {
        let pubsub = InProcessPubSub::new();
        assert!(pubsub.publish("nobody.listens", &message()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_subscribers_are_pruned() {
        let pubsub = InProcessPubSub::new();
        let (_, rx) = pubsub.subscribe("order.created", "gone").unwrap();
        drop(rx);

        assert!(pubsub.publish("order.created", &message()).unwrap().is_empty());
        assert_eq!(pubsub.subscriber_count("order.created"), 0);
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_abandoned() {
        let pubsub = InProcessPubSub::new();
        let (_, mut rx) = pubsub.subscribe("order.created", "sloppy").unwrap();

        let mut pending = pubsub.publish("order.created", &message()).unwrap();
        drop(rx.recv().await.unwrap());

        let verdict = pending.remove(0).wait().await;
        assert_eq!(verdict, Err("delivery abandoned".to_string()));
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close() {
        let pubsub = InProcessPubSub::new();
        let (id, _rx) = pubsub.subscribe("order.created", "h").unwrap();

        assert!(pubsub.unsubscribe(id).unwrap());
        assert!(!pubsub.unsubscribe(id).unwrap());

        pubsub.close();
        assert!(matches!(pubsub.publish("order.created", &message()), Err(TransportError::Closed)));
        assert!(matches!(pubsub.subscribe("order.created", "late"), Err(TransportError::Closed)));
    }
}
