use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tagflow_core::{EngineError, EngineResult};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::topic::{topic_matches, validate_pattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: serde_json::Value,
    pub qos: Qos,
    pub retain: bool,
}

/// A live subscription. Dropping it unsubscribes — there is no separate `unsubscribe()` call,
/// matching the "subscription method returning an unsubscribe handle" guidance for replacing
/// .NET-style bus events.
pub struct Subscription {
    pub pattern: String,
    id: u64,
    bus: Arc<InProcessBusInner>,
    pub receiver: mpsc::Receiver<BusMessage>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.subscribers.remove(&self.id);
    }
}

/// `MessageBus` is the seam a real broker client plugs into at the deployment boundary; the
/// broker itself is out of scope for this runtime. `InProcessBus` is the one implementation
/// this crate ships, sufficient for single-node deployments and for tests.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        qos: Qos,
        retain: bool,
    ) -> EngineResult<()>;

    async fn subscribe(&self, pattern: &str) -> EngineResult<Subscription>;

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

struct SubscriberEntry {
    pattern: String,
    tx: mpsc::Sender<BusMessage>,
}

struct InProcessBusInner {
    subscribers: DashMap<u64, SubscriberEntry>,
    retained: DashMap<String, BusMessage>,
    next_id: AtomicU64,
    connection_tx: broadcast::Sender<ConnectionEvent>,
}

/// An in-process `MessageBus` built on a topic-pattern subscriber map plus a per-topic retained-
/// message cache. Delivery buffer per subscriber defaults to 256 messages; a slow subscriber
/// causes `publish` to report an overload error for that subscriber rather than blocking the
/// publisher, consistent with the spec's "drop & count" overload kind.
pub struct InProcessBus {
    inner: Arc<InProcessBusInner>,
}

impl InProcessBus {
    pub fn new() -> Self {
        let (connection_tx, _) = broadcast::channel(16);
        let _ = connection_tx.send(ConnectionEvent::Connected);
        Self {
            inner: Arc::new(InProcessBusInner {
                subscribers: DashMap::new(),
                retained: DashMap::new(),
                next_id: AtomicU64::new(0),
                connection_tx,
            }),
        }
    }

    const SUBSCRIBER_BUFFER: usize = 256;
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        qos: Qos,
        retain: bool,
    ) -> EngineResult<()> {
        let message = BusMessage { topic: topic.to_string(), payload, qos, retain };

        if retain {
            self.inner.retained.insert(topic.to_string(), message.clone());
        }

        let mut overloaded = 0usize;
        for entry in self.inner.subscribers.iter() {
            if topic_matches(&entry.pattern, topic) {
                if entry.tx.try_send(message.clone()).is_err() {
                    overloaded += 1;
                }
            }
        }

        if overloaded > 0 {
            debug!(topic, overloaded, "bus overload: subscriber buffer full, message dropped");
            return Err(EngineError::overload("message-bus"));
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> EngineResult<Subscription> {
        validate_pattern(pattern).map_err(EngineError::config)?;

        let (tx, receiver) = mpsc::channel(Self::SUBSCRIBER_BUFFER);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .insert(id, SubscriberEntry { pattern: pattern.to_string(), tx: tx.clone() });

        for entry in self.inner.retained.iter() {
            if topic_matches(pattern, entry.key()) {
                if tx.try_send(entry.value().clone()).is_err() {
                    warn!(pattern, "failed to deliver retained message to new subscriber");
                }
            }
        }

        Ok(Subscription { pattern: pattern.to_string(), id, bus: self.inner.clone(), receiver })
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.connection_tx.subscribe()
    }
}

/// Best-effort publish helper: retries up to 3 times with linear backoff, matching the spec's
/// publish-failure contract for ordinary messages. Per-poll bulk messages should call
/// `bus.publish` directly instead — they must never be retried past their own poll interval.
pub async fn publish_with_retry(
    bus: &dyn MessageBus,
    topic: &str,
    payload: serde_json::Value,
    qos: Qos,
    retain: bool,
) -> EngineResult<()> {
    let mut attempt = 0;
    loop {
        match bus.publish(topic, payload.clone(), qos, retain).await {
            Ok(()) => return Ok(()),
            Err(_) if attempt < 2 => {
                attempt += 1;
                tokio::time::sleep(std::time::Duration::from_millis(100 * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_matching_publish() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("tags/+/bulk").await.unwrap();
        bus.publish("tags/sim/bulk", json!({"v": 1}), Qos::AtMostOnce, false).await.unwrap();
        let msg = sub.receiver.recv().await.unwrap();
        assert_eq!(msg.topic, "tags/sim/bulk");
    }

    #[tokio::test]
    async fn non_matching_publish_is_not_delivered() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("status/+").await.unwrap();
        bus.publish("tags/sim/bulk", json!({}), Qos::AtMostOnce, false).await.unwrap();
        assert!(sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn retained_message_delivered_to_late_subscriber() {
        let bus = InProcessBus::new();
        bus.publish("tags/sim/t1", json!({"v": 5}), Qos::AtMostOnce, true).await.unwrap();
        let mut sub = bus.subscribe("tags/sim/t1").await.unwrap();
        let msg = sub.receiver.recv().await.unwrap();
        assert_eq!(msg.payload, json!({"v": 5}));
    }

    #[tokio::test]
    async fn dropping_subscription_removes_subscriber() {
        let bus = InProcessBus::new();
        let sub = bus.subscribe("a/b").await.unwrap();
        assert_eq!(bus.inner.subscribers.len(), 1);
        drop(sub);
        assert_eq!(bus.inner.subscribers.len(), 0);
    }
}
