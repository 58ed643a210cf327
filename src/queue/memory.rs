//! In-process broker with real acknowledgement semantics.
//!
//! `MemoryBroker` exists so everything above the [`Broker`] seam can be
//! exercised without a running broker: manual ack, `nack(true)`
//! redelivery with a retry count, `nack(false)` dead-lettering, and
//! redelivery of unacknowledged messages after a consumer goes away.

use super::broker::{
    Acker, Broker, ConsumerOptions, Delivery, DeliveryProperties, PublishOptions, QueueDeclaration,
};
use super::naming::dlq_name;
use super::QueueError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Clone)]
struct StoredMessage {
    body: Vec<u8>,
    properties: DeliveryProperties,
}

#[derive(Default)]
struct MemQueue {
    declared: bool,
    dead_letter_queue: Option<String>,
    pending: VecDeque<StoredMessage>,
    consumer: Option<flume::Sender<Delivery>>,
}

#[derive(Default)]
struct Inner {
    queues: Mutex<FxHashMap<String, MemQueue>>,
}

impl Inner {
    /// Hand a message to the live consumer, or buffer it until one
    /// attaches. The send happens outside the lock: a failed send drops
    /// the delivery, whose acker re-enters here.
    fn deliver(self: &Arc<Self>, queue: &str, message: StoredMessage) {
        let sender = {
            let mut guard = self.queues.lock();
            let q = guard.entry(queue.to_string()).or_default();
            match q.consumer.as_ref() {
                Some(tx) if !tx.is_disconnected() => Some(tx.clone()),
                _ => {
                    q.consumer = None;
                    q.pending.push_back(message.clone());
                    None
                }
            }
        };
        if let Some(tx) = sender {
            let delivery = Delivery::new(
                message.body.clone(),
                message.properties.clone(),
                Box::new(MemoryAcker {
                    inner: Arc::clone(self),
                    queue: queue.to_string(),
                    message: Some(message),
                }),
            );
            let _ = tx.send(delivery);
        }
    }

    fn dead_letter_target(&self, queue: &str) -> String {
        self.queues
            .lock()
            .get(queue)
            .and_then(|q| q.dead_letter_queue.clone())
            .unwrap_or_else(|| dlq_name(queue))
    }
}

/// Per-delivery acknowledgement state. Dropping it without a decision
/// re-presents the message, which is what a broker does when a consumer
/// connection dies with unacknowledged deliveries.
struct MemoryAcker {
    inner: Arc<Inner>,
    queue: String,
    message: Option<StoredMessage>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(mut self: Box<Self>) -> Result<(), QueueError> {
        self.message = None;
        Ok(())
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        if let Some(mut message) = self.message.take() {
            if requeue {
                message.properties.retry_count += 1;
                self.inner.deliver(&self.queue, message);
            } else {
                let target = self.inner.dead_letter_target(&self.queue);
                self.inner.deliver(&target, message);
            }
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.inner.deliver(&self.queue, message);
        }
    }
}

/// In-process [`Broker`] implementation.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages buffered on a queue with no attached consumer. Test
    /// introspection helper.
    #[must_use]
    pub fn buffered(&self, queue: &str) -> usize {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map_or(0, |q| q.pending.len())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), QueueError> {
        let mut guard = self.inner.queues.lock();
        let q = guard.entry(declaration.queue.clone()).or_default();
        q.declared = true;
        q.dead_letter_queue = Some(declaration.dead_letter_queue.clone());
        guard
            .entry(declaration.dead_letter_queue.clone())
            .or_default()
            .declared = true;
        Ok(())
    }

    async fn assert_queue_passive(&self, queue: &str) -> Result<(), QueueError> {
        let guard = self.inner.queues.lock();
        if guard.get(queue).is_some_and(|q| q.declared) {
            Ok(())
        } else {
            Err(QueueError::QueueMissing {
                queue: queue.to_string(),
            })
        }
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        options: &PublishOptions,
    ) -> Result<(), QueueError> {
        let properties = DeliveryProperties {
            message_id: options.message_id.clone(),
            correlation_id: options.correlation_id.clone(),
            timestamp: options.timestamp,
            priority: options.priority,
            retry_count: 0,
            headers: FxHashMap::default(),
        };
        self.inner.deliver(
            queue,
            StoredMessage {
                body: body.to_vec(),
                properties,
            },
        );
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _options: &ConsumerOptions,
    ) -> Result<flume::Receiver<Delivery>, QueueError> {
        let (tx, rx) = flume::unbounded();
        let backlog: Vec<StoredMessage> = {
            let mut guard = self.inner.queues.lock();
            let q = guard.entry(queue.to_string()).or_default();
            // Newest consumer wins; a superseded consumer's stream ends.
            q.consumer = Some(tx);
            q.pending.drain(..).collect()
        };
        for message in backlog {
            self.inner.deliver(queue, message);
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueOptions;

    fn declaration(queue: &str) -> QueueDeclaration {
        QueueDeclaration {
            queue: queue.to_string(),
            dead_letter_queue: dlq_name(queue),
            options: QueueOptions::default(),
        }
    }

    #[tokio::test]
    async fn publish_buffers_until_a_consumer_attaches() {
        let broker = MemoryBroker::new();
        broker.declare_queue(&declaration("jobs")).await.unwrap();
        broker
            .publish("jobs", b"\"one\"", &PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(broker.buffered("jobs"), 1);

        let rx = broker
            .consume("jobs", &ConsumerOptions::default())
            .await
            .unwrap();
        let delivery = rx.recv_async().await.unwrap();
        assert_eq!(delivery.body, b"\"one\"");
        delivery.ack().await.unwrap();
        assert_eq!(broker.buffered("jobs"), 0);
    }

    #[tokio::test]
    async fn nack_requeue_redelivers_with_incremented_retry_count() {
        let broker = MemoryBroker::new();
        broker.declare_queue(&declaration("jobs")).await.unwrap();
        let rx = broker
            .consume("jobs", &ConsumerOptions::default())
            .await
            .unwrap();
        broker
            .publish("jobs", b"1", &PublishOptions::default())
            .await
            .unwrap();

        let first = rx.recv_async().await.unwrap();
        assert_eq!(first.properties.retry_count, 0);
        first.nack(true).await.unwrap();

        let second = rx.recv_async().await.unwrap();
        assert_eq!(second.body, b"1");
        assert_eq!(second.properties.retry_count, 1);
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_without_requeue_dead_letters() {
        let broker = MemoryBroker::new();
        broker.declare_queue(&declaration("jobs")).await.unwrap();
        let rx = broker
            .consume("jobs", &ConsumerOptions::default())
            .await
            .unwrap();
        let dlq = broker
            .consume("jobs.dlq", &ConsumerOptions::default())
            .await
            .unwrap();

        broker
            .publish("jobs", b"poison", &PublishOptions::default())
            .await
            .unwrap();
        rx.recv_async().await.unwrap().nack(false).await.unwrap();

        let dead = dlq.recv_async().await.unwrap();
        assert_eq!(dead.body, b"poison");
        assert!(rx.try_recv().is_err(), "must not return to the main queue");
        dead.ack().await.unwrap();
    }

    #[tokio::test]
    async fn unacked_delivery_survives_consumer_teardown() {
        let broker = MemoryBroker::new();
        broker.declare_queue(&declaration("jobs")).await.unwrap();
        let rx = broker
            .consume("jobs", &ConsumerOptions::default())
            .await
            .unwrap();
        broker
            .publish("jobs", b"kept", &PublishOptions::default())
            .await
            .unwrap();

        let delivery = rx.recv_async().await.unwrap();
        drop(delivery);
        drop(rx);

        let rx2 = broker
            .consume("jobs", &ConsumerOptions::default())
            .await
            .unwrap();
        let again = rx2.recv_async().await.unwrap();
        assert_eq!(again.body, b"kept");
        again.ack().await.unwrap();
    }

    #[tokio::test]
    async fn passive_assert_requires_a_declaration() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.assert_queue_passive("ghost").await,
            Err(QueueError::QueueMissing { .. })
        ));
        broker.declare_queue(&declaration("real")).await.unwrap();
        broker.assert_queue_passive("real").await.unwrap();
        broker.assert_queue_passive("real.dlq").await.unwrap();
    }
}
