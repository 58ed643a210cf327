//! Queue managers and the hub that caches them.
//!
//! A queue must have exactly one logical competing consumer; two
//! independent readers of the same queue would race for deliveries and
//! double-process. The hub therefore caches one manager per (normalized
//! name, consumer options) and the manager multicasts a single
//! broker-level consumer to any number of local subscribers. The broker
//! consumer is created on the first local subscription and torn down when
//! the last subscriber drops; unacknowledged messages simply remain
//! redeliverable across that gap.

use super::broker::{Broker, ConsumerOptions, Delivery, QueueDeclaration, QueueOptions};
use super::consumer::Envelope;
use super::naming::{dlq_name, normalize_queue_name};
use super::producer::Producer;
use super::QueueError;
use futures_util::Stream;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// One cached producer/consumer pair for a normalized queue name.
pub struct QueueManager {
    name: String,
    broker: Arc<dyn Broker>,
    consumer_options: ConsumerOptions,
    producer: Producer,
    subscribers: Mutex<FxHashMap<u64, flume::Sender<Delivery>>>,
    next_subscriber_id: AtomicU64,
    pump: Mutex<Option<Pump>>,
    pump_generation: AtomicU64,
    /// Serializes pump creation across concurrent first subscribers.
    subscribe_lock: tokio::sync::Mutex<()>,
}

/// Handle to the live pump task. The generation distinguishes a pump
/// detaching itself after its broker stream died from a newer pump that
/// has since taken the slot.
struct Pump {
    token: CancellationToken,
    generation: u64,
}

impl QueueManager {
    /// Declare the queue (and its dead-letter queue) authoritatively and
    /// build the manager. `name` must already be normalized.
    pub(crate) async fn new(
        broker: Arc<dyn Broker>,
        name: String,
        consumer_options: ConsumerOptions,
    ) -> Result<Arc<Self>, QueueError> {
        broker
            .declare_queue(&QueueDeclaration {
                queue: name.clone(),
                dead_letter_queue: dlq_name(&name),
                options: QueueOptions::default(),
            })
            .await?;
        Ok(Arc::new(Self {
            producer: Producer::new(Arc::clone(&broker), name.clone()),
            name,
            broker,
            consumer_options,
            subscribers: Mutex::new(FxHashMap::default()),
            next_subscriber_id: AtomicU64::new(0),
            pump: Mutex::new(None),
            pump_generation: AtomicU64::new(0),
            subscribe_lock: tokio::sync::Mutex::new(()),
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    /// Subscribe to the queue's deliveries, decoded as `T`.
    ///
    /// The first subscriber attaches the broker-level consumer; later
    /// subscribers share it. Deliveries are multicast, but clones share
    /// one acknowledgement, so exactly one subscriber may commit each.
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn subscribe<T: DeserializeOwned>(
        self: &Arc<Self>,
    ) -> Result<Subscription<T>, QueueError> {
        let _serial = self.subscribe_lock.lock().await;

        let (tx, rx) = flume::unbounded();
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().insert(id, tx);

        let pump_missing = self.pump.lock().is_none();
        if pump_missing {
            let deliveries = match self
                .broker
                .consume(&self.name, &self.consumer_options)
                .await
            {
                Ok(deliveries) => deliveries,
                Err(err) => {
                    self.subscribers.lock().remove(&id);
                    return Err(err);
                }
            };
            let token = CancellationToken::new();
            let generation = self.pump_generation.fetch_add(1, Ordering::Relaxed);
            *self.pump.lock() = Some(Pump {
                token: token.clone(),
                generation,
            });
            tokio::spawn(pump_loop(Arc::clone(self), deliveries, token, generation));
            debug!(queue = %self.name, "broker consumer attached");
        }

        Ok(Subscription {
            rx: rx.into_stream(),
            id,
            manager: Arc::clone(self),
            _marker: PhantomData,
        })
    }

    fn release(&self, id: u64) {
        let mut subscribers = self.subscribers.lock();
        subscribers.remove(&id);
        if subscribers.is_empty() {
            if let Some(pump) = self.pump.lock().take() {
                pump.token.cancel();
                debug!(queue = %self.name, "broker consumer torn down");
            }
        }
    }

    /// Stop the broker-level consumer regardless of live subscribers.
    pub(crate) fn teardown(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.token.cancel();
        }
    }

    /// Forget a pump whose broker stream died, then drop every
    /// subscriber sender so the attached subscriptions end instead of
    /// waiting on a stream that can no longer produce. Clearing the slot
    /// lets the next `subscribe` attach a fresh broker consumer. A
    /// generation mismatch means a newer pump already owns the slot and
    /// its subscribers must not be touched.
    fn detach_dead_pump(&self, generation: u64) {
        {
            let mut pump = self.pump.lock();
            match pump.as_ref() {
                Some(current) if current.generation == generation => *pump = None,
                _ => return,
            }
        }
        self.subscribers.lock().clear();
    }
}

/// Forward broker deliveries to every local subscriber until cancelled.
/// A delivery no subscriber accepts is dropped, which makes it
/// redeliverable. A broker stream death detaches the pump so live
/// subscriptions end and a later subscriber can reattach.
async fn pump_loop(
    manager: Arc<QueueManager>,
    deliveries: flume::Receiver<Delivery>,
    token: CancellationToken,
    generation: u64,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            () = token.cancelled() => break,
            received = deliveries.recv_async() => match received {
                Ok(delivery) => delivery,
                Err(_) => {
                    warn!(queue = %manager.name, "broker delivery stream died");
                    // Serialized against subscribe so an in-flight
                    // subscriber registration is not drained from under
                    // a pump it never belonged to.
                    let _serial = manager.subscribe_lock.lock().await;
                    manager.detach_dead_pump(generation);
                    return;
                }
            },
        };
        let senders: Vec<flume::Sender<Delivery>> =
            manager.subscribers.lock().values().cloned().collect();
        for sender in senders {
            let _ = sender.send(delivery.clone());
        }
    }
}

/// One local subscriber's view of a queue's deliveries.
///
/// Dropping the subscription unsubscribes; dropping the last one tears
/// down the broker-level consumer.
pub struct Subscription<T> {
    rx: flume::r#async::RecvStream<'static, Delivery>,
    id: u64,
    manager: Arc<QueueManager>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Stream for Subscription<T> {
    type Item = Envelope<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.rx).poll_next(cx) {
                Poll::Ready(Some(delivery)) => match Envelope::decode(delivery.clone()) {
                    Ok(envelope) => return Poll::Ready(Some(envelope)),
                    Err(err) => {
                        // Malformed payloads are dead-lettered, not
                        // redelivered forever.
                        warn!(queue = %self.manager.name, error = %err, "malformed message dead-lettered");
                        tokio::spawn(async move {
                            let _ = delivery.nack(false).await;
                        });
                    }
                },
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.manager.release(self.id);
    }
}

/// Process-wide cache of queue managers.
pub struct QueueHub {
    broker: Arc<dyn Broker>,
    managers: tokio::sync::Mutex<FxHashMap<(String, ConsumerOptions), Arc<QueueManager>>>,
}

impl QueueHub {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            managers: tokio::sync::Mutex::new(FxHashMap::default()),
        }
    }

    /// Manager for a logical queue name with default consumer options.
    pub async fn queue(&self, name: &str) -> Result<Arc<QueueManager>, QueueError> {
        self.queue_with(name, ConsumerOptions::default()).await
    }

    /// Manager for a logical queue name. Names normalize before lookup,
    /// so variants in casing and whitespace share one manager.
    pub async fn queue_with(
        &self,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<Arc<QueueManager>, QueueError> {
        let normalized = normalize_queue_name(name)?;
        let key = (normalized.clone(), options.clone());
        let mut managers = self.managers.lock().await;
        if let Some(manager) = managers.get(&key) {
            return Ok(Arc::clone(manager));
        }
        let manager = QueueManager::new(Arc::clone(&self.broker), normalized, options).await?;
        managers.insert(key, Arc::clone(&manager));
        Ok(manager)
    }

    /// Tear down every cached consumer and close the broker connection.
    pub async fn shutdown(&self) {
        let managers = self.managers.lock().await;
        for manager in managers.values() {
            manager.teardown();
        }
        drop(managers);
        self.broker.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBroker;

    #[tokio::test]
    async fn logical_name_variants_share_one_manager() {
        let hub = QueueHub::new(Arc::new(MemoryBroker::new()));
        let a = hub.queue("Foo Bar").await.unwrap();
        let b = hub.queue("foo-bar").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "foo-bar");
    }

    #[tokio::test]
    async fn differing_consumer_options_get_separate_managers() {
        let hub = QueueHub::new(Arc::new(MemoryBroker::new()));
        let a = hub.queue("jobs").await.unwrap();
        let b = hub
            .queue_with(
                "jobs",
                ConsumerOptions {
                    prefetch: Some(10),
                    ..ConsumerOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn dead_broker_stream_ends_subscriptions_and_frees_the_slot() {
        use futures_util::StreamExt;
        use serde_json::{json, Value};
        use std::time::Duration;
        use tokio::time::timeout;

        let broker = Arc::new(MemoryBroker::new());
        let hub = QueueHub::new(Arc::clone(&broker) as Arc<dyn Broker>);
        let manager = hub.queue("jobs").await.unwrap();
        let mut subscription = manager.subscribe::<Value>().await.unwrap();

        // A newer broker-level consumer supersedes the manager's,
        // ending the pump's delivery stream.
        let superseding = broker
            .consume("jobs", &ConsumerOptions::default())
            .await
            .unwrap();

        let ended = timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("subscription must end, not hang");
        assert!(ended.is_none());

        // The pump slot is free again: a fresh subscriber reattaches a
        // broker consumer and receives traffic.
        drop(superseding);
        let mut fresh = manager.subscribe::<Value>().await.unwrap();
        manager
            .producer()
            .next(&json!("after"), &crate::queue::PublishOptions::default())
            .await;
        let envelope = timeout(Duration::from_secs(2), fresh.next())
            .await
            .expect("reattached subscription must receive")
            .expect("stream ended unexpectedly");
        assert_eq!(envelope.message, json!("after"));
        envelope.ack().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_queue_name_is_rejected() {
        let hub = QueueHub::new(Arc::new(MemoryBroker::new()));
        assert!(matches!(
            hub.queue("???").await,
            Err(QueueError::InvalidQueueName { .. })
        ));
    }
}
