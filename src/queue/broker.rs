//! The broker seam.
//!
//! [`Broker`] is the minimal surface the rest of the queue layer needs
//! from a message broker: declare, passively assert, publish, consume.
//! [`AmqpBroker`](super::AmqpBroker) implements it over a real broker;
//! [`MemoryBroker`](super::MemoryBroker) implements the same ack, nack,
//! and dead-letter semantics in-process for tests and local development.

use super::QueueError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

/// Parameters of an authoritative queue declaration.
///
/// Declaring a queue also declares its dead-letter queue and wires
/// rejected messages to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub queue: String,
    pub dead_letter_queue: String,
    pub options: QueueOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Queue survives broker restarts.
    pub durable: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { durable: true }
    }
}

/// Per-message publish options carried as broker message properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Message survives broker restarts. Defaults to true.
    pub persistent: bool,
    pub priority: Option<u8>,
    /// Time-to-live in milliseconds; transmitted as a string on the wire.
    pub expiration_ms: Option<u64>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: Option<u64>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            priority: None,
            expiration_ms: None,
            message_id: None,
            correlation_id: None,
            timestamp: None,
        }
    }
}

/// Options of a broker-level consumer. Part of the queue-manager cache
/// key, so it must hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerOptions {
    /// Deliveries require an explicit `ack`/`nack` decision. Defaults to
    /// true; automatic acknowledgement is opt-in.
    pub manual_ack: bool,
    /// Maximum unacknowledged deliveries in flight per consumer.
    pub prefetch: Option<u16>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            manual_ack: true,
            prefetch: None,
        }
    }
}

/// Broker-assigned metadata of one delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryProperties {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub timestamp: Option<u64>,
    pub priority: Option<u8>,
    /// Times this message was redelivered after a requeue.
    pub retry_count: u32,
    /// Broker headers not covered by the named fields.
    pub headers: FxHashMap<String, Value>,
}

/// Acknowledgement half of a delivery, implemented per broker.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), QueueError>;
}

/// One message delivered to a consumer.
///
/// Clones share the acknowledgement: exactly one `ack`/`nack` is allowed
/// per delivery, a second attempt is [`QueueError::AlreadyAcked`].
#[derive(Clone)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub properties: DeliveryProperties,
    acker: Arc<Mutex<Option<Box<dyn Acker>>>>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, properties: DeliveryProperties, acker: Box<dyn Acker>) -> Self {
        Self {
            body,
            properties,
            acker: Arc::new(Mutex::new(Some(acker))),
        }
    }

    fn take_acker(&self) -> Result<Box<dyn Acker>, QueueError> {
        self.acker.lock().take().ok_or(QueueError::AlreadyAcked)
    }

    /// Commit this delivery as processed.
    pub async fn ack(&self) -> Result<(), QueueError> {
        self.take_acker()?.ack().await
    }

    /// Reject this delivery. `requeue` re-presents the same message to
    /// the queue; `false` routes it to the dead-letter queue.
    pub async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.take_acker()?.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("body_len", &self.body.len())
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Minimal broker surface used by producers, consumers, and the queue
/// manager.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Authoritative declaration: creates the queue, its dead-letter
    /// queue, and the rejection route between them. Idempotent for
    /// identical parameters.
    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), QueueError>;

    /// Assert the queue exists without setting any parameters. Producers
    /// use this so they never conflict with a consumer's authoritative
    /// declaration.
    async fn assert_queue_passive(&self, queue: &str) -> Result<(), QueueError>;

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        options: &PublishOptions,
    ) -> Result<(), QueueError>;

    /// Attach the broker-level consumer for a queue. A later `consume`
    /// on the same queue supersedes the earlier one; the superseded
    /// delivery stream ends.
    async fn consume(
        &self,
        queue: &str,
        options: &ConsumerOptions,
    ) -> Result<flume::Receiver<Delivery>, QueueError>;

    /// Graceful teardown of the broker connection, if any.
    async fn close(&self) {}
}
