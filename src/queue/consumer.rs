//! Consumer-side envelopes.
//!
//! A delivery reaches application code as an [`Envelope`]: the decoded
//! message plus broker metadata plus the acknowledgement decision. In the
//! default manual-ack mode nothing counts as processed until the handler
//! commits with `ack()` or `nack(requeue)`.

use super::broker::{Delivery, DeliveryProperties};
use super::QueueError;
use serde::de::DeserializeOwned;

/// Broker metadata of one consumed message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvelopeMetadata {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Epoch milliseconds, when the publisher stamped one.
    pub timestamp: Option<u64>,
    /// Times this message has been redelivered after a requeue.
    pub retry_count: u32,
}

impl From<&DeliveryProperties> for EnvelopeMetadata {
    fn from(properties: &DeliveryProperties) -> Self {
        Self {
            message_id: properties.message_id.clone(),
            correlation_id: properties.correlation_id.clone(),
            timestamp: properties.timestamp,
            retry_count: properties.retry_count,
        }
    }
}

/// A decoded delivery awaiting its acknowledgement decision.
pub struct Envelope<T> {
    pub message: T,
    pub metadata: EnvelopeMetadata,
    delivery: Delivery,
}

impl<T: DeserializeOwned> Envelope<T> {
    pub(crate) fn decode(delivery: Delivery) -> Result<Self, QueueError> {
        let message: T = serde_json::from_slice(&delivery.body)?;
        let metadata = EnvelopeMetadata::from(&delivery.properties);
        Ok(Self {
            message,
            metadata,
            delivery,
        })
    }
}

impl<T> Envelope<T> {
    /// Commit: the message is processed and must not be redelivered.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.delivery.ack().await
    }

    /// Reject: `requeue` re-presents the same message; `false` routes it
    /// to the dead-letter queue.
    pub async fn nack(self, requeue: bool) -> Result<(), QueueError> {
        self.delivery.nack(requeue).await
    }

    /// Split the message from the acknowledgement handle so processing
    /// can consume the message and still commit afterwards.
    pub fn into_parts(self) -> (T, EnvelopeMetadata, AckHandle) {
        (
            self.message,
            self.metadata,
            AckHandle {
                delivery: self.delivery,
            },
        )
    }
}

/// Acknowledgement handle detached from its message.
pub struct AckHandle {
    delivery: Delivery,
}

impl AckHandle {
    pub async fn ack(self) -> Result<(), QueueError> {
        self.delivery.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), QueueError> {
        self.delivery.nack(requeue).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::broker::{Acker, DeliveryProperties};
    use async_trait::async_trait;

    struct NoopAcker;

    #[async_trait]
    impl Acker for NoopAcker {
        async fn ack(self: Box<Self>) -> Result<(), QueueError> {
            Ok(())
        }

        async fn nack(self: Box<Self>, _requeue: bool) -> Result<(), QueueError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn decode_carries_message_and_metadata() {
        let properties = DeliveryProperties {
            message_id: Some("m-1".into()),
            retry_count: 2,
            ..DeliveryProperties::default()
        };
        let delivery = Delivery::new(br#"{"url":"u"}"#.to_vec(), properties, Box::new(NoopAcker));
        let envelope: Envelope<serde_json::Value> = Envelope::decode(delivery).unwrap();
        assert_eq!(envelope.message["url"], "u");
        assert_eq!(envelope.metadata.message_id.as_deref(), Some("m-1"));
        assert_eq!(envelope.metadata.retry_count, 2);
        envelope.ack().await.unwrap();
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        let delivery = Delivery::new(
            b"not json".to_vec(),
            DeliveryProperties::default(),
            Box::new(NoopAcker),
        );
        assert!(Envelope::<serde_json::Value>::decode(delivery).is_err());
    }
}
