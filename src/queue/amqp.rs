//! AMQP 0.9.1 implementation of the broker seam.
//!
//! Queue declaration wires the dead-letter route through broker
//! arguments (`x-dead-letter-exchange`/`x-dead-letter-routing-key`), so
//! `nack(requeue = false)` dead-letters server-side with no extra code
//! on this side of the wire.

use super::broker::{
    Acker, Broker, ConsumerOptions, Delivery, DeliveryProperties, PublishOptions, QueueDeclaration,
};
use super::pool::ConnectionPool;
use super::QueueError;
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::BasicProperties;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub struct AmqpBroker {
    pool: ConnectionPool,
}

impl AmqpBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            pool: ConnectionPool::new(url),
        }
    }

    pub fn with_pool(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    #[instrument(skip(self), fields(queue = %declaration.queue))]
    async fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), QueueError> {
        let channel = self.pool.wait_for_connection().await?;
        let options = QueueDeclareOptions {
            durable: declaration.options.durable,
            ..QueueDeclareOptions::default()
        };

        channel
            .queue_declare(&declaration.dead_letter_queue, options, FieldTable::default())
            .await?;

        let mut arguments = FieldTable::default();
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from("")),
        );
        arguments.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(declaration.dead_letter_queue.as_str())),
        );
        channel
            .queue_declare(&declaration.queue, options, arguments)
            .await?;
        debug!("queue declared");
        Ok(())
    }

    async fn assert_queue_passive(&self, queue: &str) -> Result<(), QueueError> {
        let channel = self.pool.wait_for_connection().await?;
        let options = QueueDeclareOptions {
            passive: true,
            ..QueueDeclareOptions::default()
        };
        channel
            .queue_declare(queue, options, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        options: &PublishOptions,
    ) -> Result<(), QueueError> {
        let channel = self.pool.wait_for_connection().await?;

        let mut properties =
            BasicProperties::default().with_delivery_mode(if options.persistent { 2 } else { 1 });
        if let Some(priority) = options.priority {
            properties = properties.with_priority(priority);
        }
        if let Some(expiration_ms) = options.expiration_ms {
            properties = properties.with_expiration(ShortString::from(expiration_ms.to_string()));
        }
        if let Some(message_id) = &options.message_id {
            properties = properties.with_message_id(ShortString::from(message_id.as_str()));
        }
        if let Some(correlation_id) = &options.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.as_str()));
        }
        if let Some(timestamp) = options.timestamp {
            properties = properties.with_timestamp(timestamp);
        }

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, options), fields(queue = %queue))]
    async fn consume(
        &self,
        queue: &str,
        options: &ConsumerOptions,
    ) -> Result<flume::Receiver<Delivery>, QueueError> {
        let channel = self.pool.wait_for_connection().await?;
        if let Some(prefetch) = options.prefetch {
            channel.basic_qos(prefetch, BasicQosOptions::default()).await?;
        }

        let tag = format!("flowloom-{}", Uuid::new_v4());
        let consume_options = BasicConsumeOptions {
            no_ack: !options.manual_ack,
            ..BasicConsumeOptions::default()
        };
        let mut consumer = channel
            .basic_consume(queue, &tag, consume_options, FieldTable::default())
            .await?;

        let (tx, rx) = flume::unbounded();
        tokio::spawn(async move {
            while let Some(item) = consumer.next().await {
                match item {
                    Ok(delivery) => {
                        let forwarded = Delivery::new(
                            delivery.data.clone(),
                            properties_of(&delivery),
                            Box::new(AmqpAcker {
                                acker: delivery.acker,
                            }),
                        );
                        if tx.send_async(forwarded).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "broker consumer stream failed");
                        break;
                    }
                }
            }
            // The local side is gone; cancel so unacked messages
            // redeliver instead of sitting on a dead consumer.
            if let Err(err) = channel.basic_cancel(&tag, BasicCancelOptions::default()).await {
                warn!(error = %err, "consumer cancel failed");
            }
        });
        Ok(rx)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn properties_of(delivery: &lapin::message::Delivery) -> DeliveryProperties {
    let props = &delivery.properties;
    let mut headers = FxHashMap::default();
    if let Some(table) = props.headers() {
        for (key, value) in table.inner() {
            headers.insert(key.to_string(), amqp_value_to_json(value));
        }
    }
    DeliveryProperties {
        message_id: props.message_id().as_ref().map(|s| s.to_string()),
        correlation_id: props.correlation_id().as_ref().map(|s| s.to_string()),
        timestamp: *props.timestamp(),
        priority: *props.priority(),
        retry_count: u32::from(delivery.redelivered),
        headers,
    }
}

fn amqp_value_to_json(value: &AMQPValue) -> Value {
    match value {
        AMQPValue::Boolean(b) => Value::Bool(*b),
        AMQPValue::ShortShortInt(n) => Value::from(*n),
        AMQPValue::ShortShortUInt(n) => Value::from(*n),
        AMQPValue::ShortInt(n) => Value::from(*n),
        AMQPValue::ShortUInt(n) => Value::from(*n),
        AMQPValue::LongInt(n) => Value::from(*n),
        AMQPValue::LongUInt(n) => Value::from(*n),
        AMQPValue::LongLongInt(n) => Value::from(*n),
        AMQPValue::Float(n) => Value::from(*n),
        AMQPValue::Double(n) => Value::from(*n),
        AMQPValue::ShortString(s) => Value::from(s.as_str()),
        AMQPValue::LongString(s) => {
            Value::from(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        AMQPValue::Timestamp(t) => Value::from(*t),
        _ => Value::Null,
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), QueueError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await?;
        Ok(())
    }
}
