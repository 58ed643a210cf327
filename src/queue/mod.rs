//! Queue abstraction.
//!
//! Producers and consumers talk to a [`Broker`] seam rather than a
//! broker client directly. [`AmqpBroker`] implements it over AMQP 0.9.1
//! with a pooled connection; [`MemoryBroker`] implements the same
//! acknowledgement and dead-letter semantics in-process. The [`QueueHub`]
//! caches one [`QueueManager`] per normalized queue name so a queue never
//! ends up with two competing local consumers.

mod amqp;
mod broker;
mod consumer;
mod manager;
mod memory;
pub mod naming;
mod pool;
mod producer;

pub use amqp::AmqpBroker;
pub use broker::{
    Acker, Broker, ConsumerOptions, Delivery, DeliveryProperties, PublishOptions,
    QueueDeclaration, QueueOptions,
};
pub use consumer::{AckHandle, Envelope, EnvelopeMetadata};
pub use manager::{QueueHub, QueueManager, Subscription};
pub use memory::MemoryBroker;
pub use naming::{dlq_name, normalize_queue_name};
pub use pool::ConnectionPool;
pub use producer::{BatchReport, Producer};

use miette::Diagnostic;
use thiserror::Error;

/// Errors of the queue layer.
///
/// Naming and acknowledgement misuse are programmer errors; the rest are
/// transport conditions.
#[derive(Debug, Error, Diagnostic)]
pub enum QueueError {
    #[error("queue name '{raw}' is empty after normalization")]
    #[diagnostic(
        code(flowloom::queue::invalid_name),
        help("queue names must contain at least one of [A-Za-z0-9._-]")
    )]
    InvalidQueueName { raw: String },

    #[error("queue '{queue}' does not exist")]
    #[diagnostic(
        code(flowloom::queue::missing),
        help("a consumer must declare the queue before producers publish to it")
    )]
    QueueMissing { queue: String },

    #[error("delivery was already acknowledged")]
    #[diagnostic(code(flowloom::queue::already_acked))]
    AlreadyAcked,

    #[error("failed to connect to the broker")]
    #[diagnostic(
        code(flowloom::queue::connect),
        help("check the broker URL and that the broker is reachable")
    )]
    Connect {
        #[source]
        source: lapin::Error,
    },

    #[error("broker operation failed")]
    #[diagnostic(code(flowloom::queue::transport))]
    Transport(#[from] lapin::Error),

    #[error("message payload is not valid JSON")]
    #[diagnostic(code(flowloom::queue::decode))]
    Decode(#[from] serde_json::Error),
}
