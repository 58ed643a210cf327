//! Queue producer.
//!
//! `next` is fire-and-forget: a publish failure is logged, never raised,
//! because producers sit on hot paths that must not stall on broker
//! hiccups. `next_batch` keeps per-item accounting for callers that need
//! to know what made it out.

use super::broker::{Broker, PublishOptions};
use super::QueueError;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error};

/// Outcome of a [`Producer::next_batch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub success_count: usize,
    pub failure_count: usize,
    /// Indices into the input slice of the messages that failed.
    pub failed_indices: Vec<usize>,
    pub total_time_ms: u64,
}

pub struct Producer {
    broker: Arc<dyn Broker>,
    queue: String,
    asserted: AtomicBool,
}

impl Producer {
    pub(crate) fn new(broker: Arc<dyn Broker>, queue: String) -> Self {
        Self {
            broker,
            queue,
            asserted: AtomicBool::new(false),
        }
    }

    /// Normalized queue this producer publishes to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Passively assert the queue exists, once per producer. Passive so a
    /// producer never conflicts with the consumer's authoritative
    /// declaration parameters.
    async fn ensure_asserted(&self) -> Result<(), QueueError> {
        if self.asserted.load(Ordering::Acquire) {
            return Ok(());
        }
        self.broker.assert_queue_passive(&self.queue).await?;
        self.asserted.store(true, Ordering::Release);
        Ok(())
    }

    async fn send<T: Serialize>(
        &self,
        message: &T,
        options: &PublishOptions,
    ) -> Result<(), QueueError> {
        self.ensure_asserted().await?;
        let body = serde_json::to_vec(message)?;
        let mut options = options.clone();
        if options.timestamp.is_none() {
            options.timestamp = Some(chrono::Utc::now().timestamp_millis() as u64);
        }
        self.broker.publish(&self.queue, &body, &options).await
    }

    /// Publish one message, fire-and-forget. Failures are logged with the
    /// queue name and swallowed. Messages without an explicit timestamp
    /// are stamped with the publish time.
    pub async fn next<T: Serialize>(&self, message: &T, options: &PublishOptions) {
        match self.send(message, options).await {
            Ok(()) => debug!(queue = %self.queue, "message published"),
            Err(err) => error!(queue = %self.queue, error = %err, "publish failed"),
        }
    }

    /// Publish a batch with per-item accounting.
    pub async fn next_batch<T: Serialize>(
        &self,
        messages: &[T],
        options: &PublishOptions,
    ) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::default();
        for (index, message) in messages.iter().enumerate() {
            match self.send(message, options).await {
                Ok(()) => report.success_count += 1,
                Err(err) => {
                    error!(queue = %self.queue, index, error = %err, "batch publish failed");
                    report.failure_count += 1;
                    report.failed_indices.push(index);
                }
            }
        }
        report.total_time_ms = started.elapsed().as_millis() as u64;
        report
    }
}
