//! Task consumers built on the queue layer.
//!
//! A [`TaskPipeline`] wires a queue subscription through a trace stage, a
//! bounded-concurrency processing stage, and an outer retry stage that
//! re-subscribes the whole pipeline when the stream machinery itself
//! fails. Acknowledgement policy is fixed: ack on success, nack without
//! requeue on a business failure the processor already reported.

mod crawl;

pub use crawl::{CrawlProcessor, CrawlTask, ResourceFetcher, MAX_SUB_RESOURCES};

use crate::errors::FlowError;
use crate::queue::{EnvelopeMetadata, QueueManager};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Business logic applied to each consumed task.
///
/// Returning `Err` means the task failed and goes to the dead-letter
/// queue; the processor is expected to have logged whatever context it
/// has. Processors must be idempotent with respect to redelivery.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    type Task: DeserializeOwned + Send + 'static;

    async fn process(&self, task: Self::Task, metadata: &EnvelopeMetadata)
        -> Result<(), FlowError>;
}

#[async_trait]
impl<P: TaskProcessor + ?Sized> TaskProcessor for Arc<P> {
    type Task = P::Task;

    async fn process(
        &self,
        task: Self::Task,
        metadata: &EnvelopeMetadata,
    ) -> Result<(), FlowError> {
        (**self).process(task, metadata).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Tasks in flight at once. A task's own dependent I/O completes
    /// before its slot frees.
    pub concurrency: usize,
    /// Times the whole pipeline re-subscribes after a stream failure.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct TaskPipeline<P: TaskProcessor> {
    manager: Arc<QueueManager>,
    processor: Arc<P>,
    config: PipelineConfig,
}

impl<P: TaskProcessor + 'static> TaskPipeline<P> {
    pub fn new(manager: Arc<QueueManager>, processor: P, config: PipelineConfig) -> Self {
        Self {
            manager,
            processor: Arc::new(processor),
            config,
        }
    }

    /// Consume until the retry budget is exhausted.
    ///
    /// A healthy pipeline never returns: each pass processes deliveries
    /// until the underlying stream fails, then re-subscribes after
    /// `retry_delay`. Non-retriable errors short-circuit the budget.
    #[instrument(skip(self), fields(queue = %self.manager.name()))]
    pub async fn run(&self) -> Result<(), FlowError> {
        let mut attempt = 0u32;
        loop {
            let err = self.run_once().await;
            if err.is_non_retriable() || attempt >= self.config.retries {
                error!(error = %err.full_description(), "pipeline giving up");
                return Err(err);
            }
            attempt += 1;
            warn!(
                attempt,
                error = %err.full_description(),
                "pipeline stream failed, re-subscribing"
            );
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    /// One subscription pass. Only returns when subscribing fails or the
    /// subscription stream ends, both failures from the pipeline's point
    /// of view.
    async fn run_once(&self) -> FlowError {
        let subscription = match self.manager.subscribe::<P::Task>().await {
            Ok(subscription) => subscription,
            Err(err) => return FlowError::from_std(&err),
        };

        subscription
            .for_each_concurrent(Some(self.config.concurrency), |envelope| {
                let processor = Arc::clone(&self.processor);
                async move {
                    let (task, metadata, handle) = envelope.into_parts();
                    debug!(message_id = ?metadata.message_id, retry_count = metadata.retry_count, "task received");
                    match processor.process(task, &metadata).await {
                        Ok(()) => {
                            if let Err(err) = handle.ack().await {
                                warn!(error = %err, "ack failed");
                            }
                        }
                        Err(err) => {
                            error!(error = %err.full_description(), "task failed, dead-lettering");
                            if let Err(nack_err) = handle.nack(false).await {
                                warn!(error = %nack_err, "nack failed");
                            }
                        }
                    }
                }
            })
            .await;

        FlowError::named("StreamError", "consumer stream ended unexpectedly")
    }
}
