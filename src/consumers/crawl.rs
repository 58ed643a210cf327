//! Crawl task processing.
//!
//! A crawl task names one logical resource and up to two dependent
//! sub-resources; all of them are fetched before the task's concurrency
//! slot frees. The actual fetch stays behind [`ResourceFetcher`], so the
//! pipeline semantics are testable without network access.

use super::TaskProcessor;
use crate::errors::FlowError;
use crate::queue::EnvelopeMetadata;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

/// Dependent sub-resources a single task may carry.
pub const MAX_SUB_RESOURCES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlTask {
    pub url: String,
    #[serde(default)]
    pub sub_resources: Vec<String>,
}

#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Value, FlowError>;
}

pub struct CrawlProcessor<F> {
    fetcher: F,
}

impl<F: ResourceFetcher> CrawlProcessor<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl<F: ResourceFetcher> TaskProcessor for CrawlProcessor<F> {
    type Task = CrawlTask;

    async fn process(
        &self,
        task: CrawlTask,
        metadata: &EnvelopeMetadata,
    ) -> Result<(), FlowError> {
        let wrap = |url: &str, err: FlowError| {
            FlowError::named("CrawlError", format!("fetch of '{url}' failed")).with_cause(err)
        };

        self.fetcher
            .fetch(&task.url)
            .await
            .map_err(|err| wrap(&task.url, err))?;

        let mut fetched_subs = 0usize;
        for sub in task.sub_resources.iter().take(MAX_SUB_RESOURCES) {
            self.fetcher
                .fetch(sub)
                .await
                .map_err(|err| wrap(sub, err))?;
            fetched_subs += 1;
        }

        info!(
            url = %task.url,
            sub_resources = fetched_subs,
            message_id = ?metadata.message_id,
            "crawl task completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingFetcher {
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl ResourceFetcher for RecordingFetcher {
        async fn fetch(&self, url: &str) -> Result<Value, FlowError> {
            self.calls.lock().push(url.to_string());
            if self.fail_on.as_deref() == Some(url) {
                return Err(FlowError::non_retriable("resource gone").with_status(410));
            }
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn fetches_main_resource_then_capped_sub_resources() {
        let processor = CrawlProcessor::new(RecordingFetcher {
            calls: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let task = CrawlTask {
            url: "a".into(),
            sub_resources: vec!["b".into(), "c".into(), "d".into()],
        };
        processor
            .process(task, &EnvelopeMetadata::default())
            .await
            .unwrap();
        assert_eq!(*processor.fetcher.calls.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn sub_resource_failure_keeps_the_cause_chain() {
        let processor = CrawlProcessor::new(RecordingFetcher {
            calls: Mutex::new(Vec::new()),
            fail_on: Some("b".into()),
        });
        let task = CrawlTask {
            url: "a".into(),
            sub_resources: vec!["b".into()],
        };
        let err = processor
            .process(task, &EnvelopeMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.name, "CrawlError");
        assert!(err.is_non_retriable());
        assert_eq!(err.deepest().status_code, Some(410));
    }
}
