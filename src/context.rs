//! Process-wide orchestration context.
//!
//! One [`Orchestrator`] per process owns the handler registry, the
//! broker connection (through the [`QueueHub`]), and the executor. It is
//! constructed explicitly and passed where needed; there are no
//! module-level singletons. `shutdown` is the one place teardown
//! happens: executions are cancelled, consumers detach, and the broker
//! connection closes.

use crate::config::EngineConfig;
use crate::executor::Executor;
use crate::queue::{AmqpBroker, Broker, QueueHub};
use crate::registry::HandlerRegistry;
use crate::remote::RemoteBridge;
use std::sync::Arc;
use tracing::info;

pub struct Orchestrator {
    registry: Arc<HandlerRegistry>,
    executor: Executor,
    hub: QueueHub,
    remote: Option<RemoteBridge>,
}

impl Orchestrator {
    /// Standard process wiring: AMQP broker from the configured URL and
    /// the built-in handler registry.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(AmqpBroker::new(config.broker_url.clone())),
            Arc::new(HandlerRegistry::with_builtins()),
        )
    }

    /// Wiring with explicit broker and registry, used by tests (memory
    /// broker) and embedders with custom handlers.
    pub fn with_parts(
        config: &EngineConfig,
        broker: Arc<dyn Broker>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let executor = Executor::new(Arc::clone(&registry));
        let remote = config
            .remote_endpoint
            .as_ref()
            .map(|endpoint| RemoteBridge::new(endpoint.clone()));
        Self {
            registry,
            executor,
            hub: QueueHub::new(broker),
            remote,
        }
    }

    #[must_use]
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    #[must_use]
    pub fn queues(&self) -> &QueueHub {
        &self.hub
    }

    /// Bridge to the remote execution server, when one is configured.
    #[must_use]
    pub fn remote(&self) -> Option<&RemoteBridge> {
        self.remote.as_ref()
    }

    /// Graceful teardown: cancel in-flight executions, detach consumers,
    /// close the broker connection.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.executor.cancel_all();
        self.hub.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryBroker;

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let config = EngineConfig::new("amqp://unused");
        let orchestrator = Orchestrator::with_parts(
            &config,
            Arc::new(MemoryBroker::new()),
            Arc::new(HandlerRegistry::with_builtins()),
        );
        orchestrator.shutdown().await;
        orchestrator.shutdown().await;
    }
}
