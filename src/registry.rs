//! Handler registry: node-type identity to executor function.
//!
//! Handlers are registered explicitly at startup in a plain table; there
//! is no annotation scanning or runtime reflection. Dispatching a node
//! type with no registered handler is a programmer error raised
//! synchronously before any stream is created, never an error value on
//! the result stream.

use crate::ast::AstNode;
use crate::errors::FlowError;
use crate::types::{NodeState, NodeType};
use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised when using [`HandlerContext`] methods.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerContextError {
    /// Snapshot could not be delivered because the result stream is gone.
    #[error("failed to emit snapshot: result stream disconnected")]
    #[diagnostic(
        code(flowloom::handler::stream_disconnected),
        help("the execution stream was dropped; the handler should observe cancellation and stop")
    )]
    StreamDisconnected,
}

/// Registry-level programmer errors.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("no handler registered for node type '{node_type}'")]
    #[diagnostic(
        code(flowloom::registry::handler_missing),
        help("register a handler for this type before submitting graphs that use it")
    )]
    HandlerMissing { node_type: NodeType },
}

/// Execution context passed to handlers.
///
/// Carries the cancellation signal, the snapshot channel used for
/// intermediate `emitting` broadcasts, and the registry itself so graph
/// nodes can dispatch their contained nodes recursively.
#[derive(Clone)]
pub struct HandlerContext {
    /// Identifier of the node being executed.
    pub node_id: String,
    /// Cancellation signal for this execution. Handlers must check it at
    /// asynchronous resumption points and terminate promptly.
    pub cancellation: CancellationToken,
    snapshot_tx: flume::Sender<AstNode>,
    registry: Arc<HandlerRegistry>,
}

impl HandlerContext {
    pub(crate) fn new(
        node_id: String,
        cancellation: CancellationToken,
        snapshot_tx: flume::Sender<AstNode>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            node_id,
            cancellation,
            snapshot_tx,
            registry,
        }
    }

    /// Update one of the node's reactive outputs mid-execution.
    ///
    /// Moves the node to `emitting`, pushes the value through the
    /// property's broadcast slot, and re-broadcasts a snapshot to the
    /// caller's result stream.
    pub fn emit(
        &self,
        node: &mut AstNode,
        property: impl Into<String>,
        value: Value,
    ) -> Result<(), HandlerContextError> {
        node.emit(property, value);
        node.state = NodeState::Emitting;
        self.snapshot_tx
            .send(node.clone())
            .map_err(|_| HandlerContextError::StreamDisconnected)
    }

    /// The registry this execution dispatches through; used by the graph
    /// handler to run contained nodes.
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Convenience: `true` once the execution's cancellation fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// The function registered to execute a specific node type.
///
/// Handlers mutate only the node they are handed, report intermediate
/// output updates through [`HandlerContext::emit`], and return errors as
/// values; the execution core turns an `Err` into a terminal `fail`
/// state with the error attached.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError>;
}

impl std::fmt::Debug for dyn NodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NodeHandler")
    }
}

/// Mapping from node-type tag to executor, populated by explicit
/// registration calls at startup.
///
/// # Examples
///
/// ```
/// use flowloom::registry::HandlerRegistry;
///
/// let registry = HandlerRegistry::with_builtins();
/// assert!(registry.get(&"switch".into()).is_some());
/// assert!(registry.get(&"nonexistent".into()).is_none());
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Registry pre-populated with the built-in routing nodes and the
    /// nested-graph handler.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(NodeType::If, Arc::new(crate::nodes::IfHandler))
            .register(NodeType::Switch, Arc::new(crate::nodes::SwitchHandler))
            .register(NodeType::Merge, Arc::new(crate::nodes::MergeHandler))
            .register(NodeType::Filter, Arc::new(crate::nodes::FilterHandler))
            .register(
                NodeType::LoopAccumulator,
                Arc::new(crate::nodes::LoopAccumulatorHandler),
            )
            .register(NodeType::Graph, Arc::new(crate::executor::GraphHandler));
        registry
    }

    /// Register a handler for a node type. Later registrations replace
    /// earlier ones, which keeps startup wiring order-independent for
    /// overrides.
    pub fn register(&mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) -> &mut Self {
        self.handlers.insert(node_type, handler);
        self
    }

    /// Builder-style registration for fluent startup wiring.
    #[must_use]
    pub fn with_handler(mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) -> Self {
        self.register(node_type, handler);
        self
    }

    pub fn get(&self, node_type: &NodeType) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node_type).cloned()
    }

    /// Resolve or raise the programmer error for a missing handler.
    pub fn resolve(&self, node_type: &NodeType) -> Result<Arc<dyn NodeHandler>, RegistryError> {
        self.get(node_type).ok_or_else(|| RegistryError::HandlerMissing {
            node_type: node_type.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl NodeHandler for NoopHandler {
        async fn run(&self, _node: &mut AstNode, _ctx: &HandlerContext) -> Result<(), FlowError> {
            Ok(())
        }
    }

    #[test]
    fn resolve_missing_handler_is_a_registry_error() {
        let registry = HandlerRegistry::new();
        let err = registry.resolve(&"ghost".into()).unwrap_err();
        assert!(matches!(err, RegistryError::HandlerMissing { .. }));
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut registry = HandlerRegistry::new();
        registry.register("step".into(), Arc::new(NoopHandler));
        let first = registry.get(&"step".into()).unwrap();
        registry.register("step".into(), Arc::new(NoopHandler));
        let second = registry.get(&"step".into()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn builtins_cover_all_routing_types() {
        let registry = HandlerRegistry::with_builtins();
        for t in ["if", "switch", "merge", "filter", "loop", "graph"] {
            assert!(registry.get(&t.into()).is_some(), "missing builtin {t}");
        }
    }
}
