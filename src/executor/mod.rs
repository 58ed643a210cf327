//! Execution core.
//!
//! Drives a node (or recursively, a graph) through its state machine and
//! yields progress as a stream of node snapshots:
//!
//! ```text
//! pending → running → (emitting)* → {success | fail}
//! ```
//!
//! Handler errors become terminal `fail` snapshots carrying a
//! [`FlowError`]: errors are values on the stream, never panics or
//! `Err` results out of the core. The one exception is dispatch itself:
//! a missing handler, a structurally invalid graph, or re-executing a
//! frozen node are programmer errors raised synchronously from
//! [`Executor::execute`] before any stream exists.
//!
//! Each execution carries one cancellation signal. Dropping the returned
//! [`ExecutionStream`] cancels it, so abandoning a result stream also
//! aborts the in-flight handler; there is no detached work.

mod graph_driver;
mod subgraph;

pub use subgraph::GraphHandler;

use crate::ast::{AstNode, GraphError, WorkflowGraph};
use crate::errors::FlowError;
use crate::registry::{HandlerContext, HandlerRegistry, NodeHandler, RegistryError};
use crate::types::NodeState;
use futures_util::Stream;
use miette::Diagnostic;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::instrument;

/// Programmer errors raised synchronously at dispatch time.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    /// Completed nodes are immutable; re-execution must clone.
    #[error("node '{id}' is already terminal; use fresh_clone() to re-execute")]
    #[diagnostic(code(flowloom::executor::frozen_node))]
    FrozenNode { id: String },
}

/// Stream of node snapshots produced by one execution.
///
/// Terminates after a snapshot whose state is `success` or `fail`.
/// Dropping the stream cancels the execution.
#[derive(Debug)]
pub struct ExecutionStream {
    rx: flume::r#async::RecvStream<'static, AstNode>,
    cancellation: CancellationToken,
    _guard: DropGuard,
}

impl ExecutionStream {
    pub(crate) fn new(rx: flume::Receiver<AstNode>, cancellation: CancellationToken) -> Self {
        let guard = cancellation.clone().drop_guard();
        Self {
            rx: rx.into_stream(),
            cancellation,
            _guard: guard,
        }
    }

    /// The execution's cancellation token, for explicit cancellation
    /// while keeping the stream open to observe the terminal `fail`.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Drain the stream and return the terminal snapshot.
    pub async fn final_snapshot(mut self) -> Option<AstNode> {
        use futures_util::StreamExt;
        let mut last = None;
        while let Some(snapshot) = self.next().await {
            last = Some(snapshot);
        }
        last
    }
}

impl Stream for ExecutionStream {
    type Item = AstNode;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

/// Dispatches nodes and graphs through the registry.
///
/// Cheap to clone; clones share the registry and the root cancellation
/// token, so [`cancel_all`](Self::cancel_all) stops every execution
/// started from any clone.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<HandlerRegistry>,
    root: CancellationToken,
}

impl Executor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            root: CancellationToken::new(),
        }
    }

    /// Executor whose executions are children of an existing cancellation
    /// scope (used for nested graph execution).
    pub fn with_parent(registry: Arc<HandlerRegistry>, parent: CancellationToken) -> Self {
        Self {
            registry,
            root: parent,
        }
    }

    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Cancel every execution started from this executor.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    /// Execute a single node, yielding snapshots until terminal state.
    ///
    /// Raises [`ExecutorError`] synchronously for a missing handler or a
    /// frozen node; everything after that point is reported on the
    /// stream.
    #[instrument(skip(self, node), fields(node_id = %node.id, node_type = %node.node_type))]
    pub fn execute(&self, node: AstNode) -> Result<ExecutionStream, ExecutorError> {
        if node.is_frozen() {
            return Err(ExecutorError::FrozenNode { id: node.id });
        }
        let handler = self.registry.resolve(&node.node_type)?;
        let token = self.root.child_token();
        let (tx, rx) = flume::unbounded();
        let ctx = HandlerContext::new(
            node.id.clone(),
            token.clone(),
            tx.clone(),
            Arc::clone(&self.registry),
        );
        tokio::spawn(run_node(node, handler, ctx, tx, token.clone()));
        Ok(ExecutionStream::new(rx, token))
    }

    /// Execute a graph: snapshots of every contained node's progress,
    /// terminated by a snapshot of the graph itself.
    ///
    /// Validation and handler resolution for every contained node happen
    /// up front, so structural and registration mistakes surface here
    /// rather than mid-run.
    #[instrument(skip(self, graph), fields(graph_id = %graph.id, graph_name = %graph.name))]
    pub fn execute_graph(&self, graph: WorkflowGraph) -> Result<ExecutionStream, ExecutorError> {
        graph.validate()?;
        for node in &graph.nodes {
            self.registry.resolve(&node.node_type)?;
        }
        let token = self.root.child_token();
        let (tx, rx) = flume::unbounded();
        let driver = graph_driver::GraphDriver::new(
            graph,
            Arc::clone(&self.registry),
            token.clone(),
            tx,
        );
        tokio::spawn(driver.run());
        Ok(ExecutionStream::new(rx, token))
    }
}

/// Single-node state machine: running, handler body (racing the
/// cancellation signal), terminal snapshot.
async fn run_node(
    mut node: AstNode,
    handler: Arc<dyn NodeHandler>,
    ctx: HandlerContext,
    tx: flume::Sender<AstNode>,
    token: CancellationToken,
) {
    node.state = NodeState::Running;
    if tx.send(node.clone()).is_err() {
        // Caller dropped the stream before we started; nothing to do.
        return;
    }

    let result = tokio::select! {
        biased;
        () = token.cancelled() => Err(FlowError::cancelled()),
        res = handler.run(&mut node, &ctx) => res,
    };

    match result {
        Ok(()) => {
            node.state = NodeState::Success;
            node.error = None;
        }
        Err(err) => {
            if err.is_cancellation() {
                tracing::debug!(node_id = %node.id, "execution cancelled");
            } else {
                tracing::warn!(node_id = %node.id, error = %err.full_description(), "node failed");
            }
            node.state = NodeState::Fail;
            node.error = Some(err);
        }
    }
    let _ = tx.send(node);
}

/// Spawn a contained node on behalf of the graph driver; same state
/// machine, but snapshots flow to the driver instead of the caller.
pub(crate) fn spawn_child(
    node: AstNode,
    handler: Arc<dyn NodeHandler>,
    registry: Arc<HandlerRegistry>,
    parent: &CancellationToken,
) -> flume::Receiver<AstNode> {
    let token = parent.child_token();
    let (tx, rx) = flume::unbounded();
    let ctx = HandlerContext::new(node.id.clone(), token.clone(), tx.clone(), registry);
    tokio::spawn(run_node(node, handler, ctx, tx, token));
    rx
}
