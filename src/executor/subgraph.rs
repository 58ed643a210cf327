//! Nested graph execution.
//!
//! A node of type `graph` carries a serialized [`WorkflowGraph`] in its
//! `graph` input. Its handler recovers the graph, runs it through a
//! child executor under the same cancellation scope, and re-emits the
//! finished graph's outputs as the node's own reactive outputs.

use super::Executor;
use crate::ast::{AstNode, WorkflowGraph};
use crate::errors::FlowError;
use crate::registry::{HandlerContext, NodeHandler};
use crate::types::NodeState;
use async_trait::async_trait;
use futures_util::StreamExt;

pub struct GraphHandler;

#[async_trait]
impl NodeHandler for GraphHandler {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError> {
        let graph = WorkflowGraph::from_node(node)
            .map_err(|err| FlowError::named("GraphError", err.to_string()))?;
        let graph_id = graph.id.clone();

        let executor = Executor::with_parent(ctx.registry(), ctx.cancellation.clone());
        let mut stream = executor
            .execute_graph(graph)
            .map_err(|err| FlowError::named("GraphError", err.to_string()))?;

        let mut terminal = None;
        while let Some(snapshot) = stream.next().await {
            if snapshot.id == graph_id && snapshot.state.is_terminal() {
                terminal = Some(snapshot);
            }
        }

        match terminal {
            Some(snapshot) if snapshot.state == NodeState::Success => {
                for (property, value) in snapshot.outputs {
                    ctx.emit(node, property, value)
                        .map_err(|err| FlowError::named("StreamError", err.to_string()))?;
                }
                Ok(())
            }
            Some(snapshot) => Err(snapshot
                .error
                .unwrap_or_else(|| FlowError::msg("embedded graph failed"))),
            None => Err(FlowError::msg("embedded graph produced no terminal state")),
        }
    }
}
