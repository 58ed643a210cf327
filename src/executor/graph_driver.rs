//! Graph execution driver.
//!
//! Resolves contained nodes' dependencies through data edges, dispatches
//! them through the registry as they become runnable, and evaluates
//! outgoing edges on every emission and completion to decide which
//! downstream nodes join the frontier. Scheduling is event-driven over a
//! single merged snapshot stream; node bodies run concurrently but all
//! bookkeeping happens in this one task.

use crate::ast::{AstNode, Edge, WorkflowGraph, is_skip};
use crate::errors::FlowError;
use crate::registry::HandlerRegistry;
use crate::types::NodeState;
use futures_util::StreamExt;
use futures_util::stream::{BoxStream, SelectAll};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) struct GraphDriver {
    graph: WorkflowGraph,
    registry: Arc<HandlerRegistry>,
    token: CancellationToken,
    tx: flume::Sender<AstNode>,

    /// Latest observed outputs per node, fed by snapshots.
    outputs: FxHashMap<String, FxHashMap<String, Value>>,
    /// Terminal states of finished nodes.
    done: FxHashMap<String, NodeState>,
    /// Delivered input values per node (to_property -> value).
    delivered: FxHashMap<String, FxHashMap<String, Value>>,
    /// Nodes that can never run this pass (skipped branch, failed or
    /// silent upstream, unsatisfied control routing).
    blocked: FxHashSet<String>,
    dispatched: FxHashSet<String>,
    first_error: Option<FlowError>,
}

impl GraphDriver {
    pub(crate) fn new(
        graph: WorkflowGraph,
        registry: Arc<HandlerRegistry>,
        token: CancellationToken,
        tx: flume::Sender<AstNode>,
    ) -> Self {
        Self {
            graph,
            registry,
            token,
            tx,
            outputs: FxHashMap::default(),
            done: FxHashMap::default(),
            delivered: FxHashMap::default(),
            blocked: FxHashSet::default(),
            dispatched: FxHashSet::default(),
            first_error: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut merged: SelectAll<BoxStream<'static, (String, AstNode)>> = SelectAll::new();
        let mut cancelled = false;

        loop {
            self.schedule_ready(&mut merged);
            if merged.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = merged.next() => {
                    let Some((node_id, snapshot)) = item else { continue };
                    self.observe(&node_id, &snapshot);
                    // Callers see every contained node's progress.
                    if self.tx.send(snapshot).is_err() {
                        return;
                    }
                }
            }
        }

        let mut graph_node = self.graph.as_node_snapshot();
        if cancelled {
            graph_node.state = NodeState::Fail;
            graph_node.error = Some(FlowError::cancelled());
        } else if let Some(err) = self.first_error.take() {
            graph_node.state = NodeState::Fail;
            graph_node.error = Some(
                FlowError::named("GraphExecutionError", "a contained node failed")
                    .with_cause(err),
            );
        } else {
            graph_node.state = NodeState::Success;
            self.collect_leaf_outputs(&mut graph_node);
        }
        let _ = self.tx.send(graph_node);
    }

    /// Record a snapshot's outputs, propagate along data edges, and on
    /// terminal states evaluate control edges.
    fn observe(&mut self, node_id: &str, snapshot: &AstNode) {
        self.outputs
            .insert(node_id.to_string(), snapshot.outputs.clone());

        if snapshot.state == NodeState::Emitting || snapshot.state.is_terminal() {
            self.propagate_data(node_id);
        }
        if snapshot.state.is_terminal() {
            self.done.insert(node_id.to_string(), snapshot.state);
            if snapshot.state == NodeState::Fail {
                if self.first_error.is_none() {
                    self.first_error = snapshot
                        .error
                        .clone()
                        .or_else(|| Some(FlowError::msg(format!("node '{node_id}' failed"))));
                }
                // Everything downstream of a failed node stays pending.
                self.block_downstream(node_id);
            }
        }
    }

    /// Deliver available outputs along data edges leaving `node_id`.
    /// A route-skip value blocks the target instead of feeding it.
    fn propagate_data(&mut self, node_id: &str) {
        let outputs = match self.outputs.get(node_id) {
            Some(outputs) => outputs.clone(),
            None => return,
        };
        let edges: Vec<Edge> = self
            .graph
            .edges_from(node_id)
            .filter(|e| e.is_data() && !e.is_self_loop())
            .cloned()
            .collect();
        for edge in edges {
            let (Some(from_property), Some(to_property)) =
                (edge.from_property.as_ref(), edge.to_property.as_ref())
            else {
                continue;
            };
            if let Some(value) = outputs.get(from_property) {
                if is_skip(value) {
                    self.blocked.insert(edge.to.clone());
                } else {
                    self.delivered
                        .entry(edge.to.clone())
                        .or_default()
                        .insert(to_property.clone(), value.clone());
                }
            }
        }
    }

    fn block_downstream(&mut self, node_id: &str) {
        let targets: Vec<String> = self
            .graph
            .edges_from(node_id)
            .filter(|e| !e.is_self_loop())
            .map(|e| e.to.clone())
            .collect();
        for target in targets {
            if !self.dispatched.contains(&target) {
                self.blocked.insert(target);
            }
        }
    }

    /// Dispatch every node whose dependencies are satisfied.
    fn schedule_ready(&mut self, merged: &mut SelectAll<BoxStream<'static, (String, AstNode)>>) {
        let candidates: Vec<String> = self
            .graph
            .nodes
            .iter()
            .map(|n| n.id.clone())
            .filter(|id| !self.dispatched.contains(id) && !self.blocked.contains(id))
            .collect();

        for id in candidates {
            match self.readiness(&id) {
                Readiness::Ready => self.dispatch(&id, merged),
                Readiness::Blocked => {
                    self.blocked.insert(id);
                }
                Readiness::Waiting => {}
            }
        }
    }

    fn readiness(&self, node_id: &str) -> Readiness {
        let incoming: Vec<&Edge> = self
            .graph
            .edges_into(node_id)
            .filter(|e| !e.is_self_loop())
            .collect();

        // Data dependencies: every wired input must have a delivered,
        // non-skip value. A terminal upstream that never produced the
        // wired output (or failed) makes the input unsatisfiable.
        for edge in incoming.iter().filter(|e| e.is_data()) {
            let to_property = edge
                .to_property
                .as_deref()
                .unwrap_or_default();
            let has_value = self
                .delivered
                .get(node_id)
                .is_some_and(|m| m.contains_key(to_property));
            if !has_value {
                match self.done.get(&edge.from) {
                    Some(_) => return Readiness::Blocked,
                    None => return Readiness::Waiting,
                }
            }
        }

        // Control routing: at least one incoming control edge from a
        // successful source must be satisfied. While sources are still
        // running the node waits; once all are terminal with no match it
        // is skipped for this pass.
        let control: Vec<&&Edge> = incoming.iter().filter(|e| e.is_control()).collect();
        if !control.is_empty() {
            let mut any_open = false;
            for edge in &control {
                match self.done.get(&edge.from) {
                    Some(NodeState::Success) => {
                        if let Some(outputs) = self.outputs.get(&edge.from) {
                            if edge.satisfied_by(outputs) {
                                return Readiness::Ready;
                            }
                        }
                    }
                    Some(_) => {}
                    None => any_open = true,
                }
            }
            return if any_open {
                Readiness::Waiting
            } else {
                Readiness::Blocked
            };
        }

        Readiness::Ready
    }

    fn dispatch(
        &mut self,
        node_id: &str,
        merged: &mut SelectAll<BoxStream<'static, (String, AstNode)>>,
    ) {
        let Some(template) = self.graph.node(node_id) else {
            return;
        };
        let mut node = template.fresh_clone();
        if let Some(inputs) = self.delivered.get(node_id) {
            for (property, value) in inputs {
                node.set_input(property.clone(), value.clone());
            }
        }
        // Handlers were resolved during execute_graph(); a miss here
        // would be a registry mutation race, reported as a node failure.
        let handler = match self.registry.resolve(&node.node_type) {
            Ok(handler) => handler,
            Err(err) => {
                let mut failed = node;
                failed.state = NodeState::Fail;
                failed.error = Some(FlowError::named("RegistryError", err.to_string()));
                self.observe(node_id, &failed);
                let _ = self.tx.send(failed);
                self.dispatched.insert(node_id.to_string());
                return;
            }
        };
        self.dispatched.insert(node_id.to_string());
        tracing::debug!(node_id = %node.id, node_type = %node.node_type, "dispatching graph node");
        let rx = super::spawn_child(node, handler, Arc::clone(&self.registry), &self.token);
        let id = node_id.to_string();
        merged.push(rx.into_stream().map(move |snap| (id.clone(), snap)).boxed());
    }

    /// Graph outputs: union of outputs from nodes without outgoing edges,
    /// in node declaration order (later leaves win on collisions).
    fn collect_leaf_outputs(&self, graph_node: &mut AstNode) {
        for node in &self.graph.nodes {
            let has_outgoing = self
                .graph
                .edges_from(&node.id)
                .any(|e| !e.is_self_loop());
            if has_outgoing || self.done.get(&node.id) != Some(&NodeState::Success) {
                continue;
            }
            if let Some(outputs) = self.outputs.get(&node.id) {
                for (property, value) in outputs {
                    graph_node
                        .outputs
                        .insert(property.clone(), value.clone());
                }
            }
        }
    }
}

enum Readiness {
    Ready,
    Waiting,
    Blocked,
}
