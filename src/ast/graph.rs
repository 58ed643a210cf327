//! Workflow graphs.
//!
//! A [`WorkflowGraph`] is a named collection of nodes and edges that
//! itself satisfies the node contract (id, type, state), so a graph can be
//! embedded as a single node inside another graph and executed
//! recursively.

use super::edge::Edge;
use super::AstNode;
use crate::types::{NodeState, NodeType};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Structural validation errors, raised before any node is dispatched.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("duplicate node id '{id}' in graph '{graph}'")]
    #[diagnostic(code(flowloom::graph::duplicate_node_id))]
    DuplicateNodeId { graph: String, id: String },

    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    #[diagnostic(
        code(flowloom::graph::unknown_endpoint),
        help("every edge's from/to must name a node id present in the same graph")
    )]
    UnknownEndpoint { edge_id: String, node_id: String },

    #[error("edge '{edge_id}' is a self-loop on '{node_id}' without explicit accumulation wiring")]
    #[diagnostic(
        code(flowloom::graph::invalid_self_loop),
        help("self-loops are only permitted as data edges with both fromProperty and toProperty set")
    )]
    InvalidSelfLoop { edge_id: String, node_id: String },

    #[error("failed to serialize graph '{graph}' for embedding")]
    #[diagnostic(code(flowloom::graph::serialize))]
    Serialize {
        graph: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("graph node '{id}' carries no embedded graph input")]
    #[diagnostic(code(flowloom::graph::missing_embedded_graph))]
    MissingEmbeddedGraph { id: String },

    #[error("failed to deserialize embedded graph from node '{id}'")]
    #[diagnostic(code(flowloom::graph::deserialize))]
    Deserialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Canvas viewport; carried through serialization untouched, irrelevant
/// to execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// A graph of nodes, itself a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default = "graph_type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub nodes: Vec<AstNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
}

fn graph_type() -> NodeType {
    NodeType::Graph
}

/// Input property under which a graph is embedded when executed as a node.
pub const EMBEDDED_GRAPH_INPUT: &str = "graph";

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            node_type: NodeType::Graph,
            state: NodeState::Pending,
            nodes: Vec::new(),
            edges: Vec::new(),
            viewport: Viewport::default(),
        }
    }

    #[must_use]
    pub fn with_node(mut self, node: AstNode) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn node(&self, id: &str) -> Option<&AstNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges leaving `id`, in declaration order. Declaration order matters:
    /// Merge's `chooseBranch` and `append` modes are defined over it.
    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.from == id)
    }

    /// Edges entering `id`, in declaration order.
    pub fn edges_into<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.to == id)
    }

    /// Validate structure: unique node ids, edges referencing known nodes,
    /// self-loops only as the explicit accumulation pattern (a data edge
    /// wiring an output back to an input on the same node).
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = rustc_hash::FxHashSet::default();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNodeId {
                    graph: self.name.clone(),
                    id: node.id.clone(),
                });
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(GraphError::UnknownEndpoint {
                        edge_id: edge.id.clone(),
                        node_id: endpoint.clone(),
                    });
                }
            }
            if edge.is_self_loop() && !(edge.from_property.is_some() && edge.to_property.is_some())
            {
                return Err(GraphError::InvalidSelfLoop {
                    edge_id: edge.id.clone(),
                    node_id: edge.from.clone(),
                });
            }
        }
        Ok(())
    }

    /// Wrap this graph into a node carrying the serialized graph as its
    /// `graph` input, so it can be embedded in an outer graph.
    pub fn to_node(&self) -> Result<AstNode, GraphError> {
        let embedded = serde_json::to_value(self).map_err(|source| GraphError::Serialize {
            graph: self.name.clone(),
            source,
        })?;
        Ok(AstNode::new(self.id.clone(), NodeType::Graph)
            .with_input(EMBEDDED_GRAPH_INPUT, embedded))
    }

    /// Recover an embedded graph from a graph node.
    pub fn from_node(node: &AstNode) -> Result<Self, GraphError> {
        let embedded = node
            .input(EMBEDDED_GRAPH_INPUT)
            .ok_or_else(|| GraphError::MissingEmbeddedGraph {
                id: node.id.clone(),
            })?;
        serde_json::from_value(embedded.clone()).map_err(|source| GraphError::Deserialize {
            id: node.id.clone(),
            source,
        })
    }

    /// Snapshot of this graph as a plain node (id/type/state/error view),
    /// used for terminal reporting on result streams.
    #[must_use]
    pub fn as_node_snapshot(&self) -> AstNode {
        let mut node = AstNode::new(self.id.clone(), NodeType::Graph);
        node.state = self.state;
        node
    }
}
