//! Core types for the flowloom orchestration engine.
//!
//! This module defines the fundamental identity types used throughout the
//! system: the lifecycle state of an executable node and the discriminant
//! tag that binds a node to its registered handler.
//!
//! # Key Types
//!
//! - [`NodeState`]: lifecycle state machine position of a node
//! - [`NodeType`]: identifies which handler executes a node
//!
//! # Examples
//!
//! ```rust
//! use flowloom::types::{NodeState, NodeType};
//!
//! let tag = NodeType::Custom("crawler".to_string());
//! assert_eq!(tag.encode(), "crawler");
//! assert_eq!(NodeType::decode("switch"), NodeType::Switch);
//!
//! assert!(!NodeState::Emitting.is_terminal());
//! assert!(NodeState::Fail.is_terminal());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an executable node.
///
/// Nodes move through `pending → running → (emitting)* → {success | fail}`.
/// `Emitting` is entered zero or more times while reactive outputs are
/// updated; `Success` and `Fail` are terminal and freeze the node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// Not yet scheduled; the only state a node may be created in.
    #[default]
    Pending,
    /// Handler dispatched, no output produced yet.
    Running,
    /// At least one reactive output has been updated mid-execution.
    Emitting,
    /// Terminal: handler completed without error.
    Success,
    /// Terminal: handler errored or execution was cancelled.
    Fail,
}

impl NodeState {
    /// Returns `true` for [`Success`](Self::Success) and [`Fail`](Self::Fail).
    ///
    /// A node in a terminal state is immutable; re-execution must go
    /// through [`AstNode::fresh_clone`](crate::ast::AstNode::fresh_clone).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Emitting => write!(f, "emitting"),
            Self::Success => write!(f, "success"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Discriminant tag identifying the handler responsible for a node.
///
/// Built-in routing nodes get dedicated variants; everything else flows
/// through [`Custom`](Self::Custom) and is resolved by the
/// [`HandlerRegistry`](crate::registry::HandlerRegistry) at dispatch time.
///
/// # Wire format
///
/// `NodeType` serializes to its [`encode`](Self::encode)d string form so
/// graph JSON stays stable across engine versions:
///
/// ```rust
/// # use flowloom::types::NodeType;
/// assert_eq!(serde_json::to_string(&NodeType::Merge).unwrap(), "\"merge\"");
/// assert_eq!(
///     serde_json::from_str::<NodeType>("\"fetch-page\"").unwrap(),
///     NodeType::Custom("fetch-page".to_string()),
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    /// A nested workflow graph executed as a single node.
    Graph,
    /// Pass-through node whose outgoing edge conditions pick a branch.
    If,
    /// Conditional fan-out across N declared outputs plus a default.
    Switch,
    /// Combines N inputs into one output (append/combine/choose/wait).
    Merge,
    /// Keeps the subset of a collection matching an expression or
    /// structured conditions.
    Filter,
    /// Data-carried loop node that accumulates history across invocations.
    LoopAccumulator,
    /// Application-defined node type resolved through the registry.
    Custom(String),
}

impl NodeType {
    /// Encode a `NodeType` into its wire string form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeType::Graph => "graph".to_string(),
            NodeType::If => "if".to_string(),
            NodeType::Switch => "switch".to_string(),
            NodeType::Merge => "merge".to_string(),
            NodeType::Filter => "filter".to_string(),
            NodeType::LoopAccumulator => "loop".to_string(),
            NodeType::Custom(s) => s.clone(),
        }
    }

    /// Decode a wire string back into a `NodeType`.
    ///
    /// Unrecognized tags become [`Custom`](Self::Custom), which keeps
    /// graph JSON forward-compatible with application node types.
    pub fn decode(s: &str) -> Self {
        match s {
            "graph" => NodeType::Graph,
            "if" => NodeType::If,
            "switch" => NodeType::Switch,
            "merge" => NodeType::Merge,
            "filter" => NodeType::Filter,
            "loop" => NodeType::LoopAccumulator,
            other => NodeType::Custom(other.to_string()),
        }
    }

    /// Returns `true` if this is a nested graph node.
    #[must_use]
    pub fn is_graph(&self) -> bool {
        matches!(self, Self::Graph)
    }
}

impl From<String> for NodeType {
    fn from(s: String) -> Self {
        NodeType::decode(&s)
    }
}

impl From<NodeType> for String {
    fn from(t: NodeType) -> Self {
        t.encode()
    }
}

// Developer experience: allow string literals where a NodeType is expected.
impl From<&str> for NodeType {
    fn from(s: &str) -> Self {
        NodeType::decode(s)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
