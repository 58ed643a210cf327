//! Node and graph model.
//!
//! An [`AstNode`] is the executable unit of a workflow: a typed record of
//! inputs, outputs, lifecycle state, and declared ports, executed by
//! whatever handler is registered for its [`NodeType`]. Graphs
//! ([`WorkflowGraph`](graph::WorkflowGraph)) wire nodes together with
//! [`Edge`](edge::Edge)s and themselves satisfy the node contract, so
//! graphs nest.
//!
//! Port declarations are static schema objects populated at construction
//! time; there is no runtime reflection anywhere in the model.

pub mod edge;
pub mod graph;

pub use edge::{Edge, EdgeCondition};
pub use graph::{GraphError, Viewport, WorkflowGraph};

use crate::emit::OutputSlots;
use crate::errors::FlowError;
use crate::types::{NodeState, NodeType};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Marker key of the route-skip sentinel object.
pub const SKIP_KEY: &str = "__flowloom_skip__";

/// The route-skip sentinel: "this branch's output is intentionally
/// inactive this pass."
///
/// It is a distinguished JSON object rather than `null` so it survives
/// serialization; transports that cannot carry it verbatim send `null`
/// and reconstitute it on arrival. Downstream consumers treat it as
/// "do not execute", never as "executed with empty value".
#[must_use]
pub fn skip_value() -> Value {
    json!({ SKIP_KEY: true })
}

/// Returns `true` if a value is the route-skip sentinel.
#[must_use]
pub fn is_skip(value: &Value) -> bool {
    value
        .get(SKIP_KEY)
        .is_some_and(|v| v.as_bool() == Some(true))
}

/// Declared input or output port of a node type.
///
/// Ports are plain schema records declared once per node type, not
/// reflected from anything at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSchema {
    pub property: String,
    #[serde(default)]
    pub title: String,
    /// Router outputs participate in conditional edge routing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_router: bool,
    /// Condition expression attached to the port (Switch outputs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl PortSchema {
    pub fn new(property: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            title: title.into(),
            is_router: false,
            condition: None,
        }
    }

    #[must_use]
    pub fn router(mut self) -> Self {
        self.is_router = true;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Ordered port declarations of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(default)]
    pub inputs: Vec<PortSchema>,
    #[serde(default)]
    pub outputs: Vec<PortSchema>,
}

/// An executable node in a workflow graph.
///
/// Created by graph deserialization or programmatic construction, mutated
/// only by its assigned handler during execution, immutable once terminal
/// (re-execution goes through [`fresh_clone`](Self::fresh_clone)).
///
/// # Examples
///
/// ```
/// use flowloom::ast::{AstNode, PortSchema};
/// use serde_json::json;
///
/// let node = AstNode::new("n1", "switch")
///     .with_output_port(PortSchema::new("big", "Big").router().with_condition("value > 10"))
///     .with_input("value", json!(42));
/// assert_eq!(node.input("value"), Some(&json!(42)));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AstNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub metadata: NodeMetadata,
    #[serde(default)]
    pub inputs: FxHashMap<String, Value>,
    #[serde(default)]
    pub outputs: FxHashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FlowError>,
    /// Live reactive slots; runtime-only, never serialized. Clones share
    /// the same slots so snapshots observe the live channels.
    #[serde(skip)]
    pub slots: OutputSlots,
}

impl AstNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<NodeType>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            state: NodeState::Pending,
            metadata: NodeMetadata::default(),
            inputs: FxHashMap::default(),
            outputs: FxHashMap::default(),
            error: None,
            slots: OutputSlots::new(),
        }
    }

    /// Construct with a generated id.
    pub fn anonymous(node_type: impl Into<NodeType>) -> Self {
        Self::new(Uuid::new_v4().to_string(), node_type)
    }

    #[must_use]
    pub fn with_input_port(mut self, port: PortSchema) -> Self {
        self.metadata.inputs.push(port);
        self
    }

    #[must_use]
    pub fn with_output_port(mut self, port: PortSchema) -> Self {
        self.metadata.outputs.push(port);
        self
    }

    #[must_use]
    pub fn with_input(mut self, property: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(property.into(), value);
        self
    }

    pub fn input(&self, property: &str) -> Option<&Value> {
        self.inputs.get(property)
    }

    pub fn output(&self, property: &str) -> Option<&Value> {
        self.outputs.get(property)
    }

    pub fn set_input(&mut self, property: impl Into<String>, value: Value) {
        self.inputs.insert(property.into(), value);
    }

    /// Update a reactive output: records the value on the node and pushes
    /// it through the property's broadcast slot so observers (edges,
    /// snapshots, the remote bridge) see it immediately.
    pub fn emit(&mut self, property: impl Into<String>, value: Value) {
        let property = property.into();
        self.slots.slot(&property).push(value.clone());
        self.outputs.insert(property, value);
    }

    /// Returns `true` once the node reached a terminal state.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.state.is_terminal()
    }

    /// Clone for re-execution: pending state, cleared outputs and error,
    /// fresh reactive slots. Inputs and port declarations carry over.
    #[must_use]
    pub fn fresh_clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            node_type: self.node_type.clone(),
            state: NodeState::Pending,
            metadata: self.metadata.clone(),
            inputs: self.inputs.clone(),
            outputs: FxHashMap::default(),
            error: None,
            slots: OutputSlots::new(),
        }
    }

    /// Adopt a terminal snapshot's outputs, pushing any output the local
    /// instance has not seen (or saw with a different value) through its
    /// reactive slot. Defense against dropped or out-of-order emissions
    /// on the remote stream.
    pub fn reconcile_outputs_from(&mut self, snapshot: &AstNode) {
        for (property, value) in &snapshot.outputs {
            if self.outputs.get(property) != Some(value) {
                self.emit(property.clone(), value.clone());
            }
        }
        self.state = snapshot.state;
        self.error = snapshot.error.clone();
    }

    /// The node's declared default output property, if it declares ports.
    pub fn first_output_property(&self) -> Option<&str> {
        self.metadata
            .outputs
            .first()
            .map(|port| port.property.as_str())
    }
}
