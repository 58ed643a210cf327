//! Data and control edges.
//!
//! A *data* edge carries `fromProperty`/`toProperty`, describing which
//! upstream output feeds which downstream input. A *control* edge carries
//! a condition `{property, value}` and is traversable only when the
//! source node's named output equals the condition value.

use crate::expr::loose_eq;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Condition attached to a control edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeCondition {
    /// Output property of the source node the condition inspects.
    pub property: String,
    /// Value the output must equal for the edge to be traversable.
    pub value: Value,
}

/// A directed edge between two nodes of the same graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
}

impl Edge {
    /// Data edge: `from`'s output property feeds `to`'s input property.
    pub fn data(
        from: impl Into<String>,
        to: impl Into<String>,
        from_property: impl Into<String>,
        to_property: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            from_property: Some(from_property.into()),
            to_property: Some(to_property.into()),
            condition: None,
        }
    }

    /// Control edge: traversable when `from`'s `property` output equals
    /// `value`.
    pub fn control(
        from: impl Into<String>,
        to: impl Into<String>,
        property: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            from_property: None,
            to_property: None,
            condition: Some(EdgeCondition {
                property: property.into(),
                value,
            }),
        }
    }

    #[must_use]
    pub fn is_control(&self) -> bool {
        self.condition.is_some()
    }

    #[must_use]
    pub fn is_data(&self) -> bool {
        self.from_property.is_some()
    }

    #[must_use]
    pub fn is_self_loop(&self) -> bool {
        self.from == self.to
    }

    /// Whether this control edge is traversable given the source node's
    /// outputs. Always `true` for non-control edges. Equality is loose:
    /// `2` and `2.0` match.
    pub fn satisfied_by(&self, outputs: &FxHashMap<String, Value>) -> bool {
        match &self.condition {
            None => true,
            Some(condition) => outputs
                .get(&condition.property)
                .is_some_and(|actual| loose_eq(actual, &condition.value)),
        }
    }
}
