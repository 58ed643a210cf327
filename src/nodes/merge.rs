//! Merge node: combine N inputs into one output.

use super::coerce_array;
use crate::ast::AstNode;
use crate::errors::FlowError;
use crate::registry::{HandlerContext, NodeHandler};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MODE: &str = "mode";
const RESULT: &str = "result";

/// How a Merge node combines its inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeMode {
    /// Flatten all inputs into a single ordered sequence.
    #[default]
    Append,
    /// Positional pairing: index `i` across all inputs becomes one
    /// record keyed by input position; the longest input sets the arity.
    Combine,
    /// First non-empty input, in declared input order.
    ChooseBranch,
    /// Alias of append, reserved for future distinct semantics.
    Wait,
}

pub struct MergeHandler;

#[async_trait]
impl NodeHandler for MergeHandler {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError> {
        let mode = match node.input(MODE) {
            None => MergeMode::default(),
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| {
                FlowError::named("MergeError", format!("unknown merge mode {raw}"))
            })?,
        };

        // Inputs in declared port order; undeclared nodes fall back to
        // whatever inputs arrived, which keeps ad-hoc graphs working.
        let properties: Vec<String> = if node.metadata.inputs.is_empty() {
            let mut keys: Vec<String> = node
                .inputs
                .keys()
                .filter(|k| k.as_str() != MODE)
                .cloned()
                .collect();
            keys.sort();
            keys
        } else {
            node.metadata
                .inputs
                .iter()
                .map(|p| p.property.clone())
                .collect()
        };

        let branches: Vec<Vec<Value>> = properties
            .iter()
            .map(|p| coerce_array(node.input(p)))
            .collect();

        let result = match mode {
            MergeMode::Append | MergeMode::Wait => {
                Value::Array(branches.into_iter().flatten().collect())
            }
            MergeMode::Combine => {
                let arity = branches.iter().map(Vec::len).max().unwrap_or(0);
                let mut records = Vec::with_capacity(arity);
                for i in 0..arity {
                    let mut record = Map::new();
                    for (branch_index, branch) in branches.iter().enumerate() {
                        if let Some(item) = branch.get(i) {
                            record.insert(branch_index.to_string(), item.clone());
                        }
                    }
                    records.push(Value::Object(record));
                }
                Value::Array(records)
            }
            MergeMode::ChooseBranch => branches
                .into_iter()
                .find(|b| !b.is_empty())
                .map(Value::Array)
                .unwrap_or(Value::Array(Vec::new())),
        };

        ctx.emit(node, RESULT, result)
            .map_err(|err| FlowError::named("StreamError", err.to_string()))?;
        Ok(())
    }
}
