//! Switch node: conditional fan-out over declared outputs.
//!
//! Every non-default output carries a condition expression over the
//! input (bound as `value`). Matching outputs receive the input value,
//! non-matching outputs receive the route-skip sentinel, and the default
//! output receives the value iff nothing matched.
//!
//! Mutual exclusivity of the author-supplied conditions is deliberately
//! not enforced: if several branches match, all of them receive the value
//! (multi-cast routing). That behavior is covered by tests rather than
//! "fixed".

use super::missing_input;
use crate::ast::{AstNode, PortSchema, skip_value};
use crate::errors::FlowError;
use crate::expr::evaluate_predicate;
use crate::registry::{HandlerContext, NodeHandler};
use async_trait::async_trait;

const VALUE: &str = "value";

/// Property name reserved for the default branch when no output declares
/// it via an absent condition.
const DEFAULT: &str = "default";

pub struct SwitchHandler;

fn is_default_port(port: &PortSchema) -> bool {
    port.condition.is_none() || port.property == DEFAULT
}

#[async_trait]
impl NodeHandler for SwitchHandler {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError> {
        let value = node.input(VALUE).cloned().ok_or_else(|| missing_input(VALUE))?;
        let ports = node.metadata.outputs.clone();

        let mut any_matched = false;
        for port in ports.iter().filter(|p| !is_default_port(p)) {
            let condition = port
                .condition
                .as_deref()
                .unwrap_or_default();
            let matched = evaluate_predicate(condition, &value).map_err(|err| {
                FlowError::named(
                    "ExpressionError",
                    format!("condition on output '{}' failed", port.property),
                )
                .with_cause(FlowError::named("ExprError", err.to_string()))
            })?;
            any_matched |= matched;
            let emitted = if matched { value.clone() } else { skip_value() };
            ctx.emit(node, port.property.clone(), emitted)
                .map_err(|err| FlowError::named("StreamError", err.to_string()))?;
        }

        for port in ports.iter().filter(|p| is_default_port(p)) {
            let emitted = if any_matched { skip_value() } else { value.clone() };
            ctx.emit(node, port.property.clone(), emitted)
                .map_err(|err| FlowError::named("StreamError", err.to_string()))?;
        }

        Ok(())
    }
}
