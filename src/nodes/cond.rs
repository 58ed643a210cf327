//! If node: pure pass-through.
//!
//! The branch decision lives entirely in the conditions of the node's
//! outgoing edges, evaluated against its declared output. The handler
//! only moves the input value onto the output; it computes nothing.

use super::missing_input;
use crate::ast::AstNode;
use crate::errors::FlowError;
use crate::registry::{HandlerContext, NodeHandler};
use async_trait::async_trait;

/// Input and output property of the If node.
pub(crate) const VALUE: &str = "value";

pub struct IfHandler;

#[async_trait]
impl NodeHandler for IfHandler {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError> {
        let value = node.input(VALUE).cloned().ok_or_else(|| missing_input(VALUE))?;
        ctx.emit(node, VALUE, value)
            .map_err(|err| FlowError::named("StreamError", err.to_string()))?;
        Ok(())
    }
}
