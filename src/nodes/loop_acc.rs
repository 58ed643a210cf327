//! Loop accumulator: carries a growing collection around a data cycle.
//!
//! Loops are data-carried: the accumulator's `history` output feeds back
//! into its own `history` input through a self-loop data edge, and the
//! loop body delivers the next `item`. An empty, null, or inactive
//! history input starts a fresh accumulation.

use super::coerce_array;
use crate::ast::AstNode;
use crate::errors::FlowError;
use crate::registry::{HandlerContext, NodeHandler};
use async_trait::async_trait;
use serde_json::Value;

const HISTORY: &str = "history";
const ITEM: &str = "item";
const LAST: &str = "last";

pub struct LoopAccumulatorHandler;

#[async_trait]
impl NodeHandler for LoopAccumulatorHandler {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError> {
        let mut history = coerce_array(node.input(HISTORY));
        let items = coerce_array(node.input(ITEM));

        history.extend(items);
        let last = history.last().cloned().unwrap_or(Value::Null);

        ctx.emit(node, HISTORY, Value::Array(history))
            .and_then(|()| ctx.emit(node, LAST, last))
            .map_err(|err| FlowError::named("StreamError", err.to_string()))?;
        Ok(())
    }
}
