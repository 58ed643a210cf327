use async_trait::async_trait;
use flowloom::ast::AstNode;
use flowloom::errors::FlowError;
use flowloom::registry::{HandlerContext, NodeHandler};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Copies the `value` input to the `result` output and succeeds.
pub struct EchoHandler;

#[async_trait]
impl NodeHandler for EchoHandler {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError> {
        let value = node.input("value").cloned().unwrap_or(Value::Null);
        ctx.emit(node, "result", value)
            .map_err(|e| FlowError::msg(e.to_string()))
    }
}

/// Always fails with a named error.
pub struct FailingHandler;

#[async_trait]
impl NodeHandler for FailingHandler {
    async fn run(&self, _node: &mut AstNode, _ctx: &HandlerContext) -> Result<(), FlowError> {
        Err(FlowError::named("BoomError", "handler exploded")
            .with_cause(FlowError::msg("root cause")))
    }
}

/// Sleeps before emitting, then records that it completed. Used to prove
/// cancellation aborts in-flight work.
pub struct SlowHandler {
    pub delay: Duration,
    pub completed: Arc<AtomicBool>,
}

#[async_trait]
impl NodeHandler for SlowHandler {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError> {
        tokio::time::sleep(self.delay).await;
        self.completed.store(true, Ordering::SeqCst);
        ctx.emit(node, "result", Value::from("done"))
            .map_err(|e| FlowError::msg(e.to_string()))
    }
}
