use flowloom::ast::AstNode;
use flowloom::executor::ExecutionStream;
use flowloom::types::NodeState;
use futures_util::StreamExt;

/// Drain a stream into its full snapshot sequence.
pub async fn collect(stream: ExecutionStream) -> Vec<AstNode> {
    stream.collect().await
}

/// Lifecycle states observed for one node id, in order.
#[allow(dead_code)]
pub fn states_of(snapshots: &[AstNode], id: &str) -> Vec<NodeState> {
    snapshots
        .iter()
        .filter(|s| s.id == id)
        .map(|s| s.state)
        .collect()
}

/// Last snapshot observed for one node id.
#[allow(dead_code)]
pub fn terminal_of<'a>(snapshots: &'a [AstNode], id: &str) -> &'a AstNode {
    snapshots
        .iter()
        .rev()
        .find(|s| s.id == id)
        .unwrap_or_else(|| panic!("no snapshot for node '{id}'"))
}
