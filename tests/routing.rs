//! Routing semantics: Switch fan-out, Merge modes, Filter, route-skip
//! propagation, control edges, and nested graphs.

mod common;

use common::{collect, states_of, terminal_of, EchoHandler};
use flowloom::ast::{is_skip, AstNode, Edge, PortSchema, WorkflowGraph};
use flowloom::executor::Executor;
use flowloom::registry::HandlerRegistry;
use flowloom::types::NodeState;
use serde_json::json;
use std::sync::Arc;

fn executor() -> Executor {
    let registry = HandlerRegistry::with_builtins().with_handler("echo".into(), Arc::new(EchoHandler));
    Executor::new(Arc::new(registry))
}

fn switch_node(value: serde_json::Value) -> AstNode {
    AstNode::new("classify", "switch")
        .with_output_port(PortSchema::new("big", "Big").router().with_condition("value > 10"))
        .with_output_port(
            PortSchema::new("small", "Small")
                .router()
                .with_condition("value <= 10"),
        )
        .with_output_port(PortSchema::new("default", "Default").router())
        .with_input("value", value)
}

#[tokio::test]
async fn switch_routes_exactly_one_branch_on_exclusive_conditions() {
    let terminal = executor()
        .execute(switch_node(json!(42)))
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();

    assert_eq!(terminal.state, NodeState::Success);
    assert_eq!(terminal.output("big"), Some(&json!(42)));
    assert!(is_skip(terminal.output("small").unwrap()));
    assert!(is_skip(terminal.output("default").unwrap()));
}

#[tokio::test]
async fn switch_falls_back_to_default_when_nothing_matches() {
    let node = AstNode::new("classify", "switch")
        .with_output_port(PortSchema::new("hot", "Hot").router().with_condition("value > 100"))
        .with_output_port(PortSchema::new("default", "Default").router())
        .with_input("value", json!(5));

    let terminal = executor()
        .execute(node)
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();

    assert!(is_skip(terminal.output("hot").unwrap()));
    assert_eq!(terminal.output("default"), Some(&json!(5)));
}

#[tokio::test]
async fn switch_multicasts_when_conditions_overlap() {
    // Overlapping author conditions are not an error: every matching
    // branch receives the value.
    let node = AstNode::new("classify", "switch")
        .with_output_port(PortSchema::new("a", "A").router().with_condition("value > 1"))
        .with_output_port(PortSchema::new("b", "B").router().with_condition("value > 2"))
        .with_input("value", json!(5));

    let terminal = executor()
        .execute(node)
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();
    assert_eq!(terminal.output("a"), Some(&json!(5)));
    assert_eq!(terminal.output("b"), Some(&json!(5)));
}

fn merge_node(mode: &str, branches: &[serde_json::Value]) -> AstNode {
    let mut node = AstNode::new("merge", "merge").with_input("mode", json!(mode));
    for (i, branch) in branches.iter().enumerate() {
        let property = format!("input{i}");
        node = node
            .with_input_port(PortSchema::new(property.clone(), format!("Input {i}")))
            .with_input(property, branch.clone());
    }
    node
}

#[tokio::test]
async fn merge_append_flattens_in_input_order() {
    let terminal = executor()
        .execute(merge_node("append", &[json!([1, 2]), json!([3])]))
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();
    assert_eq!(terminal.output("result"), Some(&json!([1, 2, 3])));
}

#[tokio::test]
async fn merge_combine_pairs_positionally_up_to_longest_input() {
    let terminal = executor()
        .execute(merge_node("combine", &[json!([1, 2]), json!([3])]))
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();
    assert_eq!(
        terminal.output("result"),
        Some(&json!([{"0": 1, "1": 3}, {"0": 2}]))
    );
}

#[tokio::test]
async fn merge_choose_branch_takes_first_non_empty() {
    let terminal = executor()
        .execute(merge_node(
            "chooseBranch",
            &[json!([]), json!([]), json!([5, 6])],
        ))
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();
    assert_eq!(terminal.output("result"), Some(&json!([5, 6])));
}

#[tokio::test]
async fn filter_structured_conditions_produce_subset_and_count() {
    let node = AstNode::new("adults", "filter")
        .with_input("value", json!([{"age": 17}, {"age": 20}]))
        .with_input(
            "conditions",
            json!([{"field": "age", "operator": "gte", "value": 18}]),
        )
        .with_input("logic", json!("and"));

    let terminal = executor()
        .execute(node)
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();
    assert_eq!(terminal.output("matched"), Some(&json!([{"age": 20}])));
    assert_eq!(terminal.output("count"), Some(&json!(1)));
}

#[tokio::test]
async fn filter_expression_mode_binds_each_item() {
    let node = AstNode::new("adults", "filter")
        .with_input("value", json!([{"age": 17}, {"age": 20}]))
        .with_input("expression", json!("value.age >= 18"));

    let terminal = executor()
        .execute(node)
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();
    assert_eq!(terminal.output("count"), Some(&json!(1)));
}

#[tokio::test]
async fn loop_accumulator_starts_fresh_then_appends() {
    let executor = executor();

    let fresh = AstNode::new("acc", "loop")
        .with_input("history", json!(null))
        .with_input("item", json!("first"));
    let terminal = executor
        .execute(fresh)
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();
    assert_eq!(terminal.output("history"), Some(&json!(["first"])));
    assert_eq!(terminal.output("last"), Some(&json!("first")));

    let carried = AstNode::new("acc", "loop")
        .with_input("history", json!(["first"]))
        .with_input("item", json!("second"));
    let terminal = executor
        .execute(carried)
        .unwrap()
        .final_snapshot()
        .await
        .unwrap();
    assert_eq!(terminal.output("history"), Some(&json!(["first", "second"])));
    assert_eq!(terminal.output("last"), Some(&json!("second")));
}

#[tokio::test]
async fn skipped_branches_never_execute_downstream() {
    let graph = WorkflowGraph::new("triage")
        .with_node(switch_node(json!(42)))
        .with_node(AstNode::new("on_big", "if"))
        .with_node(AstNode::new("on_small", "if"))
        .with_node(AstNode::new("on_default", "if"))
        .with_edge(Edge::data("classify", "on_big", "big", "value"))
        .with_edge(Edge::data("classify", "on_small", "small", "value"))
        .with_edge(Edge::data("classify", "on_default", "default", "value"));

    let snapshots = collect(executor().execute_graph(graph).unwrap()).await;

    // The matching branch ran to success with the routed value.
    let big = terminal_of(&snapshots, "on_big");
    assert_eq!(big.state, NodeState::Success);
    assert_eq!(big.output("value"), Some(&json!(42)));

    // Skipped branches produced no snapshots at all: they never left
    // pending.
    assert!(states_of(&snapshots, "on_small").is_empty());
    assert!(states_of(&snapshots, "on_default").is_empty());

    let graph_terminal = snapshots.last().unwrap();
    assert_eq!(graph_terminal.state, NodeState::Success);
}

#[tokio::test]
async fn control_edges_gate_on_output_equality() {
    let graph = WorkflowGraph::new("gate")
        .with_node(AstNode::new("check", "echo").with_input("value", json!(true)))
        .with_node(AstNode::new("then", "echo"))
        .with_node(AstNode::new("otherwise", "echo"))
        .with_edge(Edge::control("check", "then", "result", json!(true)))
        .with_edge(Edge::control("check", "otherwise", "result", json!(false)));

    let snapshots = collect(executor().execute_graph(graph).unwrap()).await;
    assert_eq!(terminal_of(&snapshots, "then").state, NodeState::Success);
    assert!(states_of(&snapshots, "otherwise").is_empty());
}

#[tokio::test]
async fn failed_node_fails_the_graph_and_blocks_downstream() {
    let registry = HandlerRegistry::with_builtins()
        .with_handler("echo".into(), Arc::new(EchoHandler))
        .with_handler("boom".into(), Arc::new(common::FailingHandler));
    let executor = Executor::new(Arc::new(registry));

    let graph = WorkflowGraph::new("fragile")
        .with_node(AstNode::new("explode", "boom"))
        .with_node(AstNode::new("after", "if"))
        .with_edge(Edge::data("explode", "after", "result", "value"));

    let snapshots = collect(executor.execute_graph(graph).unwrap()).await;
    assert!(states_of(&snapshots, "after").is_empty());

    let graph_terminal = snapshots.last().unwrap();
    assert_eq!(graph_terminal.state, NodeState::Fail);
    let error = graph_terminal.error.as_ref().unwrap();
    assert_eq!(error.name, "GraphExecutionError");
    assert_eq!(error.deepest().message, "root cause");
}

#[tokio::test]
async fn graphs_nest_as_nodes() {
    let inner = WorkflowGraph::new("inner")
        .with_node(AstNode::new("double", "echo").with_input("value", json!(21)));

    let outer = WorkflowGraph::new("outer").with_node(inner.to_node().unwrap());

    let snapshots = collect(executor().execute_graph(outer).unwrap()).await;
    let graph_terminal = snapshots.last().unwrap();
    assert_eq!(graph_terminal.state, NodeState::Success);
    assert_eq!(graph_terminal.output("result"), Some(&json!(21)));
}
