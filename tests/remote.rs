//! Remote execution bridge against a mock HTTP endpoint speaking the
//! newline-delimited JSON event protocol.

mod common;

use common::collect;
use flowloom::ast::{is_skip, AstNode};
use flowloom::remote::{RemoteBridge, RemoteError};
use flowloom::types::NodeState;
use httpmock::prelude::*;
use serde_json::json;

fn node() -> AstNode {
    AstNode::new("r1", "remote-step").with_input("value", json!(3))
}

#[tokio::test]
async fn node_state_events_surface_and_output_emits_stay_internal() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/run");
            then.status(200).body(concat!(
                r#"{"type":"output_emit","property":"result","value":7}"#,
                "\n",
                r#"{"type":"node_state","data":{"id":"r1","type":"remote-step","state":"running"}}"#,
                "\n",
                r#"{"type":"node_state","data":{"id":"r1","type":"remote-step","state":"success","outputs":{"result":7}}}"#,
                "\n",
            ));
        })
        .await;

    let bridge = RemoteBridge::new(server.url("/run"));
    let snapshots = collect(bridge.execute(node()).await.unwrap()).await;

    mock.assert_async().await;
    let states: Vec<NodeState> = snapshots.iter().map(|s| s.state).collect();
    assert_eq!(states, vec![NodeState::Running, NodeState::Success]);
    assert_eq!(snapshots.last().unwrap().output("result"), Some(&json!(7)));
}

#[tokio::test]
async fn null_wire_values_come_back_as_the_skip_sentinel() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/run");
            then.status(200).body(concat!(
                r#"{"type":"output_emit","property":"gate","value":null}"#,
                "\n",
                r#"{"type":"node_state","data":{"id":"r1","type":"remote-step","state":"success"}}"#,
                "\n",
            ));
        })
        .await;

    let bridge = RemoteBridge::new(server.url("/run"));
    let snapshots = collect(bridge.execute(node()).await.unwrap()).await;

    let terminal = snapshots.last().unwrap();
    assert_eq!(terminal.state, NodeState::Success);
    assert!(is_skip(terminal.output("gate").unwrap()));
}

#[tokio::test]
async fn non_success_status_fails_before_any_stream_exists() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/run");
            then.status(503);
        })
        .await;

    let bridge = RemoteBridge::new(server.url("/run"));
    let err = bridge.execute(node()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Status { status: 503 }));
}

#[tokio::test]
async fn truncated_stream_yields_a_terminal_protocol_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/run");
            // Body ends after a non-terminal snapshot.
            then.status(200).body(concat!(
                r#"{"type":"node_state","data":{"id":"r1","type":"remote-step","state":"running"}}"#,
                "\n",
            ));
        })
        .await;

    let bridge = RemoteBridge::new(server.url("/run"));
    let snapshots = collect(bridge.execute(node()).await.unwrap()).await;

    let terminal = snapshots.last().unwrap();
    assert_eq!(terminal.state, NodeState::Fail);
    assert_eq!(
        terminal.error.as_ref().unwrap().name,
        "RemoteProtocolError"
    );
}

#[tokio::test]
async fn malformed_event_line_fails_the_execution() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/run");
            then.status(200).body("{definitely not json\n");
        })
        .await;

    let bridge = RemoteBridge::new(server.url("/run"));
    let snapshots = collect(bridge.execute(node()).await.unwrap()).await;

    let terminal = snapshots.last().unwrap();
    assert_eq!(terminal.state, NodeState::Fail);
    assert_eq!(
        terminal.error.as_ref().unwrap().name,
        "RemoteProtocolError"
    );
}
