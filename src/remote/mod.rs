//! Remote execution bridge.
//!
//! Delegates a node's execution to a server process and re-materializes
//! its progress locally. The server responds with a newline-delimited
//! JSON event stream carrying two message kinds:
//!
//! - `output_emit {property, value}` is applied immediately to the local
//!   node's reactive output slot and never surfaced to the caller. This
//!   keeps the local instance's slots live, so downstream local nodes
//!   wired to one of its output properties react incrementally.
//! - `node_state {data}` is a full node snapshot and is what the caller's
//!   result stream yields. A `success` snapshot additionally reconciles
//!   any outputs the emit stream missed or delivered out of order.
//!
//! Transports that cannot carry the route-skip sentinel verbatim send
//! `null` in its place; the bridge reconstitutes the sentinel on arrival.

use crate::ast::{AstNode, skip_value};
use crate::errors::FlowError;
use crate::executor::ExecutionStream;
use crate::types::NodeState;
use futures_util::StreamExt;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Errors raised before the remote event stream exists. Once the stream
/// is open, failures become terminal `fail` snapshots on it instead.
#[derive(Debug, Error, Diagnostic)]
pub enum RemoteError {
    #[error("remote execution request failed")]
    #[diagnostic(
        code(flowloom::remote::http),
        help("check that the execution endpoint is reachable")
    )]
    Http(#[from] reqwest::Error),

    #[error("remote execution endpoint answered HTTP {status}")]
    #[diagnostic(code(flowloom::remote::status))]
    Status { status: u16 },
}

/// One event on the server-to-client execution stream, discriminated by
/// its `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    OutputEmit {
        property: String,
        #[serde(default)]
        value: Value,
    },
    NodeState {
        data: AstNode,
    },
}

/// Client side of the remote execution protocol.
///
/// `execute` returns the same [`ExecutionStream`] the local executor
/// produces, so callers are indifferent to where a node actually ran.
#[derive(Clone)]
pub struct RemoteBridge {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteBridge {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Bridge reusing an existing client (connection pooling across
    /// bridges, or a client with custom timeouts).
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Execute a node remotely, yielding `node_state` snapshots until the
    /// terminal one.
    ///
    /// The request itself failing (unreachable endpoint, non-2xx status)
    /// is a synchronous [`RemoteError`]; every failure after the stream
    /// opens arrives as a terminal `fail` snapshot. Dropping the stream
    /// abandons the transfer.
    #[instrument(skip(self, node), fields(node_id = %node.id, endpoint = %self.endpoint))]
    pub async fn execute(&self, node: AstNode) -> Result<ExecutionStream, RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&node)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
            });
        }

        let token = CancellationToken::new();
        let (tx, rx) = flume::unbounded();
        tokio::spawn(pump(node, response, tx, token.clone()));
        Ok(ExecutionStream::new(rx, token))
    }
}

/// Read the NDJSON body, apply events to the local instance, and forward
/// `node_state` snapshots until terminal, end of body, or cancellation.
async fn pump(
    mut local: AstNode,
    response: reqwest::Response,
    tx: flume::Sender<AstNode>,
    token: CancellationToken,
) {
    let mut body = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let chunk = tokio::select! {
            biased;
            () = token.cancelled() => {
                finish(&mut local, &tx, FlowError::cancelled());
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            None => break,
            Some(Err(err)) => {
                finish(
                    &mut local,
                    &tx,
                    FlowError::named("RemoteTransportError", "remote event stream broke")
                        .with_cause(FlowError::from_std(&err)),
                );
                return;
            }
            Some(Ok(bytes)) => {
                buffer.extend_from_slice(&bytes);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match apply_line(&mut local, &line[..pos], &tx) {
                        Ok(LineOutcome::Continue) => {}
                        Ok(LineOutcome::Terminal) => return,
                        Err(err) => {
                            finish(&mut local, &tx, err);
                            return;
                        }
                    }
                }
            }
        }
    }

    // Body ended without a terminal snapshot: the server went away
    // mid-execution. Surface that, not a silent pending node.
    finish(
        &mut local,
        &tx,
        FlowError::named(
            "RemoteProtocolError",
            "event stream ended before a terminal node snapshot",
        ),
    );
}

#[derive(Debug)]
enum LineOutcome {
    Continue,
    Terminal,
}

fn apply_line(
    local: &mut AstNode,
    line: &[u8],
    tx: &flume::Sender<AstNode>,
) -> Result<LineOutcome, FlowError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| FlowError::named("RemoteProtocolError", "non-utf8 event line"))?
        .trim();
    if text.is_empty() {
        return Ok(LineOutcome::Continue);
    }
    let message: WireMessage = serde_json::from_str(text).map_err(|err| {
        FlowError::named("RemoteProtocolError", "malformed event on remote stream")
            .with_cause(FlowError::from(err))
    })?;

    match message {
        WireMessage::OutputEmit { property, value } => {
            let value = if value.is_null() { skip_value() } else { value };
            local.emit(property, value);
            if !local.state.is_terminal() {
                local.state = NodeState::Emitting;
            }
            Ok(LineOutcome::Continue)
        }
        WireMessage::NodeState { data } => {
            if data.state == NodeState::Success {
                local.reconcile_outputs_from(&data);
            } else {
                local.state = data.state;
                local.error = data.error;
            }
            let terminal = local.state.is_terminal();
            let _ = tx.send(local.clone());
            if terminal {
                Ok(LineOutcome::Terminal)
            } else {
                Ok(LineOutcome::Continue)
            }
        }
    }
}

fn finish(local: &mut AstNode, tx: &flume::Sender<AstNode>, error: FlowError) {
    local.state = NodeState::Fail;
    local.error = Some(error);
    let _ = tx.send(local.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeType;
    use serde_json::json;

    fn node() -> AstNode {
        AstNode::new("r1", NodeType::Custom("remote-step".into()))
    }

    #[test]
    fn wire_messages_decode_by_type_tag() {
        let emit: WireMessage =
            serde_json::from_str(r#"{"type":"output_emit","property":"out","value":5}"#).unwrap();
        assert!(matches!(emit, WireMessage::OutputEmit { ref property, .. } if property == "out"));

        let state: WireMessage =
            serde_json::from_str(r#"{"type":"node_state","data":{"id":"r1","type":"merge"}}"#)
                .unwrap();
        assert!(matches!(state, WireMessage::NodeState { ref data } if data.id == "r1"));
    }

    #[test]
    fn output_emit_updates_the_local_slot_without_surfacing() {
        let (tx, rx) = flume::unbounded();
        let mut local = node();
        let mut slot_rx = local.slots.slot("out").subscribe();

        let line = br#"{"type":"output_emit","property":"out","value":7}"#;
        let outcome = apply_line(&mut local, line, &tx).unwrap();

        assert!(matches!(outcome, LineOutcome::Continue));
        assert_eq!(slot_rx.try_recv().unwrap(), json!(7));
        assert_eq!(local.state, NodeState::Emitting);
        assert!(rx.try_recv().is_err(), "output_emit must stay internal");
    }

    #[test]
    fn null_wire_value_reconstitutes_the_skip_sentinel() {
        let (tx, _rx) = flume::unbounded();
        let mut local = node();
        let line = br#"{"type":"output_emit","property":"out","value":null}"#;
        apply_line(&mut local, line, &tx).unwrap();
        assert!(crate::ast::is_skip(local.output("out").unwrap()));
    }

    #[test]
    fn success_snapshot_reconciles_missed_outputs() {
        let (tx, rx) = flume::unbounded();
        let mut local = node();

        let mut remote = local.fresh_clone();
        remote.emit("missed", json!("late"));
        remote.state = NodeState::Success;
        let line = serde_json::to_vec(&WireMessage::NodeState { data: remote }).unwrap();

        let outcome = apply_line(&mut local, &line, &tx).unwrap();
        assert!(matches!(outcome, LineOutcome::Terminal));
        assert_eq!(local.output("missed"), Some(&json!("late")));
        assert_eq!(rx.try_recv().unwrap().state, NodeState::Success);
    }

    #[test]
    fn malformed_event_is_a_protocol_error() {
        let (tx, _rx) = flume::unbounded();
        let mut local = node();
        let err = apply_line(&mut local, b"{not json", &tx).unwrap_err();
        assert_eq!(err.name, "RemoteProtocolError");
    }
}
