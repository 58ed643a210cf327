//! # Flowloom: Graph-driven Workflow Orchestration Engine
//!
//! Flowloom executes typed workflow graphs: nodes with declared input and
//! output ports, wired by data and control edges, driven through a small
//! state machine (`pending → running → (emitting)* → success | fail`).
//! Progress is observable as a stream of node snapshots, outputs are
//! reactive slots that downstream nodes follow incrementally, and
//! failures are structured error values with preserved cause chains.
//!
//! ## Core concepts
//!
//! - **Nodes** ([`ast::AstNode`]): executable units with typed ports and
//!   a lifecycle state. Graphs satisfy the node contract, so they nest.
//! - **Handlers** ([`registry::NodeHandler`]): async functions registered
//!   per node type in a plain table; routing built-ins come pre-wired.
//! - **Routing** ([`nodes`]): If, Switch, Merge, Filter, and the loop
//!   accumulator; inactive branches carry a route-skip sentinel instead
//!   of executing downstream.
//! - **Queues** ([`queue`]): producer/consumer abstraction over a broker
//!   seam with manual acknowledgement and dead-letter routing.
//! - **Remote execution** ([`remote`]): delegate a node to a server
//!   process and mirror its progress on the local instance.
//!
//! ## Building a graph
//!
//! ```
//! use flowloom::ast::{AstNode, Edge, PortSchema, WorkflowGraph};
//! use serde_json::json;
//!
//! let graph = WorkflowGraph::new("triage")
//!     .with_node(
//!         AstNode::new("classify", "switch")
//!             .with_output_port(PortSchema::new("hot", "Hot").router().with_condition("value > 30"))
//!             .with_output_port(PortSchema::new("default", "Rest").router())
//!             .with_input("value", json!(42)),
//!     )
//!     .with_node(AstNode::new("archive", "if"))
//!     .with_edge(Edge::data("classify", "archive", "hot", "value"));
//!
//! assert!(graph.validate().is_ok());
//! ```
//!
//! ## Executing
//!
//! ```no_run
//! use flowloom::executor::Executor;
//! use flowloom::registry::HandlerRegistry;
//! use flowloom::ast::AstNode;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Executor::new(Arc::new(HandlerRegistry::with_builtins()));
//!     let node = AstNode::new("n1", "if").with_input("value", json!(1));
//!     let stream = executor.execute(node)?;
//!     if let Some(terminal) = stream.final_snapshot().await {
//!         println!("{:?}", terminal.state);
//!     }
//!     Ok(())
//! }
//! ```

pub mod ast;
pub mod config;
pub mod consumers;
pub mod context;
pub mod emit;
pub mod errors;
pub mod executor;
pub mod expr;
pub mod nodes;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod telemetry;
pub mod types;
