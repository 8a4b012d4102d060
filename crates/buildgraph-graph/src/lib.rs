//! Graph model: agents, nodes and the tags they produce and consume.
//!
//! A `BuildGraph` is built incrementally by the script reader (or any other
//! front end) through `add_agent`/`add_node`, which compute each node's
//! dependency closures as it is added. Declaration order is a topological
//! order: a node can only reference outputs that already exist.
//!
//! Aggregates, labels, badges, reports and artifacts group nodes for display
//! and notification only; they never add dependency edges.

pub mod diagnostic;
pub mod graph;
pub mod names;
pub mod node;
pub mod reporting;
pub mod select;

pub use diagnostic::Diagnostic;
pub use graph::{Agent, BuildGraph, GraphSummary};
pub use names::{is_valid_name, is_valid_tag_name};
pub use node::{AgentId, Node, NodeId, NodeOutput, NodeSpec, OutputId};
pub use reporting::{Aggregate, Artifact, Badge, Label, LabelChange, Report};
