use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Serialize;

use buildgraph_core::types::{ScriptLocation, TaskInfo};

/// Index of a node in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub usize);

/// Index of an agent in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AgentId(pub usize);

/// Index of a tagged output in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OutputId(pub usize);

/// A named file set with exactly one producing node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeOutput {
    /// Tag name, including the leading `#`.
    pub tag_name: String,
    pub producer: NodeId,
}

/// Everything needed to add a node to a graph. References are already resolved.
#[derive(Debug, Clone, Default)]
pub struct NodeSpec {
    pub name: String,
    /// Consumed outputs (`Requires`).
    pub inputs: Vec<OutputId>,
    /// Extra produced tags (`Produces`); the default `#Name` tag is implicit.
    pub produces: Vec<String>,
    /// Ordering-only dependencies (`After`).
    pub after: Vec<NodeId>,
    /// Mutual-exclusion marker files (`Token`).
    pub required_tokens: Vec<PathBuf>,
    pub run_early: bool,
    pub notify_on_warnings: bool,
    pub annotations: BTreeMap<String, String>,
    pub location: ScriptLocation,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            notify_on_warnings: true,
            ..Default::default()
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<OutputId>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_produces(mut self, tags: Vec<String>) -> Self {
        self.produces = tags;
        self
    }

    pub fn with_after(mut self, after: Vec<NodeId>) -> Self {
        self.after = after;
        self
    }

    pub fn at(mut self, location: ScriptLocation) -> Self {
        self.location = location;
        self
    }
}

/// A node: an ordered list of tasks with declared inputs and outputs.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub name: String,
    pub agent: AgentId,
    pub inputs: Vec<OutputId>,
    /// Produced outputs. The first entry is always the default `#Name` output.
    pub outputs: Vec<OutputId>,
    /// Explicit `After` targets.
    pub after: Vec<NodeId>,
    /// Nodes producing anything this node consumes, transitively.
    pub input_dependencies: BTreeSet<NodeId>,
    /// Input dependencies plus `After` targets, transitively closed.
    pub order_dependencies: BTreeSet<NodeId>,
    pub required_tokens: Vec<PathBuf>,
    pub run_early: bool,
    pub notify_on_warnings: bool,
    pub annotations: BTreeMap<String, String>,
    pub notify_users: BTreeSet<String>,
    pub notify_submitters: BTreeSet<String>,
    pub tasks: Vec<TaskInfo>,
    pub location: ScriptLocation,
}

impl Node {
    pub fn default_output(&self) -> OutputId {
        self.outputs[0]
    }

    pub fn depends_on(&self, other: NodeId) -> bool {
        self.order_dependencies.contains(&other)
    }
}
