use serde::Serialize;

use buildgraph_core::traits::DiagnosticSink;
use buildgraph_core::types::{ScriptLocation, Severity};

use crate::node::{AgentId, NodeId};

/// A message declared in the script with `Trace`, `Warning` or `Error`.
///
/// Diagnostics are attached to the node or agent being read when they were
/// declared, so they only surface if that node or agent survives selection.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub location: ScriptLocation,
    pub severity: Severity,
    pub message: String,
    pub node: Option<NodeId>,
    pub agent: Option<AgentId>,
}

impl Diagnostic {
    pub fn emit(&self, sink: &dyn DiagnosticSink) {
        sink.report(&self.location, self.severity, &self.message);
    }
}
