use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use buildgraph_core::error::{BuildGraphError, Result};
use buildgraph_core::traits::DiagnosticSink;
use buildgraph_core::types::{split_list, ScriptLocation, Severity};

use crate::diagnostic::Diagnostic;
use crate::names::{default_tag_name, is_valid_name, is_valid_tag_name, key};
use crate::node::{AgentId, Node, NodeId, NodeOutput, NodeSpec, OutputId};
use crate::reporting::{Aggregate, Artifact, Badge, Label, Report};

/// A named group of nodes that runs on one class of machine.
#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    pub name: String,
    /// Machine types allowed to run this agent, in preference order.
    pub types: Vec<String>,
    /// Nodes in declaration order.
    pub nodes: Vec<NodeId>,
    pub location: ScriptLocation,
}

/// The dependency graph produced by reading a script.
///
/// Entities live in arenas indexed by `NodeId`, `AgentId` and `OutputId`.
/// Ids are handed out in declaration order, and a node can only reference
/// nodes that already exist, so iterating nodes by id is a topological order.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    pub(crate) agents: Vec<Agent>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) outputs: Vec<NodeOutput>,
    pub(crate) aggregates: Vec<Aggregate>,
    pub(crate) labels: Vec<Label>,
    pub(crate) badges: Vec<Badge>,
    pub(crate) reports: Vec<Report>,
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) diagnostics: Vec<Diagnostic>,
    pub(crate) name_to_agent: HashMap<String, AgentId>,
    pub(crate) name_to_node: HashMap<String, NodeId>,
    pub(crate) tag_to_output: HashMap<String, OutputId>,
    pub(crate) name_to_aggregate: HashMap<String, usize>,
    pub(crate) name_to_report: HashMap<String, usize>,
}

fn invalid(message: String) -> BuildGraphError {
    BuildGraphError::InvalidGraph(message)
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Agents ──────────────────────────────────────────────────

    /// Add an agent, or re-open an existing one with the same name.
    ///
    /// Re-opening with a non-empty `types` list that differs from the
    /// original declaration is an error.
    pub fn add_agent(
        &mut self,
        name: &str,
        types: Vec<String>,
        location: ScriptLocation,
    ) -> Result<AgentId> {
        if !is_valid_name(name) {
            return Err(invalid(format!("'{}' is not a valid agent name", name)));
        }

        if let Some(&id) = self.name_to_agent.get(&key(name)) {
            let existing = &self.agents[id.0];
            if !types.is_empty() && !same_types(&existing.types, &types) {
                return Err(invalid(format!(
                    "Agent '{}' was already declared with type(s) '{}'",
                    name,
                    existing.types.join(";")
                )));
            }
            return Ok(id);
        }

        let id = AgentId(self.agents.len());
        self.agents.push(Agent {
            name: name.to_string(),
            types,
            nodes: Vec::new(),
            location,
        });
        self.name_to_agent.insert(key(name), id);
        Ok(id)
    }

    pub fn agent(&self, id: AgentId) -> &Agent {
        &self.agents[id.0]
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn find_agent(&self, name: &str) -> Option<AgentId> {
        self.name_to_agent.get(&key(name)).copied()
    }

    // ── Nodes ───────────────────────────────────────────────────

    /// Add a node to `agent`, creating its outputs and computing its
    /// dependency closures from the already-computed closures of the
    /// nodes it references.
    pub fn add_node(&mut self, agent: AgentId, spec: NodeSpec) -> Result<NodeId> {
        if agent.0 >= self.agents.len() {
            return Err(invalid(format!("Unknown agent id {}", agent.0)));
        }
        if !is_valid_name(&spec.name) {
            return Err(invalid(format!("'{}' is not a valid node name", spec.name)));
        }
        let node_key = key(&spec.name);
        if let Some(&existing) = self.name_to_node.get(&node_key) {
            return Err(invalid(format!(
                "Node '{}' has already been declared at {}",
                spec.name, self.nodes[existing.0].location
            )));
        }
        if self.name_to_aggregate.contains_key(&node_key) {
            return Err(invalid(format!(
                "'{}' is already declared as an aggregate",
                spec.name
            )));
        }

        // Outputs: the default tag first, then the explicitly produced ones.
        let mut tags = vec![default_tag_name(&spec.name)];
        for tag in &spec.produces {
            if !is_valid_tag_name(tag) {
                return Err(invalid(format!(
                    "Invalid tag name '{}'; tag names must begin with '#'",
                    tag
                )));
            }
            if tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                return Err(invalid(format!(
                    "Tag '{}' is listed more than once for node '{}'",
                    tag, spec.name
                )));
            }
            tags.push(tag.clone());
        }
        for tag in &tags {
            if let Some(&existing) = self.tag_to_output.get(&key(tag)) {
                let producer = self.outputs[existing.0].producer;
                return Err(invalid(format!(
                    "Tag '{}' is already produced by node '{}'",
                    tag, self.nodes[producer.0].name
                )));
            }
        }

        let mut inputs = Vec::new();
        for &output in &spec.inputs {
            if output.0 >= self.outputs.len() {
                return Err(invalid(format!("Unknown output id {}", output.0)));
            }
            if !inputs.contains(&output) {
                inputs.push(output);
            }
        }
        let mut after = Vec::new();
        for &dep in &spec.after {
            if dep.0 >= self.nodes.len() {
                return Err(invalid(format!("Unknown node id {}", dep.0)));
            }
            if !after.contains(&dep) {
                after.push(dep);
            }
        }

        let (input_dependencies, order_dependencies) = self.closures(&inputs, &after);
        let position = self.agents[agent.0].nodes.len();
        self.check_agent_order(agent, &spec.name, &order_dependencies, position)?;

        let id = NodeId(self.nodes.len());
        let mut outputs = Vec::with_capacity(tags.len());
        for tag in tags {
            let output = OutputId(self.outputs.len());
            self.tag_to_output.insert(key(&tag), output);
            self.outputs.push(NodeOutput {
                tag_name: tag,
                producer: id,
            });
            outputs.push(output);
        }

        debug!(
            node = %spec.name,
            agent = %self.agents[agent.0].name,
            inputs = inputs.len(),
            order_deps = order_dependencies.len(),
            "Added node"
        );

        self.name_to_node.insert(node_key, id);
        self.agents[agent.0].nodes.push(id);
        self.nodes.push(Node {
            name: spec.name,
            agent,
            inputs,
            outputs,
            after,
            input_dependencies,
            order_dependencies,
            required_tokens: spec.required_tokens,
            run_early: spec.run_early,
            notify_on_warnings: spec.notify_on_warnings,
            annotations: spec.annotations,
            notify_users: BTreeSet::new(),
            notify_submitters: BTreeSet::new(),
            tasks: Vec::new(),
            location: spec.location,
        });
        Ok(id)
    }

    /// Input and order dependency closures for a node consuming `inputs`
    /// and ordered after `after`.
    pub(crate) fn closures(
        &self,
        inputs: &[OutputId],
        after: &[NodeId],
    ) -> (BTreeSet<NodeId>, BTreeSet<NodeId>) {
        let mut input_dependencies = BTreeSet::new();
        for output in inputs {
            let producer = self.outputs[output.0].producer;
            input_dependencies.insert(producer);
            input_dependencies.extend(self.nodes[producer.0].input_dependencies.iter().copied());
        }

        let mut order_dependencies = BTreeSet::new();
        for dep in input_dependencies.iter().chain(after.iter()) {
            order_dependencies.insert(*dep);
            order_dependencies.extend(self.nodes[dep.0].order_dependencies.iter().copied());
        }
        (input_dependencies, order_dependencies)
    }

    /// A node at `position` within `agent` may only depend on nodes of the
    /// same agent declared before it.
    pub(crate) fn check_agent_order(
        &self,
        agent: AgentId,
        node_name: &str,
        dependencies: &BTreeSet<NodeId>,
        position: usize,
    ) -> Result<()> {
        let agent_nodes = &self.agents[agent.0].nodes;
        for dep in dependencies {
            if self.nodes[dep.0].agent != agent {
                continue;
            }
            match agent_nodes.iter().position(|n| n == dep) {
                Some(index) if index < position => {}
                _ => {
                    return Err(invalid(format!(
                        "Node '{}' depends on '{}', which is declared after it in agent '{}'",
                        node_name, self.nodes[dep.0].name, self.agents[agent.0].name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.name_to_node.get(&key(name)).copied()
    }

    // ── Outputs ─────────────────────────────────────────────────

    pub fn output(&self, id: OutputId) -> &NodeOutput {
        &self.outputs[id.0]
    }

    pub fn outputs(&self) -> &[NodeOutput] {
        &self.outputs
    }

    pub fn find_output(&self, tag: &str) -> Option<OutputId> {
        self.tag_to_output.get(&key(tag)).copied()
    }

    // ── Name resolution ─────────────────────────────────────────

    /// Resolve a `;`-separated list of node names, aggregate names and
    /// `#tags` to the set of nodes they refer to.
    pub fn resolve_references(&self, names: &str) -> Result<BTreeSet<NodeId>> {
        let mut nodes = BTreeSet::new();
        for name in split_list(names) {
            if name.starts_with('#') {
                match self.find_output(&name) {
                    Some(output) => {
                        nodes.insert(self.outputs[output.0].producer);
                    }
                    None => return Err(invalid(format!("Unable to find tag '{}'", name))),
                }
            } else if let Some(node) = self.find_node(&name) {
                nodes.insert(node);
            } else if let Some(aggregate) = self.find_aggregate(&name) {
                nodes.extend(aggregate.required_nodes.iter().copied());
            } else {
                return Err(self.unresolved(&name));
            }
        }
        Ok(nodes)
    }

    /// Resolve a `;`-separated list of node names, aggregate names and
    /// `#tags` to the outputs they refer to, in first-mention order.
    ///
    /// A node name stands for all of that node's outputs; an aggregate for
    /// all outputs of its nodes.
    pub fn resolve_outputs(&self, names: &str) -> Result<Vec<OutputId>> {
        let mut outputs = Vec::new();
        let push = |output: OutputId, outputs: &mut Vec<OutputId>| {
            if !outputs.contains(&output) {
                outputs.push(output);
            }
        };
        for name in split_list(names) {
            if name.starts_with('#') {
                match self.find_output(&name) {
                    Some(output) => push(output, &mut outputs),
                    None => return Err(invalid(format!("Unable to find tag '{}'", name))),
                }
            } else if let Some(node) = self.find_node(&name) {
                for &output in &self.nodes[node.0].outputs {
                    push(output, &mut outputs);
                }
            } else if let Some(aggregate) = self.find_aggregate(&name) {
                for node in &aggregate.required_nodes {
                    for &output in &self.nodes[node.0].outputs {
                        push(output, &mut outputs);
                    }
                }
            } else {
                return Err(self.unresolved(&name));
            }
        }
        Ok(outputs)
    }

    fn unresolved(&self, name: &str) -> BuildGraphError {
        let tag = default_tag_name(name);
        if self.find_output(&tag).is_some() {
            invalid(format!(
                "Unable to find node or aggregate named '{}'. Did you mean '{}'?",
                name, tag
            ))
        } else {
            invalid(format!(
                "Unable to find node or aggregate named '{}'",
                name
            ))
        }
    }

    // ── Reporting entities ──────────────────────────────────────

    pub fn add_aggregate(
        &mut self,
        name: &str,
        required_nodes: BTreeSet<NodeId>,
        location: ScriptLocation,
    ) -> Result<()> {
        if !is_valid_name(name) {
            return Err(invalid(format!("'{}' is not a valid aggregate name", name)));
        }
        let name_key = key(name);
        if self.name_to_node.contains_key(&name_key) {
            return Err(invalid(format!("'{}' is already declared as a node", name)));
        }
        if self.name_to_aggregate.contains_key(&name_key) {
            return Err(invalid(format!(
                "Aggregate '{}' has already been declared",
                name
            )));
        }
        self.name_to_aggregate.insert(name_key, self.aggregates.len());
        self.aggregates.push(Aggregate {
            name: name.to_string(),
            required_nodes,
            location,
        });
        Ok(())
    }

    pub fn find_aggregate(&self, name: &str) -> Option<&Aggregate> {
        self.name_to_aggregate
            .get(&key(name))
            .map(|&index| &self.aggregates[index])
    }

    pub fn aggregates(&self) -> &[Aggregate] {
        &self.aggregates
    }

    pub fn add_label(&mut self, label: Label) {
        self.labels.push(label);
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Add a badge over `targets`. The badge also tracks everything the
    /// targets consume, since a failure there is a failure of the badge.
    pub fn add_badge(
        &mut self,
        name: &str,
        project: Option<String>,
        change: Option<i64>,
        targets: BTreeSet<NodeId>,
        location: ScriptLocation,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(invalid("Badge name may not be empty".to_string()));
        }
        let mut nodes = targets.clone();
        for target in &targets {
            nodes.extend(self.nodes[target.0].input_dependencies.iter().copied());
        }
        self.badges.push(Badge {
            name: name.to_string(),
            project,
            change,
            targets,
            nodes,
            location,
        });
        Ok(())
    }

    pub fn badges(&self) -> &[Badge] {
        &self.badges
    }

    pub fn add_report(
        &mut self,
        name: &str,
        nodes: BTreeSet<NodeId>,
        location: ScriptLocation,
    ) -> Result<()> {
        if !is_valid_name(name) {
            return Err(invalid(format!("'{}' is not a valid report name", name)));
        }
        let name_key = key(name);
        if self.name_to_report.contains_key(&name_key) {
            return Err(invalid(format!("Report '{}' has already been declared", name)));
        }
        self.name_to_report.insert(name_key, self.reports.len());
        self.reports.push(Report {
            name: name.to_string(),
            nodes,
            notify_users: BTreeSet::new(),
            location,
        });
        Ok(())
    }

    pub fn find_report_mut(&mut self, name: &str) -> Option<&mut Report> {
        match self.name_to_report.get(&key(name)) {
            Some(&index) => Some(&mut self.reports[index]),
            None => None,
        }
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    /// Add an artifact published from one tagged output.
    pub fn add_artifact(&mut self, mut artifact: Artifact) -> Result<()> {
        if !is_valid_name(&artifact.name) {
            return Err(invalid(format!(
                "'{}' is not a valid artifact name",
                artifact.name
            )));
        }
        if self
            .artifacts
            .iter()
            .any(|a| a.name.eq_ignore_ascii_case(&artifact.name))
        {
            return Err(invalid(format!(
                "Artifact '{}' has already been declared",
                artifact.name
            )));
        }
        let output = self
            .find_output(&artifact.tag_name)
            .ok_or_else(|| invalid(format!("Unable to find tag '{}'", artifact.tag_name)))?;
        artifact.producer = self.outputs[output.0].producer;
        self.artifacts.push(artifact);
        Ok(())
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    // ── Diagnostics ─────────────────────────────────────────────

    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Send every deferred diagnostic to `sink`. Returns how many were errors.
    pub fn emit_diagnostics(&self, sink: &dyn DiagnosticSink) -> usize {
        let mut errors = 0;
        for diagnostic in &self.diagnostics {
            diagnostic.emit(sink);
            if diagnostic.severity == Severity::Error {
                errors += 1;
            }
        }
        errors
    }

    // ── Summary ─────────────────────────────────────────────────

    fn tag_names(&self, ids: &[OutputId]) -> Vec<String> {
        ids.iter()
            .map(|o| self.outputs[o.0].tag_name.clone())
            .collect()
    }

    fn node_names<'a>(&self, ids: impl IntoIterator<Item = &'a NodeId>) -> Vec<String> {
        ids.into_iter()
            .map(|n| self.nodes[n.0].name.clone())
            .collect()
    }

    pub fn summary(&self) -> GraphSummary {
        let agents = self
            .agents
            .iter()
            .map(|agent| AgentSummary {
                name: agent.name.clone(),
                types: agent.types.clone(),
                nodes: agent
                    .nodes
                    .iter()
                    .map(|&id| {
                        let node = &self.nodes[id.0];
                        NodeSummary {
                            name: node.name.clone(),
                            requires: self.tag_names(&node.inputs),
                            produces: self.tag_names(&node.outputs[1..]),
                            after: self.node_names(&node.after),
                            order_dependencies: self.node_names(&node.order_dependencies),
                            tasks: node.tasks.iter().map(|t| t.name.clone()).collect(),
                            annotations: node.annotations.clone(),
                        }
                    })
                    .collect(),
            })
            .collect();

        GraphSummary {
            agents,
            aggregates: self
                .aggregates
                .iter()
                .map(|a| (a.name.clone(), self.node_names(&a.required_nodes)))
                .collect(),
            labels: self
                .labels
                .iter()
                .map(|l| (l.display_name().to_string(), self.node_names(&l.included_nodes)))
                .collect(),
            badges: self
                .badges
                .iter()
                .map(|b| (b.name.clone(), self.node_names(&b.targets)))
                .collect(),
            reports: self
                .reports
                .iter()
                .map(|r| (r.name.clone(), self.node_names(&r.nodes)))
                .collect(),
            artifacts: self
                .artifacts
                .iter()
                .map(|a| (a.name.clone(), a.tag_name.clone()))
                .collect(),
        }
    }
}

fn same_types(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

/// Serializable overview of a graph, used by `buildgraph list`.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub agents: Vec<AgentSummary>,
    pub aggregates: BTreeMap<String, Vec<String>>,
    pub labels: BTreeMap<String, Vec<String>>,
    pub badges: BTreeMap<String, Vec<String>>,
    pub reports: BTreeMap<String, Vec<String>>,
    pub artifacts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub types: Vec<String>,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub name: String,
    pub requires: Vec<String>,
    pub produces: Vec<String>,
    pub after: Vec<String>,
    pub order_dependencies: Vec<String>,
    pub tasks: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for agent in &self.agents {
            if agent.types.is_empty() {
                writeln!(f, "Agent: {}", agent.name)?;
            } else {
                writeln!(f, "Agent: {} ({})", agent.name, agent.types.join(";"))?;
            }
            for node in &agent.nodes {
                writeln!(f, "    Node: {}", node.name)?;
                if !node.requires.is_empty() {
                    writeln!(f, "        Requires: {}", node.requires.join(";"))?;
                }
                if !node.produces.is_empty() {
                    writeln!(f, "        Produces: {}", node.produces.join(";"))?;
                }
                if !node.order_dependencies.is_empty() {
                    writeln!(f, "        After: {}", node.order_dependencies.join(";"))?;
                }
            }
        }
        for (name, nodes) in &self.aggregates {
            writeln!(f, "Aggregate: {} ({})", name, nodes.join(";"))?;
        }
        for (name, nodes) in &self.labels {
            writeln!(f, "Label: {} ({})", name, nodes.join(";"))?;
        }
        for (name, nodes) in &self.badges {
            writeln!(f, "Badge: {} ({})", name, nodes.join(";"))?;
        }
        for (name, nodes) in &self.reports {
            writeln!(f, "Report: {} ({})", name, nodes.join(";"))?;
        }
        for (name, tag) in &self.artifacts {
            writeln!(f, "Artifact: {} ({})", name, tag)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_agent() -> (BuildGraph, AgentId) {
        let mut graph = BuildGraph::new();
        let agent = graph
            .add_agent("Win64", vec!["Win64".into()], ScriptLocation::default())
            .unwrap();
        (graph, agent)
    }

    #[test]
    fn test_default_output_is_first() {
        let (mut graph, agent) = graph_with_agent();
        let a = graph
            .add_node(agent, NodeSpec::new("Compile").with_produces(vec!["#Binaries".into()]))
            .unwrap();

        let node = graph.node(a);
        assert_eq!(graph.output(node.default_output()).tag_name, "#Compile");
        assert_eq!(node.outputs.len(), 2);
        assert_eq!(graph.find_output("#binaries"), Some(node.outputs[1]));
    }

    #[test]
    fn test_order_dependency_closure() {
        let (mut graph, agent) = graph_with_agent();
        let a = graph
            .add_node(agent, NodeSpec::new("A").with_produces(vec!["#A Out".into()]))
            .unwrap();
        let tag = graph.find_output("#A Out").unwrap();
        let b = graph
            .add_node(agent, NodeSpec::new("B").with_inputs(vec![tag]))
            .unwrap();
        let c = graph
            .add_node(agent, NodeSpec::new("C").with_after(vec![b]))
            .unwrap();

        let c = graph.node(c);
        assert!(c.input_dependencies.is_empty());
        assert!(c.order_dependencies.contains(&a));
        assert!(c.order_dependencies.contains(&b));
        assert_eq!(graph.node(b).input_dependencies, BTreeSet::from([a]));
    }

    #[test]
    fn test_duplicate_node_and_tag_rejected() {
        let (mut graph, agent) = graph_with_agent();
        graph
            .add_node(agent, NodeSpec::new("A").with_produces(vec!["#Shared".into()]))
            .unwrap();

        let err = graph.add_node(agent, NodeSpec::new("a")).unwrap_err();
        assert!(err.to_string().contains("already been declared"));

        let err = graph
            .add_node(agent, NodeSpec::new("B").with_produces(vec!["#shared".into()]))
            .unwrap_err();
        assert!(err.to_string().contains("already produced by node 'A'"));

        let err = graph
            .add_node(agent, NodeSpec::new("C").with_produces(vec!["NoHash".into()]))
            .unwrap_err();
        assert!(err.to_string().contains("must begin with '#'"));
    }

    #[test]
    fn test_agent_type_conflict() {
        let (mut graph, agent) = graph_with_agent();
        assert_eq!(
            graph.add_agent("win64", vec![], ScriptLocation::default()).unwrap(),
            agent
        );
        assert!(graph
            .add_agent("Win64", vec!["Linux".into()], ScriptLocation::default())
            .is_err());
    }

    #[test]
    fn test_resolve_names_and_aggregates() {
        let (mut graph, agent) = graph_with_agent();
        let a = graph
            .add_node(agent, NodeSpec::new("A").with_produces(vec!["#Extra".into()]))
            .unwrap();
        let b = graph.add_node(agent, NodeSpec::new("B")).unwrap();
        graph
            .add_aggregate("All", BTreeSet::from([a, b]), ScriptLocation::default())
            .unwrap();

        assert_eq!(graph.resolve_references("All").unwrap(), BTreeSet::from([a, b]));
        assert_eq!(graph.resolve_references("#Extra").unwrap(), BTreeSet::from([a]));
        assert_eq!(graph.resolve_outputs("A").unwrap().len(), 2);
        assert_eq!(graph.resolve_outputs("All;#A").unwrap().len(), 3);
    }

    #[test]
    fn test_unresolved_name_suggests_tag() {
        let (mut graph, agent) = graph_with_agent();
        graph
            .add_node(agent, NodeSpec::new("A").with_produces(vec!["#Editor".into()]))
            .unwrap();

        let err = graph.resolve_outputs("Editor").unwrap_err();
        assert!(err.to_string().contains("Did you mean '#Editor'?"));

        let err = graph.resolve_outputs("Missing").unwrap_err();
        assert!(!err.to_string().contains("Did you mean"));
    }

    #[test]
    fn test_badge_includes_input_dependencies() {
        let (mut graph, agent) = graph_with_agent();
        let a = graph.add_node(agent, NodeSpec::new("A")).unwrap();
        let tag = graph.find_output("#A").unwrap();
        let b = graph
            .add_node(agent, NodeSpec::new("B").with_inputs(vec![tag]))
            .unwrap();
        graph
            .add_badge("Editor", None, None, BTreeSet::from([b]), ScriptLocation::default())
            .unwrap();

        assert_eq!(graph.badges()[0].nodes, BTreeSet::from([a, b]));
    }

    #[test]
    fn test_emit_diagnostics_counts_errors() {
        let (mut graph, _) = graph_with_agent();
        for (severity, message) in [
            (Severity::Info, "Reading"),
            (Severity::Warning, "Deprecated"),
            (Severity::Error, "Broken"),
        ] {
            graph.add_diagnostic(Diagnostic {
                location: ScriptLocation::new("Graph.xml", 3),
                severity,
                message: message.into(),
                node: None,
                agent: None,
            });
        }

        let sink = buildgraph_test_utils::CollectingSink::new();
        assert_eq!(graph.emit_diagnostics(&sink), 1);
        assert_eq!(sink.lines()[2], "Graph.xml(3): error: Broken");
    }

    #[test]
    fn test_summary_display() {
        let (mut graph, agent) = graph_with_agent();
        graph.add_node(agent, NodeSpec::new("A")).unwrap();
        let text = graph.summary().to_string();
        assert!(text.contains("Agent: Win64 (Win64)"));
        assert!(text.contains("    Node: A"));
    }
}
