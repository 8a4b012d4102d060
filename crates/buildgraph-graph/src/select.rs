use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::info;

use buildgraph_core::error::{BuildGraphError, Result};

use crate::graph::{Agent, BuildGraph};
use crate::names::key;
use crate::node::{AgentId, NodeId, OutputId};

impl BuildGraph {
    /// Resolve `targets` (node names, aggregates or `#tags`) and select them.
    pub fn select_names(&self, targets: &str) -> Result<BuildGraph> {
        let nodes = self.resolve_references(targets)?;
        if nodes.is_empty() {
            return Err(BuildGraphError::UnknownTarget(targets.to_string()));
        }
        Ok(self.select(&nodes))
    }

    /// Copy of this graph reduced to `targets` and everything they consume.
    ///
    /// Order-only dependencies do not pull nodes in; they are filtered down
    /// to the retained set. Agents left without nodes are dropped, and
    /// aggregates, badges, labels, reports, artifacts and diagnostics are
    /// kept only where they still refer to retained nodes.
    pub fn select(&self, targets: &BTreeSet<NodeId>) -> BuildGraph {
        let mut retained: BTreeSet<NodeId> = BTreeSet::new();
        for target in targets {
            retained.insert(*target);
            retained.extend(self.nodes[target.0].input_dependencies.iter().copied());
        }

        let node_map: HashMap<NodeId, NodeId> = retained
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, NodeId(new)))
            .collect();
        let map_nodes = |set: &BTreeSet<NodeId>| -> BTreeSet<NodeId> {
            set.iter().filter_map(|n| node_map.get(n).copied()).collect()
        };

        let mut selected = BuildGraph::new();

        // Outputs of retained nodes, in original order.
        let mut output_map: HashMap<OutputId, OutputId> = HashMap::new();
        for (index, output) in self.outputs.iter().enumerate() {
            if let Some(&producer) = node_map.get(&output.producer) {
                let new_id = OutputId(selected.outputs.len());
                output_map.insert(OutputId(index), new_id);
                selected.tag_to_output.insert(key(&output.tag_name), new_id);
                let mut output = output.clone();
                output.producer = producer;
                selected.outputs.push(output);
            }
        }

        // Agents that still have nodes.
        let mut agent_map: HashMap<AgentId, AgentId> = HashMap::new();
        for (index, agent) in self.agents.iter().enumerate() {
            let nodes: Vec<NodeId> = agent
                .nodes
                .iter()
                .filter_map(|n| node_map.get(n).copied())
                .collect();
            if nodes.is_empty() {
                continue;
            }
            let new_id = AgentId(selected.agents.len());
            agent_map.insert(AgentId(index), new_id);
            selected.name_to_agent.insert(key(&agent.name), new_id);
            selected.agents.push(Agent {
                name: agent.name.clone(),
                types: agent.types.clone(),
                nodes,
                location: agent.location.clone(),
            });
        }

        for old in &retained {
            let mut node = self.nodes[old.0].clone();
            node.agent = agent_map[&node.agent];
            node.inputs = node.inputs.iter().filter_map(|o| output_map.get(o).copied()).collect();
            node.outputs = node.outputs.iter().filter_map(|o| output_map.get(o).copied()).collect();
            node.after = node.after.iter().filter_map(|n| node_map.get(n).copied()).collect();
            node.input_dependencies = map_nodes(&node.input_dependencies);
            node.order_dependencies = map_nodes(&node.order_dependencies);
            selected.name_to_node.insert(key(&node.name), node_map[old]);
            selected.nodes.push(node);
        }

        for aggregate in &self.aggregates {
            if aggregate.required_nodes.iter().all(|n| retained.contains(n)) {
                let mut aggregate = aggregate.clone();
                aggregate.required_nodes = map_nodes(&aggregate.required_nodes);
                selected
                    .name_to_aggregate
                    .insert(key(&aggregate.name), selected.aggregates.len());
                selected.aggregates.push(aggregate);
            }
        }

        for label in &self.labels {
            let mut label = label.clone();
            label.required_nodes = map_nodes(&label.required_nodes);
            label.included_nodes = map_nodes(&label.included_nodes);
            if !label.included_nodes.is_empty() || !label.required_nodes.is_empty() {
                selected.labels.push(label);
            }
        }

        for badge in &self.badges {
            if badge.targets.iter().all(|n| retained.contains(n)) {
                let mut badge = badge.clone();
                badge.targets = map_nodes(&badge.targets);
                badge.nodes = map_nodes(&badge.nodes);
                selected.badges.push(badge);
            }
        }

        for report in &self.reports {
            let mut report = report.clone();
            report.nodes = map_nodes(&report.nodes);
            if !report.nodes.is_empty() {
                selected
                    .name_to_report
                    .insert(key(&report.name), selected.reports.len());
                selected.reports.push(report);
            }
        }

        for artifact in &self.artifacts {
            if let Some(&producer) = node_map.get(&artifact.producer) {
                let mut artifact = artifact.clone();
                artifact.producer = producer;
                selected.artifacts.push(artifact);
            }
        }

        for diagnostic in &self.diagnostics {
            let node = match diagnostic.node {
                Some(n) => match node_map.get(&n) {
                    Some(&mapped) => Some(mapped),
                    None => continue,
                },
                None => None,
            };
            let agent = match diagnostic.agent {
                Some(a) => match agent_map.get(&a) {
                    Some(&mapped) => Some(mapped),
                    None => continue,
                },
                None => None,
            };
            let mut diagnostic = diagnostic.clone();
            diagnostic.node = node;
            diagnostic.agent = agent;
            selected.diagnostics.push(diagnostic);
        }

        info!(
            targets = targets.len(),
            retained = selected.nodes.len(),
            discarded = self.nodes.len() - selected.nodes.len(),
            "Selected graph targets"
        );
        selected
    }

    /// Check the structural invariants of the graph: every node only depends
    /// on nodes declared before it, dependencies within an agent respect
    /// declaration order, and each tag has exactly one producer.
    pub fn validate(&self) -> Result<()> {
        let mut seen_tags = HashSet::new();
        for (index, output) in self.outputs.iter().enumerate() {
            if !seen_tags.insert(key(&output.tag_name)) {
                return Err(BuildGraphError::InvalidGraph(format!(
                    "Tag '{}' has more than one producer",
                    output.tag_name
                )));
            }
            let producer = self.nodes.get(output.producer.0).ok_or_else(|| {
                BuildGraphError::InvalidGraph(format!(
                    "Tag '{}' refers to a missing producer",
                    output.tag_name
                ))
            })?;
            if !producer.outputs.contains(&OutputId(index)) {
                return Err(BuildGraphError::InvalidGraph(format!(
                    "Tag '{}' is not listed as an output of node '{}'",
                    output.tag_name, producer.name
                )));
            }
        }

        for (index, node) in self.nodes.iter().enumerate() {
            for input in &node.inputs {
                let producer = self.outputs[input.0].producer;
                if !node.input_dependencies.contains(&producer) {
                    return Err(BuildGraphError::InvalidGraph(format!(
                        "Node '{}' consumes '{}' without depending on its producer",
                        node.name, self.outputs[input.0].tag_name
                    )));
                }
            }
            if !node.input_dependencies.is_subset(&node.order_dependencies) {
                return Err(BuildGraphError::InvalidGraph(format!(
                    "Node '{}' has input dependencies missing from its order dependencies",
                    node.name
                )));
            }
            if let Some(dep) = node.order_dependencies.iter().find(|d| d.0 >= index) {
                return Err(BuildGraphError::InvalidGraph(format!(
                    "Dependency cycle: node '{}' depends on '{}', which is declared after it",
                    node.name, self.nodes[dep.0].name
                )));
            }
        }

        for (agent_index, agent) in self.agents.iter().enumerate() {
            for (position, id) in agent.nodes.iter().enumerate() {
                let node = &self.nodes[id.0];
                self.check_agent_order(
                    AgentId(agent_index),
                    &node.name,
                    &node.order_dependencies,
                    position,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Diagnostic;
    use crate::node::NodeSpec;
    use crate::reporting::{Artifact, Label, LabelChange};
    use buildgraph_core::types::{ScriptLocation, Severity};

    /// Win64: A -> B (consumes A); Linux: C (after B), D (independent).
    fn sample() -> BuildGraph {
        let mut graph = BuildGraph::new();
        let win = graph.add_agent("Win64", vec![], ScriptLocation::default()).unwrap();
        let linux = graph.add_agent("Linux", vec![], ScriptLocation::default()).unwrap();

        let a = graph.add_node(win, NodeSpec::new("A")).unwrap();
        let a_out = graph.find_output("#A").unwrap();
        let b = graph
            .add_node(win, NodeSpec::new("B").with_inputs(vec![a_out]))
            .unwrap();
        let c = graph
            .add_node(linux, NodeSpec::new("C").with_after(vec![b]))
            .unwrap();
        let d = graph.add_node(linux, NodeSpec::new("D")).unwrap();

        graph
            .add_aggregate("Everything", BTreeSet::from([a, b, c, d]), ScriptLocation::default())
            .unwrap();
        graph
            .add_aggregate("Windows", BTreeSet::from([a, b]), ScriptLocation::default())
            .unwrap();
        graph.add_label(Label {
            name: Some("Linux".into()),
            category: None,
            ugs_badge: None,
            ugs_project: None,
            change: LabelChange::Current,
            required_nodes: BTreeSet::from([d]),
            included_nodes: BTreeSet::from([d]),
            location: ScriptLocation::default(),
        });
        graph
            .add_artifact(Artifact {
                name: "Installer".into(),
                artifact_type: None,
                description: None,
                base_path: None,
                keys: vec![],
                metadata: vec![],
                tag_name: "#B".into(),
                producer: NodeId(0),
                location: ScriptLocation::default(),
            })
            .unwrap();
        graph.add_diagnostic(Diagnostic {
            location: ScriptLocation::default(),
            severity: Severity::Warning,
            message: "D is slow".into(),
            node: Some(d),
            agent: Some(linux),
        });
        graph
    }

    #[test]
    fn test_select_keeps_input_dependencies() {
        let graph = sample();
        let selected = graph.select_names("B").unwrap();

        let names: Vec<&str> = selected.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(selected.agents().len(), 1);
        assert!(selected.find_agent("Linux").is_none());
        assert!(selected.find_aggregate("Windows").is_some());
        assert!(selected.find_aggregate("Everything").is_none());
        assert!(selected.labels().is_empty());
        assert_eq!(selected.artifacts().len(), 1);
        assert!(selected.diagnostics().is_empty());
        selected.validate().unwrap();
    }

    #[test]
    fn test_select_prunes_order_dependencies() {
        let graph = sample();
        let selected = graph.select_names("C").unwrap();

        let names: Vec<&str> = selected.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["C"]);
        let c = selected.find_node("C").unwrap();
        assert!(selected.node(c).order_dependencies.is_empty());
        assert!(selected.node(c).after.is_empty());
        assert_eq!(selected.node(c).agent, AgentId(0));
        selected.validate().unwrap();
    }

    #[test]
    fn test_select_remaps_tags_and_diagnostics() {
        let graph = sample();
        let selected = graph.select_names("D;#B").unwrap();

        assert_eq!(selected.nodes().len(), 3);
        let d = selected.find_node("D").unwrap();
        let d_out = selected.find_output("#D").unwrap();
        assert_eq!(selected.output(d_out).producer, d);
        assert!(selected.find_output("#C").is_none());
        assert_eq!(selected.labels().len(), 1);
        assert_eq!(selected.diagnostics()[0].node, Some(d));
        selected.validate().unwrap();
    }

    #[test]
    fn test_select_unknown_target() {
        let graph = sample();
        assert!(graph.select_names("Missing").is_err());
        assert!(graph.select_names("").is_err());
    }

    #[test]
    fn test_validate_rejects_forward_dependency() {
        let mut graph = sample();
        graph.validate().unwrap();

        // Make A depend on B, which is declared after it.
        let b = graph.find_node("B").unwrap();
        let a = graph.find_node("A").unwrap();
        graph.node_mut(a).order_dependencies.insert(b);
        let err = graph.validate().unwrap_err();
        assert!(err.to_string().contains("declared after it"));
    }
}
