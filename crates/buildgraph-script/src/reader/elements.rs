use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use buildgraph_graph::{Artifact, Label, LabelChange, NodeId, NodeSpec};

use super::ScriptReader;
use crate::document::ElementId;

impl<'a> ScriptReader<'a> {
    pub(super) fn read_agent(&mut self, id: ElementId) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        let types = self.list_attribute(id, "Type");
        let location = self.location(id);

        let agent = match self.graph.add_agent(&name, types, location) {
            Ok(agent) => agent,
            Err(e) => {
                self.error(id, e.to_string());
                return;
            }
        };

        let outer = self.current_agent.replace(agent);
        self.with_scope(|reader| reader.read_contents(id, Self::read_agent_element));
        self.current_agent = outer;
    }

    pub(super) fn read_node(&mut self, id: ElementId) {
        let Some(agent) = self.current_agent else {
            self.error(id, "Nodes must be declared inside an agent");
            return;
        };
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };

        let requires = self.attribute(id, "Requires");
        let inputs = match self.graph.resolve_outputs(&requires) {
            Ok(inputs) => inputs,
            Err(e) => {
                self.error(id, format!("Node '{}': {}", name, e));
                return;
            }
        };
        let after = self.attribute(id, "After");
        let Some(after) = self.resolve_nodes(id, &after) else {
            return;
        };
        let annotations = match parse_annotations(&self.attribute(id, "Annotations")) {
            Ok(annotations) => annotations,
            Err(message) => {
                self.error(id, message);
                return;
            }
        };

        let spec = NodeSpec {
            name: name.clone(),
            inputs,
            produces: self.list_attribute(id, "Produces"),
            after: after.into_iter().collect(),
            required_tokens: self
                .list_attribute(id, "Token")
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            run_early: self.bool_attribute(id, "RunEarly", false),
            notify_on_warnings: self.bool_attribute(id, "NotifyOnWarnings", true),
            annotations,
            location: self.location(id),
        };

        let node = match self.graph.add_node(agent, spec) {
            Ok(node) => node,
            Err(e) => {
                self.error(id, e.to_string());
                return;
            }
        };

        let outer = self.current_node.replace(node);
        self.with_scope(|reader| reader.read_contents(id, Self::read_node_element));
        self.current_node = outer;
    }

    pub(super) fn read_aggregate(&mut self, id: ElementId) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        let names = format!(
            "{};{}",
            self.attribute(id, "Requires"),
            self.attribute(id, "Include")
        );
        let Some(nodes) = self.resolve_nodes(id, &names) else {
            return;
        };
        let location = self.location(id);
        if let Err(e) = self.graph.add_aggregate(&name, nodes, location) {
            self.error(id, e.to_string());
        }
    }

    /// Nodes named by `names` plus everything they are ordered after.
    fn resolve_with_dependencies(&mut self, id: ElementId, names: &str) -> Option<BTreeSet<NodeId>> {
        let nodes = self.resolve_nodes(id, names)?;
        let mut all = nodes.clone();
        for node in nodes {
            all.extend(self.graph.node(node).order_dependencies.iter().copied());
        }
        Some(all)
    }

    pub(super) fn read_label(&mut self, id: ElementId) {
        let name = self.optional_attribute(id, "Name").filter(|n| !n.is_empty());
        let ugs_badge = self.optional_attribute(id, "UgsBadge").filter(|n| !n.is_empty());
        if name.is_none() && ugs_badge.is_none() {
            self.error(id, "Label must have a Name or a UgsBadge attribute");
            return;
        }

        let change_text = self.attribute(id, "Change");
        let Some(change) = LabelChange::parse(&change_text) else {
            self.error(id, format!("Invalid label change type '{}'", change_text));
            return;
        };

        let requires = self.attribute(id, "Requires");
        let include = self.attribute(id, "Include");
        let exclude = self.attribute(id, "Exclude");
        let Some(required_nodes) = self.resolve_nodes(id, &requires) else {
            return;
        };
        let Some(mut included_nodes) =
            self.resolve_with_dependencies(id, &format!("{};{}", requires, include))
        else {
            return;
        };
        let Some(excluded) = self.resolve_with_dependencies(id, &exclude) else {
            return;
        };
        included_nodes.retain(|n| !excluded.contains(n));

        let label = Label {
            name,
            category: self.optional_attribute(id, "Category").filter(|c| !c.is_empty()),
            ugs_badge,
            ugs_project: self.optional_attribute(id, "UgsProject").filter(|p| !p.is_empty()),
            change,
            required_nodes,
            included_nodes,
            location: self.location(id),
        };
        self.graph.add_label(label);
    }

    pub(super) fn read_badge(&mut self, id: ElementId) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        let project = self.optional_attribute(id, "Project").filter(|p| !p.is_empty());
        let change = match self.optional_attribute(id, "Change").filter(|c| !c.is_empty()) {
            None => None,
            Some(text) => match text.trim().parse::<i64>() {
                Ok(change) => Some(change),
                Err(_) => {
                    self.error(id, format!("Invalid badge change number '{}'", text));
                    return;
                }
            },
        };
        let names = format!(
            "{};{}",
            self.attribute(id, "Targets"),
            self.attribute(id, "Requires")
        );
        let Some(targets) = self.resolve_nodes(id, &names) else {
            return;
        };
        let location = self.location(id);
        if let Err(e) = self.graph.add_badge(&name, project, change, targets, location) {
            self.error(id, e.to_string());
        }
    }

    pub(super) fn read_report(&mut self, id: ElementId) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        let requires = self.attribute(id, "Requires");
        let Some(nodes) = self.resolve_with_dependencies(id, &requires) else {
            return;
        };
        let location = self.location(id);
        if let Err(e) = self.graph.add_report(&name, nodes, location) {
            self.error(id, e.to_string());
        }
    }

    pub(super) fn read_artifact(&mut self, id: ElementId) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
        let tag_name = non_empty(self.optional_attribute(id, "Tag"))
            .unwrap_or_else(|| format!("#{}", name));

        let artifact = Artifact {
            name,
            artifact_type: non_empty(self.optional_attribute(id, "Type")),
            description: non_empty(self.optional_attribute(id, "Description")),
            base_path: non_empty(self.optional_attribute(id, "BasePath")),
            keys: self.list_attribute(id, "Keys"),
            metadata: self.list_attribute(id, "Metadata"),
            tag_name,
            producer: NodeId(0),
            location: self.location(id),
        };
        if let Err(e) = self.graph.add_artifact(artifact) {
            self.error(id, e.to_string());
        }
    }

    /// `Notify`: add recipients to nodes and reports.
    ///
    /// `Targets` and `Except` include everything the named nodes are ordered
    /// after; `Nodes` names individual nodes.
    pub(super) fn read_notify(&mut self, id: ElementId) {
        let targets = self.attribute(id, "Targets");
        let except = self.attribute(id, "Except");
        let explicit = self.attribute(id, "Nodes");
        let Some(mut nodes) = self.resolve_with_dependencies(id, &targets) else {
            return;
        };
        let Some(excluded) = self.resolve_with_dependencies(id, &except) else {
            return;
        };
        nodes.retain(|n| !excluded.contains(n));
        let Some(explicit) = self.resolve_nodes(id, &explicit) else {
            return;
        };
        nodes.extend(explicit);

        let users = self.list_attribute(id, "Users");
        let submitters = self.list_attribute(id, "Submitters");
        let warnings = if self.documents.element(id).has_attribute("Warnings") {
            Some(self.bool_attribute(id, "Warnings", true))
        } else {
            None
        };

        for node in nodes {
            let node = self.graph.node_mut(node);
            node.notify_users.extend(users.iter().cloned());
            node.notify_submitters.extend(submitters.iter().cloned());
            if let Some(warnings) = warnings {
                node.notify_on_warnings = warnings;
            }
        }

        for report in self.list_attribute(id, "Reports") {
            match self.graph.find_report_mut(&report) {
                Some(report) => report.notify_users.extend(users.iter().cloned()),
                None => self.error(id, format!("Unknown report '{}'", report)),
            }
        }
    }
}

/// Parse `key=value;key=value` node annotations.
fn parse_annotations(text: &str) -> Result<BTreeMap<String, String>, String> {
    let mut annotations = BTreeMap::new();
    for entry in buildgraph_core::types::split_list(text) {
        match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                annotations.insert(key.trim().to_string(), value.trim().to_string());
            }
            _ => {
                return Err(format!(
                    "Invalid annotation '{}'; expected 'Key=Value'",
                    entry
                ))
            }
        }
    }
    Ok(annotations)
}
