use std::collections::BTreeMap;

use buildgraph_core::types::{split_list, ParameterKind, TagUsage, TaskInfo, TaskParameter};
use buildgraph_graph::{is_valid_tag_name, NodeId};

use super::{parse_bool, ScriptReader};
use crate::document::ElementId;

impl<'a> ScriptReader<'a> {
    /// Bind a task element inside a node body against its schema and append
    /// it to the node's task list.
    pub(super) fn read_task(&mut self, id: ElementId) {
        let Some(node) = self.current_node else {
            let name = self.element_name(id);
            self.error(id, format!("Invalid element '{}'", name));
            return;
        };

        let element = self.documents.element(id).clone();
        let options = self.options;
        let Some(schema) = options.schemas.get(&element.name) else {
            self.error(id, format!("Unknown task '{}'", element.name));
            return;
        };
        if !element.children.is_empty() {
            self.error(
                id,
                format!("Task '{}' may not contain child elements", element.name),
            );
            return;
        }

        let mut valid = true;
        let mut arguments = BTreeMap::new();
        for (attribute, raw) in &element.attributes {
            if attribute == "If" {
                continue;
            }
            let Some(parameter) = schema.parameter(attribute) else {
                self.error(
                    id,
                    format!("Task '{}' does not have a parameter '{}'", schema.name, attribute),
                );
                valid = false;
                continue;
            };
            let value = self.expand(id, raw);
            if let Err(message) = self.check_parameter(node, parameter, &value) {
                self.error(id, format!("Task '{}': {}", schema.name, message));
                valid = false;
            }
            arguments.insert(attribute.clone(), value);
        }

        for parameter in schema.parameters.iter().filter(|p| p.required) {
            if !arguments.contains_key(&parameter.name) {
                self.error(
                    id,
                    format!(
                        "Missing required parameter '{}' for task '{}'",
                        parameter.name, schema.name
                    ),
                );
                valid = false;
            }
        }

        if valid {
            let location = self.location(id);
            self.graph.node_mut(node).tasks.push(TaskInfo {
                name: schema.name.clone(),
                arguments,
                location,
            });
        }
    }

    /// Check a parameter value's type and that any tags it mentions are
    /// consumed or produced by `node` as the parameter requires.
    fn check_parameter(
        &self,
        node: NodeId,
        parameter: &TaskParameter,
        value: &str,
    ) -> Result<(), String> {
        match parameter.kind {
            ParameterKind::Boolean => {
                if parse_bool(value).is_none() {
                    return Err(format!(
                        "'{}' is not a valid boolean for parameter '{}'",
                        value, parameter.name
                    ));
                }
            }
            ParameterKind::Integer => {
                if value.trim().parse::<i64>().is_err() {
                    return Err(format!(
                        "'{}' is not a valid integer for parameter '{}'",
                        value, parameter.name
                    ));
                }
            }
            ParameterKind::TagList => {
                if let Some(item) = split_list(value).into_iter().find(|t| !is_valid_tag_name(t)) {
                    return Err(format!(
                        "'{}' is not a valid tag name for parameter '{}'",
                        item, parameter.name
                    ));
                }
            }
            ParameterKind::String | ParameterKind::Path | ParameterKind::FileSpec => {}
        }

        let tags: Vec<String> = split_list(value)
            .into_iter()
            .filter(|item| item.starts_with('#'))
            .collect();
        let node = self.graph.node(node);
        let has_tag = |outputs: &[buildgraph_graph::OutputId], tag: &str| {
            outputs
                .iter()
                .any(|o| self.graph.output(*o).tag_name.eq_ignore_ascii_case(tag))
        };

        match parameter.tags {
            TagUsage::None => {}
            TagUsage::Input => {
                for tag in &tags {
                    if !has_tag(&node.inputs, tag) && !has_tag(&node.outputs, tag) {
                        return Err(format!(
                            "tag '{}' is not required or produced by node '{}'",
                            tag, node.name
                        ));
                    }
                }
            }
            TagUsage::Output => {
                for tag in &tags {
                    if !has_tag(&node.outputs, tag) {
                        return Err(format!(
                            "tag '{}' is not listed as an output of node '{}'",
                            tag, node.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
