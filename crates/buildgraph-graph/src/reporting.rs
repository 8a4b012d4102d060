use std::collections::BTreeSet;

use serde::Serialize;

use buildgraph_core::types::ScriptLocation;

use crate::node::NodeId;

/// A named alias for a set of nodes. Requiring an aggregate requires all of its nodes.
#[derive(Debug, Clone, Serialize)]
pub struct Aggregate {
    pub name: String,
    pub required_nodes: BTreeSet<NodeId>,
    pub location: ScriptLocation,
}

/// Which change a label's status is reported against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum LabelChange {
    #[default]
    Current,
    Code,
}

impl LabelChange {
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("current") || value.is_empty() {
            Some(LabelChange::Current)
        } else if value.eq_ignore_ascii_case("code") {
            Some(LabelChange::Code)
        } else {
            None
        }
    }
}

/// Dashboard label grouping a set of nodes.
#[derive(Debug, Clone, Serialize)]
pub struct Label {
    pub name: Option<String>,
    pub category: Option<String>,
    pub ugs_badge: Option<String>,
    pub ugs_project: Option<String>,
    pub change: LabelChange,
    /// Nodes whose success determines the label's state.
    pub required_nodes: BTreeSet<NodeId>,
    /// Nodes displayed under the label.
    pub included_nodes: BTreeSet<NodeId>,
    pub location: ScriptLocation,
}

impl Label {
    /// Display name: the explicit name, else the UGS badge name.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.ugs_badge.as_deref())
            .unwrap_or_default()
    }
}

/// A UGS badge summarising the result of a set of target nodes.
#[derive(Debug, Clone, Serialize)]
pub struct Badge {
    pub name: String,
    pub project: Option<String>,
    pub change: Option<i64>,
    pub targets: BTreeSet<NodeId>,
    /// Targets plus everything they transitively consume.
    pub nodes: BTreeSet<NodeId>,
    pub location: ScriptLocation,
}

/// A report sent once a set of nodes completes.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub name: String,
    pub nodes: BTreeSet<NodeId>,
    pub notify_users: BTreeSet<String>,
    pub location: ScriptLocation,
}

/// A published artifact backed by one tagged output.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub name: String,
    pub artifact_type: Option<String>,
    pub description: Option<String>,
    pub base_path: Option<String>,
    pub keys: Vec<String>,
    pub metadata: Vec<String>,
    pub tag_name: String,
    pub producer: NodeId,
    pub location: ScriptLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_change_parse() {
        assert_eq!(LabelChange::parse(""), Some(LabelChange::Current));
        assert_eq!(LabelChange::parse("CODE"), Some(LabelChange::Code));
        assert_eq!(LabelChange::parse("Latest"), None);
    }

    #[test]
    fn test_label_display_name_falls_back_to_badge() {
        let label = Label {
            name: None,
            category: Some("Platforms".into()),
            ugs_badge: Some("Win64".into()),
            ugs_project: None,
            change: LabelChange::Current,
            required_nodes: BTreeSet::new(),
            included_nodes: BTreeSet::new(),
            location: ScriptLocation::default(),
        };
        assert_eq!(label.display_name(), "Win64");
    }
}
