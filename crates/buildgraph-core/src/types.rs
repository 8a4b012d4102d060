use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ── Script locations ────────────────────────────────────────────

/// A `(file, line)` pair identifying where something was declared in a script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptLocation {
    pub file: PathBuf,
    pub line: usize,
}

impl ScriptLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for ScriptLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.file.display(), self.line)
    }
}

/// Severity of a script or graph diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Render a diagnostic the way build logs expect it: `file(line): error: message`.
pub fn format_diagnostic(location: &ScriptLocation, severity: Severity, message: &str) -> String {
    format!("{}: {}: {}", location, severity, message)
}

// ── Tasks ───────────────────────────────────────────────────────

/// A task invocation captured from a node body, with its arguments already
/// property-expanded and validated against the task's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub name: String,
    pub arguments: BTreeMap<String, String>,
    pub location: ScriptLocation,
}

impl TaskInfo {
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).map(|s| s.as_str())
    }
}

/// Value type of a task parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Boolean,
    Integer,
    Path,
    /// `;`-separated list of paths or `#tag` references.
    FileSpec,
    /// `;`-separated list of `#tag` names.
    TagList,
}

/// How a parameter's `#tag` references relate to the enclosing node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagUsage {
    #[default]
    None,
    /// Tags must be consumed (`Requires`) or produced earlier by the node.
    Input,
    /// Tags must be declared in the node's `Produces` list.
    Output,
}

/// Declarative description of one task parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParameter {
    pub name: String,
    pub kind: ParameterKind,
    pub required: bool,
    #[serde(default)]
    pub tags: TagUsage,
}

impl TaskParameter {
    pub fn required(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            tags: TagUsage::None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            tags: TagUsage::None,
        }
    }

    pub fn with_tags(mut self, usage: TagUsage) -> Self {
        self.tags = usage;
        self
    }
}

/// Schema for a task element: its name and the parameters it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<TaskParameter>,
}

impl TaskSchema {
    pub fn parameter(&self, name: &str) -> Option<&TaskParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Lookup table of task schemas handed to the script reader.
#[derive(Debug, Clone, Default)]
pub struct TaskSchemas {
    schemas: BTreeMap<String, TaskSchema>,
}

impl TaskSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: TaskSchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&TaskSchema> {
        self.schemas.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(|s| s.as_str())
    }
}

/// Mutable state handed to each task while a node executes.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Root directory all relative paths resolve against.
    pub workspace_root: PathBuf,
    /// Node the task belongs to.
    pub node_name: String,
    /// Files (relative to `workspace_root`) known for each tag so far, keyed
    /// by lowercased tag name. Use [`TaskContext::tagged_files`] to look up.
    pub tag_files: BTreeMap<String, BTreeSet<PathBuf>>,
    /// Every file written by tasks of this node so far.
    pub build_products: BTreeSet<PathBuf>,
}

impl TaskContext {
    pub fn new(workspace_root: impl Into<PathBuf>, node_name: impl Into<String>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            node_name: node_name.into(),
            tag_files: BTreeMap::new(),
            build_products: BTreeSet::new(),
        }
    }

    /// Record files written by a task.
    pub fn add_build_products<I>(&mut self, files: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.build_products.extend(files);
    }

    /// Record that `files` belong to `tag`.
    pub fn add_to_tag<I>(&mut self, tag: &str, files: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.tag_files
            .entry(tag.to_lowercase())
            .or_default()
            .extend(files);
    }

    /// Files recorded for `tag`. Tag names compare case-insensitively.
    pub fn tagged_files(&self, tag: &str) -> Option<&BTreeSet<PathBuf>> {
        self.tag_files.get(&tag.to_lowercase())
    }

    /// Resolve a `;`-separated file spec into workspace-relative paths.
    ///
    /// `#tag` items expand to that tag's files; anything else is a path
    /// relative to `base` (itself relative to the workspace root).
    pub fn resolve_file_spec(&self, spec: &str, base: &Path) -> Vec<PathBuf> {
        let mut files = BTreeSet::new();
        for item in spec.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if item.starts_with('#') {
                if let Some(tagged) = self.tagged_files(item) {
                    files.extend(tagged.iter().cloned());
                }
            } else {
                files.insert(base.join(item));
            }
        }
        files.into_iter().collect()
    }

    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.workspace_root.join(relative)
    }
}

/// Split a `;`-separated attribute into trimmed, non-empty items.
pub fn split_list(value: &str) -> Vec<String> {
    split_list_with(value, ';')
}

pub fn split_list_with(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
