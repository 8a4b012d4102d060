//! Script reader: walks a document tree and builds a `BuildGraph`.
//!
//! Every element may carry an `If` condition. Properties are expanded in all
//! attribute values before use. Problems are reported to the diagnostic sink
//! and counted; reading carries on so one pass reports as many as possible,
//! and the read fails at the end if anything was counted.

mod control;
mod elements;
mod properties;
mod tasks;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use buildgraph_core::config::AppConfig;
use buildgraph_core::error::{BuildGraphError, Result};
use buildgraph_core::traits::DiagnosticSink;
use buildgraph_core::types::{format_diagnostic, split_list, ScriptLocation, Severity, TaskSchemas};
use buildgraph_graph::{AgentId, BuildGraph, NodeId};

use crate::condition::Condition;
use crate::document::{DocumentArena, ElementId};
use crate::macros::MacroTable;
use crate::scope::PropertyScopes;

pub use properties::apply_string_op;

/// Name of the root element of every script document.
pub const ROOT_ELEMENT: &str = "BuildGraph";

/// Inputs to a script read.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Directory `Exists()` conditions resolve against.
    pub root_dir: PathBuf,
    /// Properties placed in the outermost scope before reading.
    pub default_properties: BTreeMap<String, String>,
    /// Values for `Option` elements, usually from the command line.
    pub arguments: BTreeMap<String, String>,
    /// Separator used by `ForEach` when none is given.
    pub foreach_separator: char,
    /// Schemas that task elements inside nodes are bound against.
    pub schemas: TaskSchemas,
}

impl ReaderOptions {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            default_properties: BTreeMap::new(),
            arguments: BTreeMap::new(),
            foreach_separator: ';',
            schemas: TaskSchemas::new(),
        }
    }

    pub fn from_config(config: &AppConfig, schemas: TaskSchemas) -> Self {
        Self {
            root_dir: config.workspace_root(),
            default_properties: config.script.properties.clone(),
            arguments: BTreeMap::new(),
            foreach_separator: config.script.foreach_separator,
            schemas,
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn with_schemas(mut self, schemas: TaskSchemas) -> Self {
        self.schemas = schemas;
        self
    }
}

/// Read the script at `path` into a graph.
///
/// Errors found while reading are reported to `sink` as they are found. If
/// there were any, the result is `BuildGraphError::Script` listing them all.
pub fn read_script(
    path: &Path,
    options: &ReaderOptions,
    sink: &dyn DiagnosticSink,
) -> Result<BuildGraph> {
    let mut reader = ScriptReader::new(options, sink);
    let root = reader.documents.load(path)?;
    reader.read_document(root, path);
    reader.finish()
}

/// Read a script from memory. `file` is only used for locations and for
/// resolving `Include` paths.
pub fn read_script_str(
    text: &str,
    file: &Path,
    options: &ReaderOptions,
    sink: &dyn DiagnosticSink,
) -> Result<BuildGraph> {
    let mut reader = ScriptReader::new(options, sink);
    let root = reader.documents.parse(text, file)?;
    reader.read_document(root, file);
    reader.finish()
}

/// Continuation used by control elements to read their children with the
/// grammar of the scope they appear in.
type ReadBody<'a> = fn(&mut ScriptReader<'a>, ElementId);

const MAX_MACRO_DEPTH: usize = 64;

pub(crate) struct ScriptReader<'a> {
    options: &'a ReaderOptions,
    sink: &'a dyn DiagnosticSink,
    documents: DocumentArena,
    scopes: PropertyScopes,
    macros: MacroTable,
    graph: BuildGraph,
    errors: Vec<String>,
    used_arguments: HashSet<String>,
    include_stack: Vec<PathBuf>,
    macro_depth: usize,
    root_location: ScriptLocation,
    current_agent: Option<AgentId>,
    current_node: Option<NodeId>,
}

impl<'a> ScriptReader<'a> {
    fn new(options: &'a ReaderOptions, sink: &'a dyn DiagnosticSink) -> Self {
        let mut scopes = PropertyScopes::new();
        scopes.declare("RootDir", &options.root_dir.display().to_string());
        scopes.declare("HostPlatform", host_platform());
        for (name, value) in &options.default_properties {
            scopes.declare(name, value);
        }

        Self {
            options,
            sink,
            documents: DocumentArena::new(),
            scopes,
            macros: MacroTable::new(),
            graph: BuildGraph::new(),
            errors: Vec::new(),
            used_arguments: HashSet::new(),
            include_stack: Vec::new(),
            macro_depth: 0,
            root_location: ScriptLocation::default(),
            current_agent: None,
            current_node: None,
        }
    }

    fn read_document(&mut self, root: ElementId, path: &Path) {
        self.root_location = self.location(root);
        info!(script = %path.display(), "Reading build graph script");

        if self.documents.element(root).name != ROOT_ELEMENT {
            let name = self.documents.element(root).name.clone();
            self.error(
                root,
                format!("Expected root element '{}', found '{}'", ROOT_ELEMENT, name),
            );
            return;
        }
        self.include_stack.push(control::include_key(path));
        self.read_contents(root, Self::read_graph_element);
        self.include_stack.pop();
    }

    fn finish(self) -> Result<BuildGraph> {
        for name in self.options.arguments.keys() {
            if !self.used_arguments.contains(&name.to_ascii_lowercase()) {
                self.sink.report(
                    &self.root_location,
                    Severity::Warning,
                    &format!("Argument '{}' does not match any option", name),
                );
            }
        }

        if !self.errors.is_empty() {
            return Err(BuildGraphError::Script {
                errors: self.errors,
            });
        }

        info!(
            agents = self.graph.agents().len(),
            nodes = self.graph.nodes().len(),
            macros = self.macros.len(),
            elements = self.documents.len(),
            "Read build graph"
        );
        Ok(self.graph)
    }

    // ── Diagnostics ─────────────────────────────────────────────

    fn location(&self, id: ElementId) -> ScriptLocation {
        self.documents.location(id).clone()
    }

    fn error(&mut self, id: ElementId, message: impl Into<String>) {
        let location = self.location(id);
        let message = message.into();
        self.sink.report(&location, Severity::Error, &message);
        self.errors
            .push(format_diagnostic(&location, Severity::Error, &message));
    }

    fn warning(&self, id: ElementId, message: impl Into<String>) {
        self.sink
            .report(self.documents.location(id), Severity::Warning, &message.into());
    }

    // ── Attributes ──────────────────────────────────────────────

    fn element_name(&self, id: ElementId) -> String {
        self.documents.element(id).name.clone()
    }

    fn raw_attribute(&self, id: ElementId, name: &str) -> Option<String> {
        self.documents
            .element(id)
            .attribute(name)
            .map(str::to_string)
    }

    /// Expand property references in `text`, warning about undefined ones.
    fn expand(&self, id: ElementId, text: &str) -> String {
        let mut missing = Vec::new();
        let value = self
            .scopes
            .expand(text, |name| missing.push(name.to_string()));
        for name in missing {
            self.warning(id, format!("Property '{}' is not defined", name));
        }
        value
    }

    /// Expanded attribute value, or the empty string if it is absent.
    fn attribute(&self, id: ElementId, name: &str) -> String {
        self.optional_attribute(id, name).unwrap_or_default()
    }

    fn optional_attribute(&self, id: ElementId, name: &str) -> Option<String> {
        self.raw_attribute(id, name)
            .map(|raw| self.expand(id, &raw))
    }

    fn required_attribute(&mut self, id: ElementId, name: &str) -> Option<String> {
        match self.optional_attribute(id, name) {
            Some(value) => Some(value),
            None => {
                let element = self.element_name(id);
                self.error(
                    id,
                    format!("Missing required attribute '{}' on '{}'", name, element),
                );
                None
            }
        }
    }

    fn list_attribute(&self, id: ElementId, name: &str) -> Vec<String> {
        split_list(&self.attribute(id, name))
    }

    fn bool_attribute(&mut self, id: ElementId, name: &str, default: bool) -> bool {
        match self.optional_attribute(id, name) {
            None => default,
            Some(value) if value.trim().is_empty() => default,
            Some(value) => match parse_bool(&value) {
                Some(b) => b,
                None => {
                    self.error(
                        id,
                        format!("'{}' is not a valid boolean for attribute '{}'", value, name),
                    );
                    default
                }
            },
        }
    }

    // ── Conditions and scopes ───────────────────────────────────

    /// Whether the element's `If` condition holds. Elements without one always apply.
    fn condition_holds(&mut self, id: ElementId) -> bool {
        let Some(raw) = self.raw_attribute(id, "If") else {
            return true;
        };
        let text = self.expand(id, &raw);
        match Condition::parse(&text).and_then(|c| c.evaluate(&self.options.root_dir)) {
            Ok(result) => result,
            Err(e) => {
                self.error(id, format!("Error in condition \"{}\": {}", text, e));
                false
            }
        }
    }

    /// Run `f` inside a new property scope. The scope is always popped.
    fn with_scope(&mut self, f: impl FnOnce(&mut Self)) {
        self.scopes.push();
        let depth = self.scopes.depth();
        f(self);
        debug_assert_eq!(depth, self.scopes.depth());
        self.scopes.pop();
    }

    /// Read each child of `parent` whose condition holds.
    fn read_contents(&mut self, parent: ElementId, body: ReadBody<'a>) {
        let children = self.documents.element(parent).children.clone();
        for child in children {
            if self.condition_holds(child) {
                body(self, child);
            }
        }
    }

    fn set_property(&mut self, id: ElementId, name: &str, value: &str) {
        if let Err(message) = self.scopes.set(name, value) {
            self.error(id, message);
        }
    }

    /// Resolve `;`-separated node, aggregate and tag names, reporting failures.
    fn resolve_nodes(&mut self, id: ElementId, names: &str) -> Option<BTreeSet<NodeId>> {
        match self.graph.resolve_references(names) {
            Ok(nodes) => Some(nodes),
            Err(e) => {
                self.error(id, e.to_string());
                None
            }
        }
    }

    // ── Bodies ──────────────────────────────────────────────────

    /// Elements valid in any scope. Returns false if `id` is not one of them.
    fn read_common_element(&mut self, id: ElementId, body: ReadBody<'a>) -> bool {
        let name = self.element_name(id);
        match name.as_str() {
            "Property" => self.read_property(id),
            "EnvVar" => self.read_env_var(id),
            "Regex" => self.read_regex(id),
            "StringOp" => self.read_string_op(id),
            "Expand" => self.read_expand(id, body),
            "Do" => self.read_do(id, body),
            "Switch" => self.read_switch(id, body),
            "ForEach" => self.read_foreach(id, body),
            "Trace" => self.read_diagnostic(id, Severity::Info),
            "Warning" => self.read_diagnostic(id, Severity::Warning),
            "Error" => self.read_diagnostic(id, Severity::Error),
            _ => return false,
        }
        true
    }

    fn read_graph_element(&mut self, id: ElementId) {
        if self.read_common_element(id, Self::read_graph_element) {
            return;
        }
        let name = self.element_name(id);
        match name.as_str() {
            "Include" => self.read_include(id),
            "Option" => self.read_option(id),
            "Macro" => self.read_macro(id),
            "Extend" => self.read_extend(id),
            "Agent" => self.read_agent(id),
            "Aggregate" => self.read_aggregate(id),
            "Label" => self.read_label(id),
            "Badge" => self.read_badge(id),
            "Report" => self.read_report(id),
            "Artifact" => self.read_artifact(id),
            "Notify" => self.read_notify(id),
            "Node" => self.error(id, "Nodes must be declared inside an agent"),
            _ => self.error(id, format!("Invalid element '{}' at graph scope", name)),
        }
    }

    fn read_agent_element(&mut self, id: ElementId) {
        if self.read_common_element(id, Self::read_agent_element) {
            return;
        }
        let name = self.element_name(id);
        match name.as_str() {
            "Node" => self.read_node(id),
            _ => self.error(id, format!("Invalid element '{}' inside an agent", name)),
        }
    }

    fn read_node_element(&mut self, id: ElementId) {
        if self.read_common_element(id, Self::read_node_element) {
            return;
        }
        debug!(task = %self.documents.element(id).name, "Binding task");
        self.read_task(id);
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "windows" => "Win64",
        "macos" => "Mac",
        _ => "Linux",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildgraph_core::types::{ParameterKind, TagUsage, TaskParameter, TaskSchema};
    use buildgraph_graph::NodeId;
    use buildgraph_test_utils::CollectingSink;

    fn schemas() -> TaskSchemas {
        let mut schemas = TaskSchemas::new();
        schemas.insert(TaskSchema {
            name: "Log".into(),
            description: "Print a message".into(),
            parameters: vec![TaskParameter::required("Message", ParameterKind::String)],
        });
        schemas.insert(TaskSchema {
            name: "Copy".into(),
            description: "Copy files".into(),
            parameters: vec![
                TaskParameter::required("Files", ParameterKind::FileSpec).with_tags(TagUsage::Input),
                TaskParameter::optional("Tag", ParameterKind::TagList).with_tags(TagUsage::Output),
                TaskParameter::optional("Overwrite", ParameterKind::Boolean),
            ],
        });
        schemas
    }

    fn options() -> ReaderOptions {
        ReaderOptions::new(".").with_schemas(schemas())
    }

    fn read_with(text: &str, options: &ReaderOptions) -> (Result<BuildGraph>, CollectingSink) {
        let sink = CollectingSink::new();
        let result = read_script_str(text, Path::new("Graph.xml"), options, &sink);
        (result, sink)
    }

    fn read(text: &str) -> BuildGraph {
        let (result, sink) = read_with(text, &options());
        match result {
            Ok(graph) => graph,
            Err(e) => panic!("script failed: {e}\n{:?}", sink.lines()),
        }
    }

    fn read_errors(text: &str) -> Vec<String> {
        match read_with(text, &options()).0 {
            Ok(_) => panic!("script unexpectedly succeeded"),
            Err(BuildGraphError::Script { errors }) => errors,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    fn node_names(graph: &BuildGraph) -> Vec<&str> {
        graph.nodes().iter().map(|n| n.name.as_str()).collect()
    }

    fn node(graph: &BuildGraph, name: &str) -> NodeId {
        graph.find_node(name).unwrap()
    }

    #[test]
    fn test_agents_nodes_and_tasks() {
        let graph = read(
            r##"<BuildGraph>
  <Property Name="Platform" Value="Win64"/>
  <Agent Name="Compile Agent" Type="Win64;Win64_Licensee">
    <Node Name="Compile $(Platform)" Produces="#Binaries">
      <Log Message="Compiling for $(Platform)"/>
      <Copy Files="Source/main.cpp" Tag="#Binaries"/>
    </Node>
    <Node Name="Test" Requires="#Binaries">
      <Copy Files="#Binaries" Tag="#Test"/>
    </Node>
  </Agent>
  <Agent Name="Package Agent">
    <Node Name="Package" After="Test"/>
  </Agent>
</BuildGraph>"##,
        );

        assert_eq!(node_names(&graph), vec!["Compile Win64", "Test", "Package"]);
        assert_eq!(graph.agents()[0].types, vec!["Win64", "Win64_Licensee"]);

        let compile = graph.node(node(&graph, "Compile Win64"));
        assert_eq!(compile.tasks.len(), 2);
        assert_eq!(compile.tasks[0].argument("Message"), Some("Compiling for Win64"));
        assert_eq!(compile.tasks[0].location.line, 5);

        let test = graph.node(node(&graph, "Test"));
        assert_eq!(graph.output(test.inputs[0]).tag_name, "#Binaries");

        let package = graph.node(node(&graph, "Package"));
        assert!(package.input_dependencies.is_empty());
        assert!(package.depends_on(node(&graph, "Compile Win64")));
        assert!(package.depends_on(node(&graph, "Test")));
    }

    #[test]
    fn test_conditions_guard_elements() {
        let graph = read(
            r#"<BuildGraph>
  <Property Name="WithLinux" Value="false"/>
  <Agent Name="Linux" If="$(WithLinux)">
    <Node Name="Linux Compile"/>
  </Agent>
  <Agent Name="Win64" If="!$(WithLinux) And Exists('missing/file.txt') == false">
    <Node Name="Win64 Compile"/>
  </Agent>
</BuildGraph>"#,
        );
        assert_eq!(node_names(&graph), vec!["Win64 Compile"]);
        assert!(graph.find_agent("Linux").is_none());
    }

    #[test]
    fn test_condition_error_is_reported() {
        let errors = read_errors(
            r#"<BuildGraph>
  <Agent Name="A" If="1 &lt;">
    <Node Name="N"/>
  </Agent>
</BuildGraph>"#,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Graph.xml(2): error: Error in condition"));
    }

    #[test]
    fn test_outer_property_after_nested_set_is_error() {
        let errors = read_errors(
            r#"<BuildGraph>
  <Agent Name="A">
    <Node Name="N1">
      <Property Name="Foo" Value="1"/>
    </Node>
    <Property Name="Foo" Value="2"/>
  </Agent>
</BuildGraph>"#,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Graph.xml(6)"));
        assert!(errors[0].contains("already set in a nested scope"));
    }

    #[test]
    fn test_foreach_redeclares_in_each_iteration() {
        let graph = read(
            r#"<BuildGraph>
  <Agent Name="Compile">
    <ForEach Name="Platform" Values="Win64;Mac;Linux">
      <Property Name="NodeName" Value="Compile $(Platform)"/>
      <Node Name="$(NodeName)"/>
    </ForEach>
    <ForEach Name="Config" Values="Debug+Shipping" Separator="+">
      <Node Name="Cook $(Config)"/>
    </ForEach>
  </Agent>
</BuildGraph>"#,
        );
        assert_eq!(
            node_names(&graph),
            vec![
                "Compile Win64",
                "Compile Mac",
                "Compile Linux",
                "Cook Debug",
                "Cook Shipping"
            ]
        );
    }

    #[test]
    fn test_macro_expansion_and_extend() {
        let graph = read(
            r#"<BuildGraph>
  <Macro Name="CompileNode" Arguments="Platform" OptionalArguments="Suffix">
    <Node Name="Compile $(Platform)$(Suffix)"/>
  </Macro>
  <Extend Name="CompileNode">
    <Node Name="Cook $(Platform)$(Suffix)" Requires="Compile $(Platform)$(Suffix)"/>
  </Extend>
  <Agent Name="Build">
    <Expand Name="CompileNode" Platform="Win64"/>
    <Expand Name="CompileNode" Platform="Mac" Suffix=" Debug"/>
  </Agent>
</BuildGraph>"#,
        );
        assert_eq!(
            node_names(&graph),
            vec!["Compile Win64", "Cook Win64", "Compile Mac Debug", "Cook Mac Debug"]
        );
        let cook = graph.node(node(&graph, "Cook Mac Debug"));
        assert!(cook.depends_on(node(&graph, "Compile Mac Debug")));
    }

    #[test]
    fn test_macro_errors() {
        let errors = read_errors(
            r#"<BuildGraph>
  <Macro Name="M" Arguments="Platform">
    <Property Name="X" Value="$(Platform)"/>
  </Macro>
  <Expand Name="M" Suffix="x"/>
  <Expand Name="M"/>
  <Expand Name="Missing"/>
  <Macro Name="M"/>
</BuildGraph>"#,
        );
        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("does not take an argument 'Suffix'"));
        assert!(errors[1].contains("Missing argument 'Platform'"));
        assert!(errors[2].contains("Unknown macro 'Missing'"));
        assert!(errors[3].contains("already been declared"));
    }

    #[test]
    fn test_options_and_arguments() {
        let script = r#"<BuildGraph>
  <Option Name="Platforms" DefaultValue="Win64" Restrict="[A-Za-z0-9;]*" Description="Platforms to build"/>
  <Option Name="Config" DefaultValue="Development"/>
  <Agent Name="A">
    <ForEach Name="P" Values="$(Platforms)">
      <Node Name="Build $(P) $(Config)"/>
    </ForEach>
  </Agent>
</BuildGraph>"#;

        let graph = read(script);
        assert_eq!(node_names(&graph), vec!["Build Win64 Development"]);

        let overridden = options()
            .with_argument("platforms", "Win64;Linux")
            .with_argument("Unused", "1");
        let (result, sink) = read_with(script, &overridden);
        let graph = result.unwrap();
        assert_eq!(
            node_names(&graph),
            vec!["Build Win64 Development", "Build Linux Development"]
        );
        assert_eq!(
            sink.warnings(),
            vec!["Argument 'Unused' does not match any option"]
        );

        let restricted = options().with_argument("Platforms", "Win-64");
        let (result, sink) = read_with(script, &restricted);
        assert!(result.is_err());
        assert!(sink.errors()[0].contains("is not a valid value for option 'Platforms'"));
    }

    #[test]
    fn test_property_separator_and_parent_scope() {
        let graph = read(
            r#"<BuildGraph>
  <Property Name="List" Value="a"/>
  <Property Name="List" Value="b" Separator=","/>
  <Agent Name="A">
    <Do>
      <Property Name="Inner" Value="x" CreateInParentScope="true"/>
    </Do>
    <Node Name="N $(List) $(Inner)"/>
  </Agent>
</BuildGraph>"#,
        );
        assert_eq!(node_names(&graph), vec!["N a,b x"]);
    }

    #[test]
    fn test_missing_property_is_warning() {
        let (result, sink) = read_with(
            r#"<BuildGraph>
  <Agent Name="A">
    <Node Name="N$(Undefined)"/>
  </Agent>
</BuildGraph>"#,
            &options(),
        );
        let graph = result.unwrap();
        assert_eq!(node_names(&graph), vec!["N"]);
        assert_eq!(sink.warnings(), vec!["Property 'Undefined' is not defined"]);
    }

    #[test]
    fn test_unresolved_requires_suggests_tag() {
        let errors = read_errors(
            r##"<BuildGraph>
  <Agent Name="A">
    <Node Name="Tools Build" Produces="#Tools"/>
    <Node Name="B" Requires="Tools"/>
    <Node Name="C" Requires="#Missing"/>
  </Agent>
</BuildGraph>"##,
        );
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("Did you mean '#Tools'?"));
        assert_eq!(
            errors[1],
            "Graph.xml(5): error: Node 'C': Unable to find tag '#Missing'"
        );
    }

    #[test]
    fn test_task_binding_errors_accumulate() {
        let errors = read_errors(
            r##"<BuildGraph>
  <Agent Name="A">
    <Node Name="Compile" Produces="#Out">
      <Frobnicate/>
      <Log Message="x" Level="3"/>
      <Copy Tag="#Out"/>
      <Copy Files="#Elsewhere" Tag="#Out"/>
      <Copy Files="a.txt" Tag="#Other"/>
      <Copy Files="a.txt" Overwrite="maybe"/>
      <Copy Files="a.txt" Tag="#Out;#Compile" Overwrite="true"/>
    </Node>
  </Agent>
</BuildGraph>"##,
        );
        assert_eq!(errors.len(), 6, "{errors:#?}");
        assert!(errors[0].contains("(4): error: Unknown task 'Frobnicate'"));
        assert!(errors[1].contains("does not have a parameter 'Level'"));
        assert!(errors[2].contains("Missing required parameter 'Files'"));
        assert!(errors[3].contains("tag '#Elsewhere' is not required or produced"));
        assert!(errors[4].contains("tag '#Other' is not listed as an output"));
        assert!(errors[5].contains("'maybe' is not a valid boolean"));
    }

    #[test]
    fn test_switch_picks_first_matching_case() {
        let graph = read(
            r#"<BuildGraph>
  <Property Name="Config" Value="Shipping"/>
  <Agent Name="A">
    <Switch>
      <Case If="'$(Config)' == 'Debug'"><Node Name="Debug Node"/></Case>
      <Case If="'$(Config)' == 'shipping'"><Node Name="Shipping Node"/></Case>
      <Default><Node Name="Default Node"/></Default>
    </Switch>
  </Agent>
</BuildGraph>"#,
        );
        assert_eq!(node_names(&graph), vec!["Shipping Node"]);
    }

    #[test]
    fn test_diagnostics_are_deferred() {
        let graph = read(
            r#"<BuildGraph>
  <Warning Message="graph level"/>
  <Agent Name="A">
    <Node Name="N">
      <Error Message="never" If="false"/>
      <Trace Message="tracing $(HostPlatform)"/>
    </Node>
  </Agent>
</BuildGraph>"#,
        );
        let diagnostics = graph.diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(diagnostics[0].node, None);
        assert_eq!(diagnostics[1].severity, Severity::Info);
        assert_eq!(diagnostics[1].node, graph.find_node("N"));
        assert_eq!(diagnostics[1].message, format!("tracing {}", host_platform()));
    }

    #[test]
    fn test_regex_string_op_and_env_var() {
        std::env::set_var("BUILDGRAPH_READER_TEST_ENV", "env");
        let graph = read(
            r#"<BuildGraph>
  <Property Name="Version" Value="5.4.1"/>
  <Regex Pattern="(\d+)\.(\d+)\.(\d+)" Input="$(Version)" Capture="Major;Minor"/>
  <Regex Pattern="^x$" Input="y" Optional="true"/>
  <StringOp Input="Win64" Method="ToUpper" Output="Upper"/>
  <EnvVar Name="BUILDGRAPH_READER_TEST_ENV"/>
  <Agent Name="A">
    <Node Name="V$(Major)-$(Minor)-$(Upper)-$(BUILDGRAPH_READER_TEST_ENV)-$(Version:-1)"/>
  </Agent>
</BuildGraph>"#,
        );
        std::env::remove_var("BUILDGRAPH_READER_TEST_ENV");
        assert_eq!(node_names(&graph), vec!["V5-4-WIN64-env-1"]);
    }

    #[test]
    fn test_reporting_elements() {
        let graph = read(
            r##"<BuildGraph>
  <Agent Name="A">
    <Node Name="Compile" Produces="#Installer"/>
    <Node Name="Test" Requires="Compile"/>
  </Agent>
  <Report Name="Nightly" Requires="Test"/>
  <Aggregate Name="All" Requires="Compile;Test"/>
  <Label Category="Status" Name="Editor" Requires="Test"/>
  <Badge Name="Editor" Project="//Project/Main" Change="123" Targets="Test"/>
  <Artifact Name="Installer" Type="Package" Keys="a;b"/>
  <Notify Targets="Test" Users="alice;bob" Reports="Nightly" Warnings="false"/>
</BuildGraph>"##,
        );
        let compile = node(&graph, "Compile");
        let test = node(&graph, "Test");
        let both = BTreeSet::from([compile, test]);

        assert_eq!(graph.find_aggregate("all").unwrap().required_nodes, both);

        let label = &graph.labels()[0];
        assert_eq!(label.required_nodes, BTreeSet::from([test]));
        assert_eq!(label.included_nodes, both);

        let badge = &graph.badges()[0];
        assert_eq!(badge.change, Some(123));
        assert_eq!(badge.nodes, both);

        let report = &graph.reports()[0];
        assert_eq!(report.nodes, both);
        assert!(report.notify_users.contains("alice"));

        let artifact = &graph.artifacts()[0];
        assert_eq!(artifact.tag_name, "#Installer");
        assert_eq!(artifact.producer, compile);
        assert_eq!(artifact.keys, vec!["a", "b"]);

        for id in [compile, test] {
            let node = graph.node(id);
            assert!(node.notify_users.contains("bob"));
            assert!(!node.notify_on_warnings);
        }
    }

    #[test]
    fn test_include_reads_into_graph_scope() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Inc")).unwrap();
        std::fs::write(
            dir.path().join("Inc/Common.xml"),
            r#"<BuildGraph>
  <Property Name="Shared" Value="yes"/>
  <Agent Name="Shared Agent"><Node Name="Shared Node"/></Agent>
</BuildGraph>"#,
        )
        .unwrap();
        let main = dir.path().join("Main.xml");
        std::fs::write(
            &main,
            r#"<BuildGraph>
  <Include Script="Inc/*.xml"/>
  <Include Script="Inc/Missing.xml"/>
  <Agent Name="Main">
    <Node Name="Main $(Shared)" Requires="Shared Node"/>
  </Agent>
</BuildGraph>"#,
        )
        .unwrap();

        let sink = CollectingSink::new();
        let err = read_script(&main, &options(), &sink).unwrap_err();
        let BuildGraphError::Script { errors } = err else {
            panic!("expected script error");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Unable to include"));

        std::fs::write(
            &main,
            r#"<BuildGraph>
  <Include Script="Inc/*.xml"/>
  <Agent Name="Main">
    <Node Name="Main $(Shared)" Requires="Shared Node"/>
  </Agent>
</BuildGraph>"#,
        )
        .unwrap();
        let graph = read_script(&main, &options(), &sink).unwrap();
        assert_eq!(node_names(&graph), vec!["Shared Node", "Main yes"]);
        let shared = graph.node(node(&graph, "Shared Node"));
        assert!(shared.location.file.ends_with("Inc/Common.xml"));
    }

    #[test]
    fn test_include_cycle_through_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("Sub")).unwrap();
        let main = dir.path().join("Main.xml");
        std::fs::write(
            &main,
            r#"<BuildGraph>
  <Include Script="Sub/../Main.xml"/>
  <Agent Name="A"><Node Name="N"/></Agent>
</BuildGraph>"#,
        )
        .unwrap();

        let sink = CollectingSink::new();
        let err = read_script(&main, &options(), &sink).unwrap_err();
        let BuildGraphError::Script { errors } = err else {
            panic!("expected script error");
        };
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("includes itself"));
    }

    #[test]
    fn test_missing_script_file() {
        let sink = CollectingSink::new();
        let err = read_script(Path::new("does/not/exist.xml"), &options(), &sink).unwrap_err();
        assert!(matches!(err, BuildGraphError::ScriptNotFound(_)));
    }

    #[test]
    fn test_wrong_root_element() {
        let errors = read_errors("<Graph/>");
        assert!(errors[0].contains("Expected root element 'BuildGraph'"));
    }
}
