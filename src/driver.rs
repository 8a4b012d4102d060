//! Local execution driver.
//!
//! Runs the nodes of a selected graph in declaration order on this machine.
//! Inputs come from temp storage, outputs go back to it, and a node that
//! another machine (or an earlier run) completed is skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use buildgraph_core::config::AppConfig;
use buildgraph_core::error::{BuildGraphError, Result};
use buildgraph_core::traits::DiagnosticSink;
use buildgraph_core::types::{format_diagnostic, Severity, TaskContext};
use buildgraph_graph::{BuildGraph, Node};
use buildgraph_script::{read_script, ReaderOptions};
use buildgraph_storage::{TempStorage, TempStorageBlock};
use buildgraph_tasks::TaskRegistry;

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `;`-separated node, aggregate or tag names. Everything when unset.
    pub targets: Option<String>,
    /// Run just this node, taking its inputs from temp storage.
    pub single_node: Option<String>,
    /// Discard local temp storage before running.
    pub clean: bool,
}

/// Outcome of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct Driver {
    config: AppConfig,
    registry: TaskRegistry,
    storage: TempStorage,
}

impl Driver {
    pub fn new(config: AppConfig, registry: TaskRegistry) -> Self {
        let storage = TempStorage::from_config(&config);
        Self {
            config,
            registry,
            storage,
        }
    }

    pub fn storage(&self) -> &TempStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut TempStorage {
        &mut self.storage
    }

    /// Read `script` and report its deferred diagnostics. Fails if the
    /// script, or any deferred diagnostic, is an error.
    pub fn load_graph(
        &self,
        script: &Path,
        arguments: &BTreeMap<String, String>,
        sink: &dyn DiagnosticSink,
    ) -> Result<BuildGraph> {
        let mut options = ReaderOptions::from_config(&self.config, self.registry.schemas());
        options.arguments = arguments.clone();

        let script = if script.is_absolute() {
            script.to_path_buf()
        } else {
            self.config.workspace_root().join(script)
        };
        let graph = read_script(&script, &options, sink)?;

        let errors = graph.emit_diagnostics(sink);
        if errors > 0 {
            return Err(BuildGraphError::Script {
                errors: graph
                    .diagnostics()
                    .iter()
                    .filter(|d| d.severity == Severity::Error)
                    .map(|d| format_diagnostic(&d.location, d.severity, &d.message))
                    .collect(),
            });
        }
        Ok(graph)
    }

    /// Run `graph` according to `options`.
    pub async fn run(&mut self, graph: &BuildGraph, options: &RunOptions) -> Result<RunSummary> {
        let graph = match &options.targets {
            Some(targets) => graph.select_names(targets)?,
            None => graph.clone(),
        };
        graph.validate()?;

        if options.clean {
            self.storage.clean_local()?;
        }
        let discarded = self.storage.check_local_integrity()?;
        if !discarded.is_empty() {
            info!(nodes = ?discarded, "Discarded stale local temp storage");
        }

        let nodes: Vec<&Node> = match &options.single_node {
            Some(name) => {
                let id = graph
                    .find_node(name)
                    .ok_or_else(|| BuildGraphError::UnknownTarget(name.clone()))?;
                vec![graph.node(id)]
            }
            None => graph.nodes().iter().collect(),
        };

        let mut summary = RunSummary::default();
        for node in nodes {
            if self.storage.is_complete(&node.name)? {
                info!(node = %node.name, "Node already complete, skipping");
                summary.skipped.push(node.name.clone());
                continue;
            }
            self.execute_node(&graph, node).await?;
            summary.executed.push(node.name.clone());
        }
        Ok(summary)
    }

    async fn execute_node(&mut self, graph: &BuildGraph, node: &Node) -> Result<()> {
        info!(node = %node.name, tasks = node.tasks.len(), "Executing node");
        let mut ctx = TaskContext::new(self.storage.root_dir(), node.name.clone());

        self.retrieve_inputs(graph, node, &mut ctx)?;

        for task in &node.tasks {
            self.registry.execute(task, &mut ctx).await?;
        }

        self.archive_outputs(graph, node, &ctx)?;
        self.storage.mark_as_complete(&node.name)?;
        info!(node = %node.name, "Node complete");
        Ok(())
    }

    /// Pull every consumed tag, and the blocks holding its files, out of
    /// temp storage.
    fn retrieve_inputs(&mut self, graph: &BuildGraph, node: &Node, ctx: &mut TaskContext) -> Result<()> {
        let mut retrieved: BTreeSet<TempStorageBlock> = BTreeSet::new();
        for &input in &node.inputs {
            let output = graph.output(input);
            let producer = &graph.node(output.producer).name;
            let tag = self.storage.retrieve_tag(producer, &output.tag_name)?;

            for block in &tag.blocks {
                if retrieved.insert(block.clone()) {
                    self.storage.retrieve(block)?;
                }
            }
            debug!(node = %node.name, tag = %output.tag_name, files = tag.files.len(), "Retrieved input");
            ctx.add_to_tag(&output.tag_name, tag.paths());
        }
        Ok(())
    }

    /// Store everything the node wrote as one block, and a tag manifest per
    /// produced tag. The default tag holds every file the node wrote.
    fn archive_outputs(&mut self, graph: &BuildGraph, node: &Node, ctx: &TaskContext) -> Result<()> {
        let tag_names: Vec<&str> = node
            .outputs
            .iter()
            .map(|&o| graph.output(o).tag_name.as_str())
            .collect();

        let mut products: BTreeSet<PathBuf> = ctx.build_products.clone();
        for tag in &tag_names {
            if let Some(files) = ctx.tagged_files(tag) {
                products.extend(files.iter().cloned());
            }
        }

        let block = TempStorageBlock::new(node.name.clone(), String::new());
        let files: Vec<PathBuf> = products.iter().cloned().collect();
        self.storage.archive(&block, &files)?;

        let blocks = if files.is_empty() { Vec::new() } else { vec![block] };
        for (index, tag) in tag_names.iter().enumerate() {
            let tag_files: Vec<PathBuf> = if index == 0 {
                files.clone()
            } else {
                ctx.tagged_files(tag)
                    .map(|f| f.iter().cloned().collect())
                    .unwrap_or_default()
            };
            self.storage.archive_tag(&node.name, tag, &tag_files, &blocks)?;
        }
        Ok(())
    }
}
