use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use buildgraph_core::error::BuildGraphError;
use buildgraph_core::types::TaskContext;
use buildgraph_graph::BuildGraph;
use buildgraph_script::{read_script_str, ReaderOptions};
use buildgraph_storage::{RetryPolicy, StorageOptions, TempStorage, TempStorageBlock};
use buildgraph_tasks::TaskRegistry;
use buildgraph_test_utils::{CollectingSink, TempWorkspace};

const SCRIPT: &str = r##"<?xml version="1.0" encoding="utf-8"?>
<BuildGraph>
  <Property Name="Platforms" Value="Linux;Win64"/>
  <Agent Name="Compile Agent" Type="CompileLinux">
    <ForEach Name="Platform" Values="$(Platforms)">
      <Node Name="Compile $(Platform)" Produces="#Binaries $(Platform)">
        <WriteTextFile File="Binaries/$(Platform)/Game.bin" Text="$(Platform) game" Tag="#Binaries $(Platform)"/>
      </Node>
    </ForEach>
  </Agent>
  <Agent Name="Cook Agent" Type="Linux">
    <Node Name="Cook" Requires="#Binaries Linux">
      <Copy Files="#Binaries Linux" From="Binaries/Linux" To="Staged"/>
    </Node>
  </Agent>
  <Aggregate Name="Everything" Requires="Cook;Compile Win64"/>
</BuildGraph>
"##;

fn read(workspace: &TempWorkspace, registry: &TaskRegistry) -> BuildGraph {
    let options = ReaderOptions::new(workspace.root()).with_schemas(registry.schemas());
    let sink = CollectingSink::new();
    let graph = read_script_str(SCRIPT, &workspace.path("Graph.xml"), &options, &sink)
        .expect("script should read cleanly");
    assert!(sink.errors().is_empty());
    graph
}

fn storage(workspace: &TempWorkspace, local: &Path, shared: &Path) -> TempStorage {
    let options = StorageOptions {
        retry: RetryPolicy::new(2, Duration::ZERO),
        max_workers: 2,
        ..StorageOptions::default()
    };
    TempStorage::new(local, Some(shared.to_path_buf()), workspace.root(), options)
}

#[test]
fn test_script_builds_expected_graph() {
    let workspace = TempWorkspace::new();
    let registry = TaskRegistry::with_builtins();
    let graph = read(&workspace, &registry);

    let names: Vec<&str> = graph.nodes().iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["Compile Linux", "Compile Win64", "Cook"]);

    let cook = graph.node(graph.find_node("Cook").unwrap());
    assert!(cook.depends_on(graph.find_node("Compile Linux").unwrap()));
    assert!(!cook.depends_on(graph.find_node("Compile Win64").unwrap()));

    let selected = graph.select_names("Cook").unwrap();
    let names: Vec<&str> = selected.nodes().iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["Compile Linux", "Cook"]);
    assert_eq!(selected.agents().len(), 2);

    let everything = graph.select_names("Everything").unwrap();
    assert_eq!(everything.nodes().len(), 3);

    let json = serde_json::to_value(graph.summary()).unwrap();
    assert!(json.to_string().contains("Compile Agent"));
}

#[tokio::test]
async fn test_outputs_travel_between_machines() {
    let workspace = TempWorkspace::new();
    let shared = tempfile::tempdir().unwrap();
    let registry = TaskRegistry::with_builtins();
    let graph = read(&workspace, &registry);

    // Machine A runs "Compile Linux" and stores its output.
    let compile = graph.node(graph.find_node("Compile Linux").unwrap());
    let mut ctx = TaskContext::new(workspace.root(), compile.name.clone());
    for task in &compile.tasks {
        registry.execute(task, &mut ctx).await.unwrap();
    }
    let files: Vec<PathBuf> = ctx.build_products.iter().cloned().collect();
    assert_eq!(files, vec![PathBuf::from("Binaries/Linux/Game.bin")]);

    let local_a = tempfile::tempdir().unwrap();
    let mut machine_a = storage(&workspace, local_a.path(), shared.path());
    let block = TempStorageBlock::new("Compile Linux", "");
    machine_a.archive(&block, &files).unwrap();
    machine_a
        .archive_tag("Compile Linux", "#Binaries Linux", &files, &[block.clone()])
        .unwrap();
    machine_a.mark_as_complete("Compile Linux").unwrap();

    // Machine B starts from nothing.
    fs::remove_dir_all(workspace.path("Binaries")).unwrap();
    let local_b = tempfile::tempdir().unwrap();
    let mut machine_b = storage(&workspace, local_b.path(), shared.path());
    assert!(machine_b.is_complete("Compile Linux").unwrap());

    let tag = machine_b.retrieve_tag("Compile Linux", "#Binaries Linux").unwrap();
    for block in &tag.blocks {
        machine_b.retrieve(block).unwrap();
    }
    assert_eq!(workspace.read("Binaries/Linux/Game.bin"), "Linux game");

    let cook = graph.node(graph.find_node("Cook").unwrap());
    let mut ctx = TaskContext::new(workspace.root(), cook.name.clone());
    ctx.add_to_tag("#Binaries Linux", tag.paths());
    for task in &cook.tasks {
        registry.execute(task, &mut ctx).await.unwrap();
    }
    assert_eq!(workspace.read("Staged/Game.bin"), "Linux game");

    // Tampering with a retrieved file is caught on the next retrieve.
    fs::write(workspace.path("Binaries/Linux/Game.bin"), "patched!!").unwrap();
    let err = machine_b.retrieve(&block).unwrap_err();
    match err {
        BuildGraphError::Integrity { mismatches, .. } => {
            assert!(mismatches[0].starts_with("Binaries/Linux/Game.bin"));
        }
        other => panic!("expected integrity failure, got {other}"),
    }
}
