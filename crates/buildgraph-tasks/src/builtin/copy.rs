use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::debug;

use buildgraph_core::error::Result;
use buildgraph_core::traits::Task;
use buildgraph_core::types::{
    ParameterKind, TagUsage, TaskContext, TaskInfo, TaskParameter, TaskSchema,
};

use super::{execution_error, optional, relative, required, tags};

/// Copy files from one directory to another, preserving their layout
/// below `From`.
pub struct CopyTask {
    files: String,
    from: PathBuf,
    to: PathBuf,
    tags: Vec<String>,
}

pub fn schema() -> TaskSchema {
    TaskSchema {
        name: "Copy".into(),
        description: "Copy files to another directory".into(),
        parameters: vec![
            TaskParameter::required("Files", ParameterKind::FileSpec).with_tags(TagUsage::Input),
            TaskParameter::optional("From", ParameterKind::Path),
            TaskParameter::required("To", ParameterKind::Path),
            TaskParameter::optional("Tag", ParameterKind::TagList).with_tags(TagUsage::Output),
        ],
    }
}

pub fn create(info: &TaskInfo) -> Result<Box<dyn Task>> {
    Ok(Box::new(CopyTask {
        files: required(info, "Files")?,
        from: optional(info, "From").map(|p| relative(&p)).unwrap_or_default(),
        to: relative(&required(info, "To")?),
        tags: tags(info, "Tag"),
    }))
}

impl CopyTask {
    /// Destination of `source`: its path below `From`, re-rooted at `To`.
    /// Files outside `From` land directly in `To`.
    fn target(&self, source: &Path) -> PathBuf {
        match source.strip_prefix(&self.from) {
            Ok(rest) if !rest.as_os_str().is_empty() => self.to.join(rest),
            _ => self.to.join(source.file_name().unwrap_or(source.as_os_str())),
        }
    }
}

impl Task for CopyTask {
    fn name(&self) -> &str {
        "Copy"
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sources = ctx.resolve_file_spec(&self.files, &self.from);
            let mut copied = Vec::with_capacity(sources.len());

            for source in sources {
                let target = self.target(&source);
                let from = ctx.absolute(&source);
                let to = ctx.absolute(&target);

                if !tokio::fs::try_exists(&from).await.unwrap_or(false) {
                    return Err(execution_error(
                        "Copy",
                        format!("source file {} does not exist", source.display()),
                    ));
                }
                if let Some(parent) = to.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&from, &to).await.map_err(|e| {
                    execution_error(
                        "Copy",
                        format!("{} -> {}: {}", source.display(), target.display(), e),
                    )
                })?;
                debug!(from = %source.display(), to = %target.display(), "Copied file");
                copied.push(target);
            }

            for tag in &self.tags {
                ctx.add_to_tag(tag, copied.iter().cloned());
            }
            ctx.add_build_products(copied);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::info;
    use buildgraph_test_utils::TempWorkspace;

    #[tokio::test]
    async fn test_copy_preserves_layout_and_tags() {
        let workspace = TempWorkspace::new();
        workspace.write("Build/Out/Editor.exe", "exe");
        workspace.write("Build/Out/Data/Game.pak", "pak");

        let task = create(&info(
            "Copy",
            &[
                ("Files", "Out/Editor.exe;Out/Data/Game.pak"),
                ("From", "Build"),
                ("To", "Staged"),
                ("Tag", "#Staged"),
            ],
        ))
        .unwrap();

        let mut ctx = TaskContext::new(workspace.root(), "Stage");
        task.execute(&mut ctx).await.unwrap();

        assert_eq!(workspace.read("Staged/Out/Editor.exe"), "exe");
        assert_eq!(workspace.read("Staged/Out/Data/Game.pak"), "pak");
        let staged = ctx.tagged_files("#Staged").unwrap();
        assert!(staged.contains(Path::new("Staged/Out/Editor.exe")));
        assert_eq!(staged.len(), 2);
    }

    #[tokio::test]
    async fn test_copy_tagged_input() {
        let workspace = TempWorkspace::new();
        workspace.write("Tools/tool.bin", "bin");

        let mut ctx = TaskContext::new(workspace.root(), "Package");
        ctx.add_to_tag("#Tools", [PathBuf::from("Tools/tool.bin")]);

        let task = create(&info("Copy", &[("Files", "#Tools"), ("From", "Tools"), ("To", "Package")])).unwrap();
        task.execute(&mut ctx).await.unwrap();

        assert_eq!(workspace.read("Package/tool.bin"), "bin");
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let workspace = TempWorkspace::new();
        let task = create(&info("Copy", &[("Files", "nope.txt"), ("To", "Out")])).unwrap();
        let mut ctx = TaskContext::new(workspace.root(), "Stage");
        let err = task.execute(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("nope.txt does not exist"));
    }
}
