use std::path::PathBuf;

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use buildgraph_core::error::Result;
use buildgraph_core::traits::Task;
use buildgraph_core::types::{
    ParameterKind, TagUsage, TaskContext, TaskInfo, TaskParameter, TaskSchema,
};

use super::{boolean, execution_error, optional, relative, required, tags};

/// Write (or append) text to a file.
pub struct WriteTextFileTask {
    file: PathBuf,
    text: String,
    append: bool,
    tags: Vec<String>,
}

pub fn schema() -> TaskSchema {
    TaskSchema {
        name: "WriteTextFile".into(),
        description: "Write text to a file".into(),
        parameters: vec![
            TaskParameter::required("File", ParameterKind::Path),
            TaskParameter::optional("Text", ParameterKind::String),
            TaskParameter::optional("Append", ParameterKind::Boolean),
            TaskParameter::optional("Tag", ParameterKind::TagList).with_tags(TagUsage::Output),
        ],
    }
}

pub fn create(info: &TaskInfo) -> Result<Box<dyn Task>> {
    Ok(Box::new(WriteTextFileTask {
        file: relative(&required(info, "File")?),
        text: optional(info, "Text").unwrap_or_default(),
        append: boolean(info, "Append", false)?,
        tags: tags(info, "Tag"),
    }))
}

impl Task for WriteTextFileTask {
    fn name(&self) -> &str {
        "WriteTextFile"
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = ctx.absolute(&self.file);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(self.append)
                .truncate(!self.append)
                .open(&path)
                .await
                .map_err(|e| execution_error("WriteTextFile", format!("{}: {}", self.file.display(), e)))?;
            file.write_all(self.text.as_bytes()).await?;
            file.flush().await?;

            debug!(file = %self.file.display(), bytes = self.text.len(), append = self.append, "Wrote text file");

            for tag in &self.tags {
                ctx.add_to_tag(tag, [self.file.clone()]);
            }
            ctx.add_build_products([self.file.clone()]);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::info;
    use buildgraph_test_utils::TempWorkspace;
    use std::path::Path;

    #[tokio::test]
    async fn test_write_and_append() {
        let workspace = TempWorkspace::new();
        let mut ctx = TaskContext::new(workspace.root(), "Notes");

        let write = create(&info(
            "WriteTextFile",
            &[("File", "out/notes.txt"), ("Text", "first"), ("Tag", "#Notes")],
        ))
        .unwrap();
        write.execute(&mut ctx).await.unwrap();

        let append = create(&info(
            "WriteTextFile",
            &[("File", "out/notes.txt"), ("Text", "+second"), ("Append", "true")],
        ))
        .unwrap();
        append.execute(&mut ctx).await.unwrap();

        assert_eq!(workspace.read("out/notes.txt"), "first+second");
        assert!(ctx.tagged_files("#Notes").unwrap().contains(Path::new("out/notes.txt")));
    }

    #[tokio::test]
    async fn test_overwrite_truncates() {
        let workspace = TempWorkspace::new();
        workspace.write("a.txt", "a much longer previous body");
        let mut ctx = TaskContext::new(workspace.root(), "Notes");
        create(&info("WriteTextFile", &[("File", "a.txt"), ("Text", "short")]))
            .unwrap()
            .execute(&mut ctx)
            .await
            .unwrap();
        assert_eq!(workspace.read("a.txt"), "short");
    }

    #[test]
    fn test_invalid_append_flag() {
        let result = create(&info("WriteTextFile", &[("File", "a.txt"), ("Append", "maybe")]));
        assert!(result.is_err());
    }
}
