use std::path::PathBuf;

use futures::future::BoxFuture;
use tokio::process::Command;
use tracing::{debug, info, warn};

use buildgraph_core::error::Result;
use buildgraph_core::traits::Task;
use buildgraph_core::types::{ParameterKind, TaskContext, TaskInfo, TaskParameter, TaskSchema};

use super::{execution_error, integer, optional, relative, required};

/// Run an external program. Exit codes at or above `ErrorLevel` fail the task.
pub struct SpawnTask {
    exe: String,
    arguments: Vec<String>,
    working_dir: Option<PathBuf>,
    error_level: i64,
}

pub fn schema() -> TaskSchema {
    TaskSchema {
        name: "Spawn".into(),
        description: "Run an external program".into(),
        parameters: vec![
            TaskParameter::required("Exe", ParameterKind::String),
            TaskParameter::optional("Arguments", ParameterKind::String),
            TaskParameter::optional("WorkingDir", ParameterKind::Path),
            TaskParameter::optional("ErrorLevel", ParameterKind::Integer),
        ],
    }
}

pub fn create(info: &TaskInfo) -> Result<Box<dyn Task>> {
    Ok(Box::new(SpawnTask {
        exe: required(info, "Exe")?,
        arguments: optional(info, "Arguments")
            .map(|a| split_arguments(&a))
            .unwrap_or_default(),
        working_dir: optional(info, "WorkingDir").map(|p| relative(&p)),
        error_level: integer(info, "ErrorLevel", 1)?,
    }))
}

/// Split a command line on whitespace, keeping double-quoted runs together.
pub fn split_arguments(line: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    arguments.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }
    if pending {
        arguments.push(current);
    }
    arguments
}

impl Task for SpawnTask {
    fn name(&self) -> &str {
        "Spawn"
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let working_dir = match &self.working_dir {
                Some(dir) => ctx.absolute(dir),
                None => ctx.workspace_root.clone(),
            };
            debug!(exe = %self.exe, args = ?self.arguments, cwd = %working_dir.display(), "Spawning process");

            let output = Command::new(&self.exe)
                .args(&self.arguments)
                .current_dir(&working_dir)
                .output()
                .await
                .map_err(|e| execution_error("Spawn", format!("failed to start '{}': {}", self.exe, e)))?;

            for line in String::from_utf8_lossy(&output.stdout).lines() {
                info!(node = %ctx.node_name, "{}", line);
            }
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                warn!(node = %ctx.node_name, "{}", line);
            }

            let code = output.status.code().map(i64::from).ok_or_else(|| {
                execution_error("Spawn", format!("'{}' was terminated by a signal", self.exe))
            })?;
            if code >= self.error_level {
                return Err(execution_error(
                    "Spawn",
                    format!("'{}' exited with code {}", self.exe, code),
                ));
            }
            Ok(())
        })
    }
}
