use futures::future::BoxFuture;
use tracing::info;

use buildgraph_core::error::Result;
use buildgraph_core::traits::Task;
use buildgraph_core::types::{ParameterKind, TaskContext, TaskInfo, TaskParameter, TaskSchema};

use super::required;

/// Print a message to the build log.
pub struct LogTask {
    message: String,
}

pub fn schema() -> TaskSchema {
    TaskSchema {
        name: "Log".into(),
        description: "Print a message to the build log".into(),
        parameters: vec![TaskParameter::required("Message", ParameterKind::String)],
    }
}

pub fn create(info: &TaskInfo) -> Result<Box<dyn Task>> {
    Ok(Box::new(LogTask {
        message: required(info, "Message")?,
    }))
}

impl Task for LogTask {
    fn name(&self) -> &str {
        "Log"
    }

    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(node = %ctx.node_name, "{}", self.message);
            Ok(())
        })
    }
}
