pub mod copy;
pub mod log;
pub mod spawn;
pub mod write_text_file;

use std::path::{Path, PathBuf};

use buildgraph_core::error::{BuildGraphError, Result};
use buildgraph_core::types::{split_list, TaskInfo};

fn binding_error(info: &TaskInfo, message: String) -> BuildGraphError {
    BuildGraphError::TaskBinding {
        task: info.name.clone(),
        message,
    }
}

pub(crate) fn execution_error(task: &str, message: impl Into<String>) -> BuildGraphError {
    BuildGraphError::TaskExecution {
        task: task.to_string(),
        message: message.into(),
    }
}

pub(crate) fn required(info: &TaskInfo, name: &str) -> Result<String> {
    info.argument(name)
        .map(str::to_string)
        .ok_or_else(|| binding_error(info, format!("missing required parameter '{}'", name)))
}

pub(crate) fn optional(info: &TaskInfo, name: &str) -> Option<String> {
    info.argument(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub(crate) fn boolean(info: &TaskInfo, name: &str, default: bool) -> Result<bool> {
    match optional(info, name) {
        None => Ok(default),
        Some(value) if value.eq_ignore_ascii_case("true") => Ok(true),
        Some(value) if value.eq_ignore_ascii_case("false") => Ok(false),
        Some(value) => Err(binding_error(
            info,
            format!("'{}' is not a valid boolean for parameter '{}'", value, name),
        )),
    }
}

pub(crate) fn integer(info: &TaskInfo, name: &str, default: i64) -> Result<i64> {
    match optional(info, name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| {
            binding_error(
                info,
                format!("'{}' is not a valid integer for parameter '{}'", value, name),
            )
        }),
    }
}

pub(crate) fn tags(info: &TaskInfo, name: &str) -> Vec<String> {
    info.argument(name).map(split_list).unwrap_or_default()
}

/// Workspace-relative path with any leading `./` removed.
pub(crate) fn relative(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}
