use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildGraphError {
    // Condition errors
    #[error("{message} (token '{token}' at position {position})")]
    Condition {
        message: String,
        token: String,
        position: usize,
    },

    // Script errors
    #[error("Script contains {} error(s):\n{}", .errors.len(), .errors.join("\n"))]
    Script { errors: Vec<String> },

    #[error("Script file not found: {0}")]
    ScriptNotFound(String),

    #[error("XML error: {0}")]
    Xml(String),

    // Graph errors
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("{0}")]
    InvalidGraph(String),

    // Temp storage errors
    #[error("Temp storage integrity check failed for node '{node}':\n{}", .mismatches.join("\n"))]
    Integrity {
        node: String,
        mismatches: Vec<String>,
    },

    #[error("Missing temp storage manifest for {node} ({block}): {path}")]
    MissingManifest {
        node: String,
        block: String,
        path: String,
    },

    #[error("{operation} failed after {attempts} attempts: {message}")]
    Transient {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Temp storage error: {0}")]
    Storage(String),

    // Task errors
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid parameters for task {task}: {message}")]
    TaskBinding { task: String, message: String },

    #[error("Task execution failed: {task}: {message}")]
    TaskExecution { task: String, message: String },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BuildGraphError {
    /// Whether retrying the failed operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BuildGraphError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, BuildGraphError>;
