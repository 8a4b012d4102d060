use futures::future::BoxFuture;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::types::{format_diagnostic, ScriptLocation, Severity, TaskContext};

/// Receives `(file, line, severity, message)` diagnostics from the script
/// reader and from deferred graph diagnostics.
pub trait DiagnosticSink {
    fn report(&self, location: &ScriptLocation, severity: Severity, message: &str);
}

/// Forwards diagnostics to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, location: &ScriptLocation, severity: Severity, message: &str) {
        let line = format_diagnostic(location, severity, message);
        match severity {
            Severity::Info => info!("{}", line),
            Severity::Warning => warn!("{}", line),
            Severity::Error => error!("{}", line),
        }
    }
}

/// A bound build step. Created by the task registry from a `TaskInfo`.
pub trait Task: Send + Sync + 'static {
    /// Task name as written in scripts.
    fn name(&self) -> &str;

    /// Execute the task, recording produced files in `ctx`.
    fn execute<'a>(&'a self, ctx: &'a mut TaskContext) -> BoxFuture<'a, Result<()>>;
}
