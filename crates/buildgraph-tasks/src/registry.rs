use std::collections::BTreeMap;

use tracing::debug;

use buildgraph_core::error::{BuildGraphError, Result};
use buildgraph_core::traits::Task;
use buildgraph_core::types::{TaskContext, TaskInfo, TaskSchema, TaskSchemas};

/// Builds a task from its bound arguments.
pub type TaskFactory = fn(&TaskInfo) -> Result<Box<dyn Task>>;

/// Registry of available tasks: the schema scripts are checked against and
/// the factory that turns a `TaskInfo` into something runnable.
pub struct TaskRegistry {
    tasks: BTreeMap<String, (TaskSchema, TaskFactory)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }

    /// Register a task. A task with the same name is replaced.
    pub fn register(&mut self, schema: TaskSchema, factory: TaskFactory) {
        self.tasks.insert(schema.name.clone(), (schema, factory));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tasks.remove(name).is_some()
    }

    pub fn schema(&self, name: &str) -> Option<&TaskSchema> {
        self.tasks.get(name).map(|(schema, _)| schema)
    }

    /// Names of all registered tasks, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.tasks.keys().map(|s| s.as_str()).collect()
    }

    /// Schemas for the script reader.
    pub fn schemas(&self) -> TaskSchemas {
        let mut schemas = TaskSchemas::new();
        for (schema, _) in self.tasks.values() {
            schemas.insert(schema.clone());
        }
        schemas
    }

    /// Construct the task described by `info`.
    pub fn create(&self, info: &TaskInfo) -> Result<Box<dyn Task>> {
        let (schema, factory) = self
            .tasks
            .get(&info.name)
            .ok_or_else(|| BuildGraphError::TaskNotFound(info.name.clone()))?;

        for parameter in schema.parameters.iter().filter(|p| p.required) {
            if info.argument(&parameter.name).is_none() {
                return Err(BuildGraphError::TaskBinding {
                    task: info.name.clone(),
                    message: format!("missing required parameter '{}'", parameter.name),
                });
            }
        }
        factory(info)
    }

    /// Construct and run a task.
    pub async fn execute(&self, info: &TaskInfo, ctx: &mut TaskContext) -> Result<()> {
        let task = self.create(info)?;
        debug!(task = %task.name(), node = %ctx.node_name, location = %info.location, "Executing task");
        task.execute(ctx).await
    }

    /// Create a registry with all built-in tasks registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::builtin::log::schema(), crate::builtin::log::create);
        registry.register(crate::builtin::copy::schema(), crate::builtin::copy::create);
        registry.register(
            crate::builtin::write_text_file::schema(),
            crate::builtin::write_text_file::create,
        );
        registry.register(crate::builtin::spawn::schema(), crate::builtin::spawn::create);
        registry
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
