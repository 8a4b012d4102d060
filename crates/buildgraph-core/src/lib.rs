pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{BuildGraphError, Result};
pub use traits::{DiagnosticSink, Task, TracingSink};
pub use types::*;
