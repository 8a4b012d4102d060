//! Build graph scripts.
//!
//! A script is an XML document of agents, nodes and reporting elements,
//! guarded by `If` conditions and parameterized with `$(Property)`
//! references, `Option`s and macros. `read_script` turns one into a
//! `BuildGraph`.

pub mod condition;
pub mod document;
pub mod macros;
pub mod reader;
pub mod scope;

pub use condition::{evaluate, Condition};
pub use document::{DocumentArena, Element, ElementId};
pub use macros::{Macro, MacroTable};
pub use reader::{read_script, read_script_str, ReaderOptions};
pub use scope::PropertyScopes;
