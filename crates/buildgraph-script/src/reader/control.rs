use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use buildgraph_core::types::{split_list_with, Severity};
use buildgraph_graph::{is_valid_name, Diagnostic};

use super::{ReadBody, ScriptReader, MAX_MACRO_DEPTH, ROOT_ELEMENT};
use crate::document::{resolve_relative, ElementId};

/// Identity of a script on the include stack. Files that cannot be
/// canonicalized (not yet written, or in-memory) keep their given path.
pub(super) fn include_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl<'a> ScriptReader<'a> {
    /// `Include`: read other script files into the graph scope. The path is
    /// relative to the including file and may contain wildcards.
    pub(super) fn read_include(&mut self, id: ElementId) {
        let Some(script) = self.required_attribute(id, "Script") else {
            return;
        };
        let including = self.location(id).file;
        let target = resolve_relative(&including, &script);

        let files: Vec<PathBuf> = if script.contains(['*', '?']) {
            match glob::glob(&target.to_string_lossy()) {
                Ok(paths) => {
                    let mut files: Vec<PathBuf> = paths.filter_map(|p| p.ok()).collect();
                    files.sort();
                    files
                }
                Err(e) => {
                    self.error(id, format!("Invalid include pattern '{}': {}", script, e));
                    return;
                }
            }
        } else {
            vec![target]
        };

        for file in files {
            self.read_included_file(id, file);
        }
    }

    fn read_included_file(&mut self, id: ElementId, file: PathBuf) {
        let key = include_key(&file);
        if self.include_stack.contains(&key) {
            self.error(id, format!("Script '{}' includes itself", file.display()));
            return;
        }
        let root = match self.documents.load(&file) {
            Ok(root) => root,
            Err(e) => {
                self.error(id, format!("Unable to include '{}': {}", file.display(), e));
                return;
            }
        };
        if self.documents.element(root).name != ROOT_ELEMENT {
            self.error(
                root,
                format!("Included script must have a '{}' root element", ROOT_ELEMENT),
            );
            return;
        }

        debug!(script = %file.display(), "Including script");
        self.include_stack.push(key);
        self.read_contents(root, Self::read_graph_element);
        self.include_stack.pop();
    }

    pub(super) fn read_macro(&mut self, id: ElementId) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        if !is_valid_name(&name) {
            self.error(id, format!("'{}' is not a valid macro name", name));
            return;
        }
        let required = self.list_attribute(id, "Arguments");
        let optional = self.list_attribute(id, "OptionalArguments");
        let elements = self.documents.element(id).children.clone();
        let location = self.location(id);

        if let Err(message) = self
            .macros
            .define(&name, required, optional, elements, location)
        {
            self.error(id, message);
        }
    }

    pub(super) fn read_extend(&mut self, id: ElementId) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        let elements = self.documents.element(id).children.clone();
        if let Err(message) = self.macros.extend(&name, elements) {
            self.error(id, message);
        }
    }

    /// `Expand`: bind the element's attributes to the macro's arguments and
    /// read the macro's elements in a new scope, using the caller's grammar.
    pub(super) fn read_expand(&mut self, id: ElementId, body: ReadBody<'a>) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        let Some(definition) = self.macros.get(&name).cloned() else {
            self.error(id, format!("Unknown macro '{}'", name));
            return;
        };
        if self.macro_depth >= MAX_MACRO_DEPTH {
            self.error(
                id,
                format!("Macro '{}' exceeds the maximum expansion depth of {}", name, MAX_MACRO_DEPTH),
            );
            return;
        }

        let raw: Vec<(String, String)> = self
            .documents
            .element(id)
            .attributes
            .iter()
            .filter(|(k, _)| k != "Name" && k != "If")
            .cloned()
            .collect();
        let values: Vec<(String, String)> = raw
            .into_iter()
            .map(|(k, v)| {
                let value = self.expand(id, &v);
                (k, value)
            })
            .collect();

        let bound = match definition.bind(&values) {
            Ok(bound) => bound,
            Err(message) => {
                self.error(id, message);
                return;
            }
        };

        self.macro_depth += 1;
        self.with_scope(|reader| {
            for (argument, value) in &bound {
                reader.scopes.declare(argument, value);
            }
            for &element in &definition.elements {
                if reader.condition_holds(element) {
                    body(reader, element);
                }
            }
        });
        self.macro_depth -= 1;
    }

    pub(super) fn read_do(&mut self, id: ElementId, body: ReadBody<'a>) {
        self.with_scope(|reader| reader.read_contents(id, body));
    }

    /// `Switch`: read the first `Case` whose condition holds, or `Default`.
    pub(super) fn read_switch(&mut self, id: ElementId, body: ReadBody<'a>) {
        let children = self.documents.element(id).children.clone();
        for child in children {
            let name = self.element_name(child);
            match name.as_str() {
                "Case" => {
                    if !self.documents.element(child).has_attribute("If") {
                        self.error(child, "Case requires an 'If' attribute");
                        continue;
                    }
                    if self.condition_holds(child) {
                        self.with_scope(|reader| reader.read_contents(child, body));
                        return;
                    }
                }
                "Default" => {
                    if self.condition_holds(child) {
                        self.with_scope(|reader| reader.read_contents(child, body));
                    }
                    return;
                }
                _ => self.error(child, format!("Invalid element '{}' inside Switch", name)),
            }
        }
    }

    /// `ForEach`: read the body once per value, with the loop variable bound
    /// in a fresh scope each time.
    pub(super) fn read_foreach(&mut self, id: ElementId, body: ReadBody<'a>) {
        let Some(name) = self.required_attribute(id, "Name") else {
            return;
        };
        let values = self.attribute(id, "Values");
        let separator = match self.optional_attribute(id, "Separator") {
            None => self.options.foreach_separator,
            Some(separator) => {
                let mut chars = separator.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        self.error(
                            id,
                            format!("ForEach separator must be a single character, not '{}'", separator),
                        );
                        return;
                    }
                }
            }
        };

        for value in split_list_with(&values, separator) {
            self.with_scope(|reader| {
                reader.scopes.declare(&name, &value);
                reader.read_contents(id, body);
            });
        }
    }

    /// `Trace`, `Warning` and `Error` are recorded in the graph and emitted
    /// later, only if their node or agent is part of the build.
    pub(super) fn read_diagnostic(&mut self, id: ElementId, severity: Severity) {
        let message = self.attribute(id, "Message");
        let location = self.location(id);
        self.graph.add_diagnostic(Diagnostic {
            location,
            severity,
            message,
            node: self.current_node,
            agent: self.current_agent,
        });
    }
}
