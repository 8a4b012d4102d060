use std::collections::HashMap;

use buildgraph_core::types::ScriptLocation;

use crate::document::ElementId;

/// A reusable fragment of script with named arguments.
#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    /// Argument names; the slot of an argument is its index here.
    /// Required arguments come first.
    pub arguments: Vec<String>,
    pub required_count: usize,
    /// Elements captured at definition time, plus any added by `Extend`.
    pub elements: Vec<ElementId>,
    pub location: ScriptLocation,
}

impl Macro {
    fn slot(&self, argument: &str) -> Option<usize> {
        self.arguments
            .iter()
            .position(|a| a.eq_ignore_ascii_case(argument))
    }

    /// Bind `(attribute, value)` pairs to argument slots.
    ///
    /// Returns every argument with its value, optional ones defaulting to
    /// the empty string.
    pub fn bind(&self, values: &[(String, String)]) -> Result<Vec<(String, String)>, String> {
        let mut slots: Vec<Option<String>> = vec![None; self.arguments.len()];
        for (name, value) in values {
            match self.slot(name) {
                Some(index) => slots[index] = Some(value.clone()),
                None => {
                    return Err(format!(
                        "Macro '{}' does not take an argument '{}'",
                        self.name, name
                    ))
                }
            }
        }

        let mut bound = Vec::with_capacity(slots.len());
        for (index, value) in slots.into_iter().enumerate() {
            let name = self.arguments[index].clone();
            match value {
                Some(value) => bound.push((name, value)),
                None if index < self.required_count => {
                    return Err(format!(
                        "Missing argument '{}' for macro '{}'",
                        name, self.name
                    ))
                }
                None => bound.push((name, String::new())),
            }
        }
        Ok(bound)
    }
}

/// Macros declared so far, keyed case-insensitively by name.
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, Macro>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(
        &mut self,
        name: &str,
        required: Vec<String>,
        optional: Vec<String>,
        elements: Vec<ElementId>,
        location: ScriptLocation,
    ) -> Result<(), String> {
        let key = name.to_ascii_lowercase();
        if let Some(existing) = self.macros.get(&key) {
            return Err(format!(
                "Macro '{}' has already been declared at {}",
                name, existing.location
            ));
        }

        let mut arguments: Vec<String> = Vec::new();
        for argument in required.iter().chain(optional.iter()) {
            if arguments.iter().any(|a| a.eq_ignore_ascii_case(argument)) {
                return Err(format!(
                    "Argument '{}' is declared more than once for macro '{}'",
                    argument, name
                ));
            }
            arguments.push(argument.clone());
        }

        self.macros.insert(
            key,
            Macro {
                name: name.to_string(),
                arguments,
                required_count: required.len(),
                elements,
                location,
            },
        );
        Ok(())
    }

    /// Append elements to an existing macro.
    pub fn extend(&mut self, name: &str, elements: Vec<ElementId>) -> Result<(), String> {
        match self.macros.get_mut(&name.to_ascii_lowercase()) {
            Some(existing) => {
                existing.elements.extend(elements);
                Ok(())
            }
            None => Err(format!("Cannot extend unknown macro '{}'", name)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}
