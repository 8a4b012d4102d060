use regex::RegexBuilder;

use buildgraph_graph::is_valid_name;

use super::ScriptReader;
use crate::document::ElementId;

impl<'a> ScriptReader<'a> {
    fn property_name(&mut self, id: ElementId) -> Option<String> {
        let name = self.required_attribute(id, "Name")?;
        if !is_valid_name(&name) {
            self.error(id, format!("'{}' is not a valid property name", name));
            return None;
        }
        Some(name)
    }

    pub(super) fn read_property(&mut self, id: ElementId) {
        let Some(name) = self.property_name(id) else {
            return;
        };
        let mut value = self.attribute(id, "Value");
        let in_parent = self.bool_attribute(id, "CreateInParentScope", false);

        if let Some(separator) = self.optional_attribute(id, "Separator") {
            if !separator.is_empty() {
                if let Some(existing) = self.scopes.get(&name).filter(|v| !v.is_empty()) {
                    value = if value.is_empty() {
                        existing.to_string()
                    } else {
                        format!("{}{}{}", existing, separator, value)
                    };
                }
            }
        }

        let result = if in_parent {
            self.scopes.set_in_parent(&name, &value)
        } else {
            self.scopes.set(&name, &value)
        };
        if let Err(message) = result {
            self.error(id, message);
        }
    }

    /// `Option`: a property whose value may be overridden by a reader argument.
    pub(super) fn read_option(&mut self, id: ElementId) {
        let Some(name) = self.property_name(id) else {
            return;
        };
        let restrict = self.optional_attribute(id, "Restrict");
        let default_value = self.attribute(id, "DefaultValue");

        let value = match self.argument(&name) {
            Some(value) => value,
            None => default_value,
        };

        if let Some(restrict) = restrict.filter(|r| !r.is_empty()) {
            match RegexBuilder::new(&format!("^(?:{})$", restrict))
                .case_insensitive(true)
                .build()
            {
                Ok(pattern) => {
                    if !pattern.is_match(&value) {
                        self.error(
                            id,
                            format!(
                                "'{}' is not a valid value for option '{}' (must match '{}')",
                                value, name, restrict
                            ),
                        );
                        return;
                    }
                }
                Err(e) => {
                    self.error(id, format!("Invalid Restrict pattern '{}': {}", restrict, e));
                    return;
                }
            }
        }

        self.set_property(id, &name, &value);
    }

    /// Look up a reader argument by case-insensitive name, marking it used.
    fn argument(&mut self, name: &str) -> Option<String> {
        let (key, value) = self
            .options
            .arguments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))?;
        self.used_arguments.insert(key.to_ascii_lowercase());
        Some(value.clone())
    }

    pub(super) fn read_env_var(&mut self, id: ElementId) {
        let Some(name) = self.property_name(id) else {
            return;
        };
        let value = std::env::var(&name).unwrap_or_default();
        self.set_property(id, &name, &value);
    }

    /// `Regex`: match `Input` against `Pattern` and assign numbered capture
    /// groups to the properties listed in `Capture`.
    pub(super) fn read_regex(&mut self, id: ElementId) {
        let Some(pattern) = self.required_attribute(id, "Pattern") else {
            return;
        };
        let input = self.attribute(id, "Input");
        let captures = self.list_attribute(id, "Capture");
        let optional = self.bool_attribute(id, "Optional", false);

        let regex = match regex::Regex::new(&pattern) {
            Ok(regex) => regex,
            Err(e) => {
                self.error(id, format!("Invalid regex '{}': {}", pattern, e));
                return;
            }
        };
        if captures.len() > regex.captures_len() - 1 {
            self.error(
                id,
                format!(
                    "Regex '{}' has {} capture group(s) but {} properties were given",
                    pattern,
                    regex.captures_len() - 1,
                    captures.len()
                ),
            );
            return;
        }

        match regex.captures(&input) {
            Some(groups) => {
                for (index, name) in captures.iter().enumerate() {
                    let value = groups.get(index + 1).map_or("", |m| m.as_str());
                    self.set_property(id, name, value);
                }
            }
            None if optional => {}
            None => self.error(
                id,
                format!("Regex '{}' did not match input '{}'", pattern, input),
            ),
        }
    }

    pub(super) fn read_string_op(&mut self, id: ElementId) {
        let Some(method) = self.required_attribute(id, "Method") else {
            return;
        };
        let Some(output) = self.required_attribute(id, "Output") else {
            return;
        };
        let input = self.attribute(id, "Input");
        let arguments = self.attribute(id, "Arguments");

        match apply_string_op(&method, &input, &arguments) {
            Ok(value) => self.set_property(id, &output, &value),
            Err(message) => self.error(id, message),
        }
    }
}

/// Apply a `StringOp` method to `input`.
///
/// `Replace` takes `from;to`, `Substring` takes `start[;length]`, both
/// counted in characters.
pub fn apply_string_op(method: &str, input: &str, arguments: &str) -> Result<String, String> {
    match method.to_ascii_lowercase().as_str() {
        "tolower" => Ok(input.to_lowercase()),
        "toupper" => Ok(input.to_uppercase()),
        "trim" => Ok(input.trim().to_string()),
        "replace" => {
            let Some((from, to)) = arguments.split_once(';') else {
                return Err("Replace requires two arguments separated by ';'".to_string());
            };
            if from.is_empty() {
                return Err("Replace requires a non-empty search string".to_string());
            }
            Ok(input.replace(from, to))
        }
        "substring" => {
            let mut parts = arguments.split(';').map(str::trim);
            let start = parts
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| format!("Invalid Substring arguments '{}'", arguments))?;
            let count = input.chars().count();
            if start > count {
                return Err(format!(
                    "Substring start {} is past the end of '{}'",
                    start, input
                ));
            }
            let length = match parts.next() {
                Some(length) => {
                    let length = length
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid Substring arguments '{}'", arguments))?;
                    if start + length > count {
                        return Err(format!(
                            "Substring {}+{} is past the end of '{}'",
                            start, length, input
                        ));
                    }
                    length
                }
                None => count - start,
            };
            Ok(input.chars().skip(start).take(length).collect())
        }
        _ => Err(format!("Unknown StringOp method '{}'", method)),
    }
}
