//! Scoped property environment.
//!
//! Properties live in a stack of frames. Lookups walk from the innermost frame
//! outwards. Each frame also keeps a shadow set: the names that have been set
//! in one of its child frames. Setting such a name in the outer frame later is
//! rejected, since code in the child scope already saw a different value.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
struct Frame {
    /// Keyed by lowercased name; the value keeps the declared spelling.
    values: HashMap<String, (String, String)>,
    shadowed: HashSet<String>,
}

/// Stack of property frames. The outermost frame is never popped.
#[derive(Debug)]
pub struct PropertyScopes {
    frames: Vec<Frame>,
}

impl Default for PropertyScopes {
    fn default() -> Self {
        Self::new()
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl PropertyScopes {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    /// Number of frames, including the outermost one.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = key(name);
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.values.get(&name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a property.
    ///
    /// The value goes into the outermost frame that already defines the
    /// name, or the innermost frame if none does. Fails if that frame has the
    /// name in its shadow set.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), String> {
        let name_key = key(name);
        let innermost = self.frames.len() - 1;
        let index = self
            .frames
            .iter()
            .position(|frame| frame.values.contains_key(&name_key))
            .unwrap_or(innermost);

        if self.frames[index].shadowed.contains(&name_key) {
            return Err(format!(
                "Property '{}' was already set in a nested scope; it cannot be changed in an enclosing scope afterwards",
                name
            ));
        }
        self.assign(index, name, value);
        Ok(())
    }

    /// Set a property in the frame enclosing the current one.
    ///
    /// Fails if there is no enclosing frame or if a frame further out
    /// already defines the name.
    pub fn set_in_parent(&mut self, name: &str, value: &str) -> Result<(), String> {
        if self.frames.len() < 2 {
            return Err(format!(
                "Cannot create property '{}' in a parent scope; there is no parent scope",
                name
            ));
        }
        let parent = self.frames.len() - 2;
        let name_key = key(name);
        if self.frames[..parent]
            .iter()
            .any(|frame| frame.values.contains_key(&name_key))
        {
            return Err(format!(
                "Property '{}' is already defined in an outer scope",
                name
            ));
        }
        if self.frames[parent].shadowed.contains(&name_key) {
            return Err(format!(
                "Property '{}' was already set in a nested scope; it cannot be changed in an enclosing scope afterwards",
                name
            ));
        }
        self.assign(parent, name, value);
        Ok(())
    }

    /// Bind a name in the innermost frame without any shadowing checks.
    /// Used for macro arguments and loop variables.
    pub fn declare(&mut self, name: &str, value: &str) {
        let innermost = self.frames.len() - 1;
        self.frames[innermost]
            .values
            .insert(key(name), (name.to_string(), value.to_string()));
    }

    fn assign(&mut self, index: usize, name: &str, value: &str) {
        let name_key = key(name);
        self.frames[index]
            .values
            .insert(name_key.clone(), (name.to_string(), value.to_string()));
        for frame in &mut self.frames[..index] {
            frame.shadowed.insert(name_key.clone());
        }
    }

    /// Replace every `$(Name)` and `$(Name:N)` reference in `text`.
    ///
    /// References are expanded right to left, so `$(A$(B))` expands `B`
    /// first and then looks up `A` followed by its value. Substituted values
    /// are never rescanned. Undefined names expand to the empty string and
    /// are passed to `on_missing`.
    pub fn expand(&self, text: &str, mut on_missing: impl FnMut(&str)) -> String {
        let mut result = text.to_string();
        let mut end = result.len();

        while let Some(start) = result[..end].rfind("$(") {
            let close = match result[start + 2..].find(')') {
                Some(offset) => start + 2 + offset,
                None => {
                    end = start;
                    continue;
                }
            };

            let reference = &result[start + 2..close];
            let (name, length) = split_length_modifier(reference);
            let value = match self.get(name) {
                Some(value) => apply_length(value, length),
                None => {
                    on_missing(name);
                    String::new()
                }
            };
            result.replace_range(start..=close, &value);
            end = start;
        }
        result
    }
}

/// Split `Name:N` into the name and its length modifier, if `N` is an integer.
fn split_length_modifier(reference: &str) -> (&str, Option<i64>) {
    if let Some((name, suffix)) = reference.rsplit_once(':') {
        if let Ok(length) = suffix.trim().parse::<i64>() {
            return (name, Some(length));
        }
    }
    (reference, None)
}

/// First `n` characters for positive `n`, last `-n` characters for negative `n`.
fn apply_length(value: &str, length: Option<i64>) -> String {
    let Some(length) = length else {
        return value.to_string();
    };
    let count = value.chars().count();
    let take = (length.unsigned_abs() as usize).min(count);
    if length >= 0 {
        value.chars().take(take).collect()
    } else {
        value.chars().skip(count - take).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(scopes: &PropertyScopes, text: &str) -> (String, Vec<String>) {
        let mut missing = Vec::new();
        let value = scopes.expand(text, |name| missing.push(name.to_string()));
        (value, missing)
    }

    #[test]
    fn test_lookup_innermost_first() {
        let mut scopes = PropertyScopes::new();
        scopes.set("Platform", "Win64").unwrap();
        scopes.push();
        scopes.declare("platform", "Linux");
        assert_eq!(scopes.get("PLATFORM"), Some("Linux"));
        scopes.pop();
        assert_eq!(scopes.get("Platform"), Some("Win64"));
    }

    #[test]
    fn test_nested_expansion_innermost_first() {
        let mut scopes = PropertyScopes::new();
        scopes.set("B", "X").unwrap();
        scopes.set("AX", "hi").unwrap();
        assert_eq!(expand(&scopes, "$(A$(B))").0, "hi");
    }

    #[test]
    fn test_expansion_is_idempotent_without_references() {
        let scopes = PropertyScopes::new();
        for text in ["plain", "$ (x)", "trailing $(", "a)b"] {
            let (once, missing) = expand(&scopes, text);
            assert_eq!(once, text);
            assert!(missing.is_empty());
            assert_eq!(expand(&scopes, &once).0, once);
        }
    }

    #[test]
    fn test_expanded_values_are_not_rescanned() {
        let mut scopes = PropertyScopes::new();
        scopes.set("Literal", "$(Other)").unwrap();
        let (value, missing) = expand(&scopes, "[$(Literal)]");
        assert_eq!(value, "[$(Other)]");
        assert!(missing.is_empty());
    }

    #[test]
    fn test_missing_property_expands_empty() {
        let scopes = PropertyScopes::new();
        let (value, missing) = expand(&scopes, "a$(Nope)b");
        assert_eq!(value, "ab");
        assert_eq!(missing, vec!["Nope"]);
    }

    #[test]
    fn test_length_modifier() {
        let mut scopes = PropertyScopes::new();
        scopes.set("Version", "5.4.1-release").unwrap();
        assert_eq!(expand(&scopes, "$(Version:3)").0, "5.4");
        assert_eq!(expand(&scopes, "$(Version:-7)").0, "release");
        assert_eq!(expand(&scopes, "$(Version:100)").0, "5.4.1-release");
        assert_eq!(expand(&scopes, "$(Version:0)").0, "");
    }

    #[test]
    fn test_outer_redeclaration_after_nested_set_rejected() {
        let mut scopes = PropertyScopes::new();
        scopes.push(); // agent
        scopes.push(); // node
        scopes.set("Foo", "node").unwrap();
        scopes.pop();

        assert!(scopes.set("Foo", "agent").is_err());

        // A further-nested scope may declare it again.
        scopes.push();
        scopes.set("Foo", "next node").unwrap();
        assert_eq!(scopes.get("Foo"), Some("next node"));
    }

    #[test]
    fn test_set_updates_existing_outer_value() {
        let mut scopes = PropertyScopes::new();
        scopes.set("List", "a").unwrap();
        scopes.push();
        scopes.set("List", "a;b").unwrap();
        scopes.pop();
        assert_eq!(scopes.get("List"), Some("a;b"));
    }

    #[test]
    fn test_set_in_parent() {
        let mut scopes = PropertyScopes::new();
        assert!(scopes.set_in_parent("Out", "x").is_err());

        scopes.push(); // agent
        scopes.push(); // node
        scopes.set_in_parent("Out", "x").unwrap();
        scopes.pop();
        assert_eq!(scopes.get("Out"), Some("x"));
        scopes.pop();
        assert_eq!(scopes.get("Out"), None);

        scopes.set("Global", "g").unwrap();
        scopes.push();
        scopes.push();
        assert!(scopes.set_in_parent("Global", "y").is_err());
    }
}
