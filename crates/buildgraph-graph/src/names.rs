/// Characters that may not appear in node, agent or tag names.
const INVALID_NAME_CHARS: &[char] = &['^', '<', '>', ':', '"', '/', '\\', '|', '?', '*', ';', '#', '$', '(', ')'];

/// Whether `name` is usable as a node, agent or aggregate name.
///
/// Names may contain spaces but must not start or end with whitespace.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.trim() == name
        && !name.chars().any(|c| INVALID_NAME_CHARS.contains(&c) || c.is_control())
}

/// Whether `name` is a valid tag: `#` followed by a valid name.
pub fn is_valid_tag_name(name: &str) -> bool {
    name.strip_prefix('#').is_some_and(is_valid_name)
}

/// Default output tag of a node.
pub fn default_tag_name(node_name: &str) -> String {
    format!("#{}", node_name)
}

/// Case-insensitive lookup key for names and tags.
pub(crate) fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}
