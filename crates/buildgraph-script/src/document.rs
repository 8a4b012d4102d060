//! Line-annotated script documents.
//!
//! Documents are parsed into a plain element tree. Elements from every
//! loaded file share one arena, so an `ElementId` stays valid for the whole
//! read (macros capture element ids and expand them later). Source locations
//! are kept in a side table indexed by the same id.

use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use buildgraph_core::error::{BuildGraphError, Result};
use buildgraph_core::types::ScriptLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub usize);

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<ElementId>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}

#[derive(Debug, Default)]
pub struct DocumentArena {
    elements: Vec<Element>,
    locations: Vec<ScriptLocation>,
}

impl DocumentArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    pub fn location(&self, id: ElementId) -> &ScriptLocation {
        &self.locations[id.0]
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Load and parse a script file, returning its root element.
    pub fn load(&mut self, path: &Path) -> Result<ElementId> {
        let text = std::fs::read_to_string(path)
            .map_err(|_| BuildGraphError::ScriptNotFound(path.display().to_string()))?;
        self.parse(&text, path)
    }

    /// Parse `text`, attributing locations to `file`. Returns the root element.
    pub fn parse(&mut self, text: &str, file: &Path) -> Result<ElementId> {
        let xml_error = |message: String| BuildGraphError::Xml(format!("{}: {}", file.display(), message));

        let mut reader = Reader::from_str(text);
        reader.trim_text(true);

        let mut lines = LineCounter::new(text);
        let mut stack: Vec<ElementId> = Vec::new();
        let mut root: Option<ElementId> = None;

        loop {
            let start = reader.buffer_position();
            let event = reader.read_event().map_err(|e| {
                let line = lines.line_at(reader.buffer_position());
                xml_error(format!("line {}: {}", line, e))
            })?;

            let (element, has_children) = match event {
                Event::Start(ref e) => (e, true),
                Event::Empty(ref e) => (e, false),
                Event::End(_) => {
                    stack.pop();
                    continue;
                }
                Event::Eof => break,
                // Text, comments, declarations and processing instructions carry no graph content.
                _ => continue,
            };

            let tag_offset = text[start..].find('<').map_or(start, |o| start + o);
            let line = lines.line_at(tag_offset);
            let id = self
                .push_element(element, ScriptLocation::new(file, line))
                .map_err(|message| xml_error(format!("line {}: {}", line, message)))?;

            match stack.last() {
                Some(parent) => self.elements[parent.0].children.push(id),
                None if root.is_none() => root = Some(id),
                None => return Err(xml_error("multiple root elements".to_string())),
            }
            if has_children {
                stack.push(id);
            }
        }

        root.ok_or_else(|| xml_error("document has no root element".to_string()))
    }

    fn push_element(
        &mut self,
        start: &BytesStart<'_>,
        location: ScriptLocation,
    ) -> std::result::Result<ElementId, String> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let value = attribute
                .unescape_value()
                .map_err(|e| e.to_string())?
                .into_owned();
            attributes.push((key, value));
        }

        let id = ElementId(self.elements.len());
        self.elements.push(Element {
            name,
            attributes,
            children: Vec::new(),
        });
        self.locations.push(location);
        Ok(id)
    }
}

/// Maps byte offsets to 1-based line numbers. Offsets must be queried in
/// non-decreasing order.
struct LineCounter<'a> {
    text: &'a str,
    offset: usize,
    line: usize,
}

impl<'a> LineCounter<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            offset: 0,
            line: 1,
        }
    }

    fn line_at(&mut self, offset: usize) -> usize {
        let offset = offset.min(self.text.len());
        if offset > self.offset {
            self.line += self.text.as_bytes()[self.offset..offset]
                .iter()
                .filter(|&&b| b == b'\n')
                .count();
            self.offset = offset;
        }
        self.line
    }
}

/// Where a script path given relative to `including` resolves to.
pub fn resolve_relative(including: &Path, script: &str) -> PathBuf {
    let script = Path::new(script);
    if script.is_absolute() {
        return script.to_path_buf();
    }
    match including.parent() {
        Some(dir) => dir.join(script),
        None => script.to_path_buf(),
    }
}
