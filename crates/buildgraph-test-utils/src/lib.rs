//! Test fixtures shared by the buildgraph crates.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use buildgraph_core::traits::DiagnosticSink;
use buildgraph_core::types::{format_diagnostic, ScriptLocation, Severity};

/// A diagnostic sink that records everything it receives.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<(ScriptLocation, Severity, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(ScriptLocation, Severity, String)> {
        self.entries.lock().unwrap().clone()
    }

    /// Messages of the given severity.
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s, _)| *s == severity)
            .map(|(_, _, m)| m.clone())
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.messages(Severity::Error)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.messages(Severity::Warning)
    }

    /// Entries rendered as `file(line): severity: message`.
    pub fn lines(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(l, s, m)| format_diagnostic(l, *s, m))
            .collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, location: &ScriptLocation, severity: Severity, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((location.clone(), severity, message.to_string()));
    }
}

/// A temporary workspace directory removed on drop.
pub struct TempWorkspace {
    dir: tempfile::TempDir,
}

impl TempWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write `contents` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.path(relative)).unwrap()
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
