use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use buildgraph_core::error::{BuildGraphError, Result};

/// Largest difference between a recorded and an on-disk timestamp that still
/// counts as unchanged. Zip archives only keep whole seconds.
pub const TIMESTAMP_TOLERANCE_MS: i64 = 1000;

/// Identifies one stored output of a node. The default block has an empty
/// output name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TempStorageBlock {
    #[serde(rename = "@NodeName")]
    pub node_name: String,
    #[serde(rename = "@OutputName", default)]
    pub output_name: String,
}

impl TempStorageBlock {
    pub fn new(node_name: impl Into<String>, output_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            output_name: output_name.into(),
        }
    }

    /// `Manifest` or `Manifest-<Output>`. Archives are named after it too.
    pub fn base_name(&self) -> String {
        if self.output_name.is_empty() {
            "Manifest".to_string()
        } else {
            format!("Manifest-{}", self.output_name)
        }
    }

    pub fn manifest_file_name(&self) -> String {
        format!("{}.xml", self.base_name())
    }
}

impl fmt::Display for TempStorageBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.output_name.is_empty() {
            write!(f, "{}", self.node_name)
        } else {
            write!(f, "{}/{}", self.node_name, self.output_name)
        }
    }
}

/// A file recorded in a manifest, relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempStorageFile {
    /// Relative path with `/` separators.
    #[serde(rename = "@Name")]
    pub relative_path: String,
    #[serde(rename = "@LastWriteTimeUtc")]
    pub last_write_time: DateTime<Utc>,
    #[serde(rename = "@Length")]
    pub length: u64,
    /// SHA-256 of the content, kept only for files that are often rewritten
    /// with unchanged size and timestamp.
    #[serde(rename = "@Digest", default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl TempStorageFile {
    /// Record a file's current on-disk state.
    pub fn from_disk(root: &Path, relative: &Path, digest_extensions: &[String]) -> Result<Self> {
        let path = root.join(relative);
        let metadata = fs::metadata(&path)?;
        let digest = if needs_digest(relative, digest_extensions) {
            Some(file_digest(&path)?)
        } else {
            None
        };
        Ok(Self {
            relative_path: relative_name(relative),
            last_write_time: DateTime::<Utc>::from(metadata.modified()?),
            length: metadata.len(),
            digest,
        })
    }

    pub fn path(&self, root: &Path) -> PathBuf {
        root.join(&self.relative_path)
    }

    /// Compare against the file on disk. Returns a description of the first
    /// difference found, or `None` if the file still matches.
    pub fn compare(&self, root: &Path) -> Option<String> {
        let path = self.path(root);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(_) => return Some(format!("{}: file is missing", self.relative_path)),
        };
        if metadata.len() != self.length {
            return Some(format!(
                "{}: expected {} bytes, found {}",
                self.relative_path,
                self.length,
                metadata.len()
            ));
        }
        let modified = match metadata.modified() {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(e) => return Some(format!("{}: {}", self.relative_path, e)),
        };
        if !within_tolerance(self.last_write_time, modified) {
            return Some(format!(
                "{}: expected last write time {}, found {}",
                self.relative_path,
                self.last_write_time.to_rfc3339(),
                modified.to_rfc3339()
            ));
        }
        if let Some(expected) = &self.digest {
            match file_digest(&path) {
                Ok(actual) if &actual == expected => {}
                Ok(actual) => {
                    return Some(format!(
                        "{}: expected digest {}, found {}",
                        self.relative_path, expected, actual
                    ))
                }
                Err(e) => return Some(format!("{}: {}", self.relative_path, e)),
            }
        }
        None
    }

    /// Whether two records describe the same content.
    pub fn same_content(&self, other: &TempStorageFile) -> bool {
        self.length == other.length
            && within_tolerance(self.last_write_time, other.last_write_time)
            && (self.digest.is_none() || other.digest.is_none() || self.digest == other.digest)
    }
}

fn within_tolerance(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_milliseconds().abs() <= TIMESTAMP_TOLERANCE_MS
}

/// Zip archive holding part of a manifest's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempStorageZipFile {
    #[serde(rename = "@Name")]
    pub name: String,
    #[serde(rename = "@Length")]
    pub length: u64,
}

/// Files stored for one block and the archives that hold them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "TempStorageManifest")]
pub struct TempStorageManifest {
    #[serde(rename = "File", default)]
    pub files: Vec<TempStorageFile>,
    #[serde(rename = "ZipFile", default)]
    pub zip_files: Vec<TempStorageZipFile>,
}

impl TempStorageManifest {
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    pub fn find(&self, relative_path: &str) -> Option<&TempStorageFile> {
        self.files.iter().find(|f| f.relative_path == relative_path)
    }

    pub fn to_xml(&self) -> Result<String> {
        to_xml(self)
    }

    pub fn from_xml(text: &str) -> Result<Self> {
        from_xml(text)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_xml(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_xml()?.as_bytes())
    }
}

/// Files in a tag, and the blocks that must be retrieved to get them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "TempStorageTagManifest")]
pub struct TempStorageTagManifest {
    #[serde(rename = "File", default)]
    pub files: Vec<String>,
    #[serde(rename = "Block", default)]
    pub blocks: Vec<TempStorageBlock>,
    /// Cache keys the tag's contents were produced from.
    #[serde(rename = "Key", default)]
    pub keys: Vec<String>,
}

impl TempStorageTagManifest {
    pub fn to_xml(&self) -> Result<String> {
        to_xml(self)
    }

    pub fn from_xml(text: &str) -> Result<Self> {
        from_xml(text)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_xml(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_xml()?.as_bytes())
    }

    /// Workspace-relative paths of the tag's files.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(PathBuf::from).collect()
    }
}

fn to_xml<T: Serialize>(value: &T) -> Result<String> {
    quick_xml::se::to_string(value).map_err(|e| BuildGraphError::Xml(e.to_string()))
}

fn from_xml<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T> {
    quick_xml::de::from_str(text).map_err(|e| BuildGraphError::Xml(e.to_string()))
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write via a temporary sibling and rename, so readers never see half a file.
/// The sibling name is unique per process and call, so concurrent writers of
/// the same manifest never share one.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(
        "{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    if let Err(e) = fs::write(&temp, contents).and_then(|()| fs::rename(&temp, path)) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

/// Path with `/` separators and no `.` components.
pub fn relative_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn needs_digest(path: &Path, extensions: &[String]) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    extensions
        .iter()
        .any(|ext| name.ends_with(&ext.to_ascii_lowercase()))
}

/// SHA-256 hex digest of a file's content.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}
