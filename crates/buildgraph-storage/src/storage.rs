use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use buildgraph_core::config::{AppConfig, StorageConfig};
use buildgraph_core::error::{BuildGraphError, Result};

use crate::archive::{create_archives, default_workers, extract_archives};
use crate::duplicate::is_duplicate_build_product;
use crate::manifest::{
    relative_name, write_atomic, TempStorageBlock, TempStorageFile, TempStorageManifest,
    TempStorageTagManifest,
};
use crate::retry::RetryPolicy;

/// Name of the zero-byte file marking a node as complete.
const COMPLETE_MARKER: &str = "Complete";

#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Whether this machine may write to shared storage.
    pub writable_shared: bool,
    /// Policy for manifest reads/writes and copies to shared storage.
    pub retry: RetryPolicy,
    /// Attempts per archive when extracting.
    pub unzip_attempts: u32,
    /// File name suffixes whose content digest is recorded.
    pub digest_extensions: Vec<String>,
    /// Compression workers; 0 means one per logical CPU.
    pub max_workers: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

impl StorageOptions {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            writable_shared: config.writable_shared,
            retry: RetryPolicy::from_config(config),
            unzip_attempts: config.unzip_attempts,
            digest_extensions: config.digest_extensions.clone(),
            max_workers: config.max_workers,
        }
    }

    fn workers(&self) -> usize {
        if self.max_workers == 0 {
            default_workers()
        } else {
            self.max_workers
        }
    }
}

/// The node that last archived or retrieved a file, and what it looked like then.
#[derive(Debug, Clone)]
struct FileProvenance {
    node: String,
    file: TempStorageFile,
}

/// Two-tier store of node outputs.
///
/// Layout under each tier root: `<Node>/Complete`, `<Node>/Manifest[-<Block>].xml`,
/// `<Node>/Tag-<Tag>.xml`, and in shared storage the archives named after
/// their manifest. Files themselves live in the workspace under `root_dir`.
///
/// Shared storage is never deleted by this type. Nothing prevents two
/// machines from archiving the same block concurrently; the later write
/// wins and `check_local_integrity` discards local state that no longer
/// matches.
pub struct TempStorage {
    local_dir: PathBuf,
    shared_dir: Option<PathBuf>,
    root_dir: PathBuf,
    options: StorageOptions,
    provenance: BTreeMap<String, FileProvenance>,
}

impl TempStorage {
    pub fn new(
        local_dir: impl Into<PathBuf>,
        shared_dir: Option<PathBuf>,
        root_dir: impl Into<PathBuf>,
        options: StorageOptions,
    ) -> Self {
        Self {
            local_dir: local_dir.into(),
            shared_dir,
            root_dir: root_dir.into(),
            options,
            provenance: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.local_storage_dir(),
            config.shared_storage_dir(),
            config.workspace_root(),
            StorageOptions::from_config(&config.storage),
        )
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn shared_dir(&self) -> Option<&Path> {
        self.shared_dir.as_deref()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn local_node_dir(&self, node: &str) -> PathBuf {
        self.local_dir.join(node)
    }

    fn shared_node_dir(&self, node: &str) -> Option<PathBuf> {
        self.shared_dir.as_ref().map(|dir| dir.join(node))
    }

    fn writable_shared_node_dir(&self, node: &str) -> Option<PathBuf> {
        if self.options.writable_shared {
            self.shared_node_dir(node)
        } else {
            None
        }
    }

    // ── Completion ──────────────────────────────────────────────

    /// Whether `node` has finished. A marker found only in shared storage is
    /// copied to local storage.
    pub fn is_complete(&self, node: &str) -> Result<bool> {
        let local = self.local_node_dir(node).join(COMPLETE_MARKER);
        if local.exists() {
            return Ok(true);
        }
        let Some(shared) = self.shared_node_dir(node) else {
            return Ok(false);
        };
        if !shared.join(COMPLETE_MARKER).exists() {
            return Ok(false);
        }
        fs::create_dir_all(self.local_node_dir(node))?;
        fs::write(&local, b"")?;
        debug!(node, "Found completion marker in shared storage");
        Ok(true)
    }

    pub fn mark_as_complete(&self, node: &str) -> Result<()> {
        let local = self.local_node_dir(node);
        fs::create_dir_all(&local)?;
        fs::write(local.join(COMPLETE_MARKER), b"")?;

        if let Some(shared) = self.writable_shared_node_dir(node) {
            self.options.retry.run("write completion marker", || {
                fs::create_dir_all(&shared)?;
                fs::write(shared.join(COMPLETE_MARKER), b"")?;
                Ok(())
            })?;
        }
        info!(node, "Marked node as complete");
        Ok(())
    }

    // ── Blocks ──────────────────────────────────────────────────

    /// Record `files` (relative to the workspace root) as the contents of
    /// `block`, archiving them to shared storage if it is writable.
    pub fn archive(
        &mut self,
        block: &TempStorageBlock,
        files: &[PathBuf],
    ) -> Result<TempStorageManifest> {
        let mut records = Vec::with_capacity(files.len());
        for relative in files {
            let record = TempStorageFile::from_disk(
                &self.root_dir,
                relative,
                &self.options.digest_extensions,
            )
            .map_err(|e| {
                BuildGraphError::Storage(format!(
                    "{}: unable to read '{}': {}",
                    block,
                    relative.display(),
                    e
                ))
            })?;
            records.push(record);
        }
        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        records.dedup_by(|a, b| a.relative_path == b.relative_path);

        self.check_duplicates(&block.node_name, &records)?;

        let mut manifest = TempStorageManifest {
            files: records,
            zip_files: Vec::new(),
        };
        let local_path = self
            .local_node_dir(&block.node_name)
            .join(block.manifest_file_name());

        match self.writable_shared_node_dir(&block.node_name) {
            Some(shared) => {
                let staging = self
                    .local_node_dir(&block.node_name)
                    .join(format!("{}.staging", block.base_name()));
                manifest.zip_files = create_archives(
                    &self.root_dir,
                    &manifest.files,
                    &staging,
                    &block.base_name(),
                    self.options.workers(),
                )?;

                for zip in &manifest.zip_files {
                    let operation = format!("copy {} to shared storage", zip.name);
                    self.options.retry.run(&operation, || {
                        fs::create_dir_all(&shared)?;
                        fs::copy(staging.join(&zip.name), shared.join(&zip.name))?;
                        Ok(())
                    })?;
                }
                if staging.exists() {
                    fs::remove_dir_all(&staging)?;
                }

                let xml = manifest.to_xml()?;
                let shared_path = shared.join(block.manifest_file_name());
                self.options
                    .retry
                    .run("write shared manifest", || write_atomic(&shared_path, xml.as_bytes()))?;
                write_atomic(&local_path, xml.as_bytes())?;
            }
            None => manifest.save(&local_path)?,
        }

        self.record(&block.node_name, &manifest.files);
        info!(
            block = %block,
            files = manifest.files.len(),
            bytes = manifest.total_length(),
            archives = manifest.zip_files.len(),
            "Archived temp storage block"
        );
        Ok(manifest)
    }

    /// Make the files of `block` available in the workspace.
    ///
    /// A local manifest means the files should already be in place. Otherwise
    /// the shared manifest is read, its archives extracted and timestamps
    /// restored. In both cases every file is checked against the manifest
    /// before returning, and the local manifest is only written once the
    /// check passes.
    pub fn retrieve(&mut self, block: &TempStorageBlock) -> Result<TempStorageManifest> {
        let local_path = self
            .local_node_dir(&block.node_name)
            .join(block.manifest_file_name());
        if local_path.exists() {
            let manifest = TempStorageManifest::load(&local_path)?;
            self.validate(block, &manifest)?;
            self.record(&block.node_name, &manifest.files);
            debug!(block = %block, files = manifest.files.len(), "Using local temp storage");
            return Ok(manifest);
        }

        let Some(shared) = self.shared_node_dir(&block.node_name) else {
            return Err(missing_manifest(block, &local_path));
        };
        let shared_path = shared.join(block.manifest_file_name());
        if !shared_path.exists() {
            return Err(missing_manifest(block, &shared_path));
        }

        let xml = self
            .options
            .retry
            .run("read shared manifest", || Ok(fs::read_to_string(&shared_path)?))?;
        let manifest = TempStorageManifest::from_xml(&xml)?;

        let archives: Vec<PathBuf> = manifest
            .zip_files
            .iter()
            .map(|zip| shared.join(&zip.name))
            .collect();
        let unzip_retry = self.options.retry.with_attempts(self.options.unzip_attempts);
        extract_archives(&archives, &self.root_dir, archives.len(), &unzip_retry)?;

        for file in &manifest.files {
            restore_timestamp(&file.path(&self.root_dir), file.last_write_time.into())?;
        }
        self.validate(block, &manifest)?;
        write_atomic(&local_path, xml.as_bytes())?;

        self.record(&block.node_name, &manifest.files);
        info!(
            block = %block,
            files = manifest.files.len(),
            archives = archives.len(),
            "Retrieved temp storage block"
        );
        Ok(manifest)
    }

    /// Check every file of `manifest` against the workspace. Allow-listed
    /// duplicate build products may differ.
    fn validate(&self, block: &TempStorageBlock, manifest: &TempStorageManifest) -> Result<()> {
        let mut mismatches = Vec::new();
        for file in &manifest.files {
            let Some(mismatch) = file.compare(&self.root_dir) else {
                continue;
            };
            if is_duplicate_build_product(Path::new(&file.relative_path)) {
                debug!(file = %file.relative_path, "Ignoring change to duplicate build product");
                continue;
            }
            match self.last_writer(&file.relative_path) {
                Some(writer) if writer != block.node_name => mismatches.push(format!(
                    "{} (last written by node '{}')",
                    mismatch, writer
                )),
                _ => mismatches.push(mismatch),
            }
        }
        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(BuildGraphError::Integrity {
                node: block.to_string(),
                mismatches,
            })
        }
    }

    // ── Tags ────────────────────────────────────────────────────

    /// Record the files in `tag` and the blocks holding them.
    pub fn archive_tag(
        &self,
        node: &str,
        tag: &str,
        files: &[PathBuf],
        blocks: &[TempStorageBlock],
    ) -> Result<TempStorageTagManifest> {
        let mut names: Vec<String> = files.iter().map(|f| relative_name(f)).collect();
        names.sort();
        names.dedup();
        let mut blocks = blocks.to_vec();
        blocks.sort();
        blocks.dedup();

        let manifest = TempStorageTagManifest {
            files: names,
            blocks,
            keys: Vec::new(),
        };
        let xml = manifest.to_xml()?;
        let file_name = tag_file_name(tag);

        if let Some(shared) = self.writable_shared_node_dir(node) {
            let shared_path = shared.join(&file_name);
            self.options
                .retry
                .run("write shared tag manifest", || write_atomic(&shared_path, xml.as_bytes()))?;
        }
        write_atomic(&self.local_node_dir(node).join(&file_name), xml.as_bytes())?;
        debug!(node, tag, files = manifest.files.len(), "Archived tag");
        Ok(manifest)
    }

    pub fn retrieve_tag(&self, node: &str, tag: &str) -> Result<TempStorageTagManifest> {
        let file_name = tag_file_name(tag);
        let local_path = self.local_node_dir(node).join(&file_name);
        if local_path.exists() {
            return TempStorageTagManifest::load(&local_path);
        }

        let shared_path = self
            .shared_node_dir(node)
            .map(|dir| dir.join(&file_name))
            .filter(|path| path.exists());
        let Some(shared_path) = shared_path else {
            return Err(BuildGraphError::MissingManifest {
                node: node.to_string(),
                block: tag.to_string(),
                path: local_path.display().to_string(),
            });
        };

        let xml = self
            .options
            .retry
            .run("read shared tag manifest", || Ok(fs::read_to_string(&shared_path)?))?;
        let manifest = TempStorageTagManifest::from_xml(&xml)?;
        write_atomic(&local_path, xml.as_bytes())?;
        debug!(node, tag, files = manifest.files.len(), "Retrieved tag");
        Ok(manifest)
    }

    // ── Local state ─────────────────────────────────────────────

    /// Discard local state for any node whose manifests no longer match
    /// shared storage or whose files no longer match its manifests.
    /// Returns the names of the discarded nodes.
    pub fn check_local_integrity(&mut self) -> Result<Vec<String>> {
        if !self.local_dir.exists() {
            return Ok(Vec::new());
        }

        let mut nodes: Vec<(String, PathBuf)> = fs::read_dir(&self.local_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect();
        nodes.sort();

        let mut discarded = Vec::new();
        for (node, dir) in nodes {
            if let Err(reason) = self.check_node(&node, &dir) {
                warn!(node = %node, reason = %reason, "Discarding local temp storage");
                fs::remove_dir_all(&dir)?;
                self.provenance.retain(|_, p| p.node != node);
                discarded.push(node);
            }
        }
        if discarded.is_empty() {
            debug!("Local temp storage is consistent");
        }
        Ok(discarded)
    }

    fn check_node(&self, node: &str, dir: &Path) -> std::result::Result<(), String> {
        let entries = fs::read_dir(dir).map_err(|e| e.to_string())?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !path.is_file() || !name.ends_with(".xml") {
                continue;
            }

            if let Some(shared) = self.shared_node_dir(node) {
                let shared_path = shared.join(&name);
                if shared_path.exists() {
                    let local = fs::read(&path).map_err(|e| e.to_string())?;
                    let remote = fs::read(&shared_path).map_err(|e| e.to_string())?;
                    if local != remote {
                        return Err(format!("{} differs from the shared copy", name));
                    }
                } else if self.options.writable_shared {
                    return Err(format!("{} is missing from shared storage", name));
                }
            }

            if name.starts_with("Manifest") {
                let manifest = TempStorageManifest::load(&path).map_err(|e| e.to_string())?;
                for file in &manifest.files {
                    if let Some(mismatch) = file.compare(&self.root_dir) {
                        if !is_duplicate_build_product(Path::new(&file.relative_path)) {
                            return Err(mismatch);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Remove all local temp storage. Shared storage is left alone.
    pub fn clean_local(&mut self) -> Result<()> {
        if self.local_dir.exists() {
            fs::remove_dir_all(&self.local_dir)?;
        }
        self.provenance.clear();
        info!(dir = %self.local_dir.display(), "Cleaned local temp storage");
        Ok(())
    }

    // ── Provenance ──────────────────────────────────────────────

    /// Node that most recently archived or retrieved `relative_path`.
    pub fn last_writer(&self, relative_path: &str) -> Option<&str> {
        self.provenance
            .get(relative_path)
            .map(|p| p.node.as_str())
    }

    fn record(&mut self, node: &str, files: &[TempStorageFile]) {
        for file in files {
            self.provenance.insert(
                file.relative_path.clone(),
                FileProvenance {
                    node: node.to_string(),
                    file: file.clone(),
                },
            );
        }
    }

    /// Fail if `node` changed files that another node already stored,
    /// unless they are allow-listed duplicate build products.
    fn check_duplicates(&self, node: &str, files: &[TempStorageFile]) -> Result<()> {
        let mut conflicts = Vec::new();
        for file in files {
            let Some(previous) = self.provenance.get(&file.relative_path) else {
                continue;
            };
            if previous.node == node || previous.file.same_content(file) {
                continue;
            }
            if is_duplicate_build_product(Path::new(&file.relative_path)) {
                debug!(
                    file = %file.relative_path,
                    previous = %previous.node,
                    node,
                    "Duplicate build product"
                );
                continue;
            }
            conflicts.push(format!(
                "{} was produced by '{}' and modified by '{}'",
                file.relative_path, previous.node, node
            ));
        }
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(BuildGraphError::Storage(format!(
                "Build products were modified by more than one node:\n{}",
                conflicts.join("\n")
            )))
        }
    }
}

/// `Tag-<Name>.xml`, without the leading `#`.
pub fn tag_file_name(tag: &str) -> String {
    format!("Tag-{}.xml", tag.trim_start_matches('#'))
}

fn missing_manifest(block: &TempStorageBlock, path: &Path) -> BuildGraphError {
    BuildGraphError::MissingManifest {
        node: block.node_name.clone(),
        block: if block.output_name.is_empty() {
            "default".to_string()
        } else {
            block.output_name.clone()
        },
        path: path.display().to_string(),
    }
}

fn restore_timestamp(path: &Path, time: SystemTime) -> Result<()> {
    let file = fs::File::options().write(true).open(path)?;
    file.set_modified(time)?;
    Ok(())
}
