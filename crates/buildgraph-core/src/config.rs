use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BuildGraphError, Result};

/// Top-level buildgraph configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub script: ScriptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory for scripts, `Exists()` conditions and build products.
    #[serde(default = "default_root")]
    pub root: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> String {
    ".".to_string()
}

/// Temp storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Local temp storage directory. Relative paths resolve against the workspace root.
    #[serde(default = "default_local_dir")]
    pub local_dir: String,
    /// Shared temp storage directory (network share). None = single-machine build.
    #[serde(default)]
    pub shared_dir: Option<String>,
    /// Whether this machine may write to shared storage.
    #[serde(default = "default_writable_shared")]
    pub writable_shared: bool,
    /// Attempts for manifest reads/writes and bulk copies to the share.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Fixed delay between attempts, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Attempts per archive when extracting from shared storage.
    #[serde(default = "default_unzip_attempts")]
    pub unzip_attempts: u32,
    /// File extensions whose content digest is recorded in manifests.
    #[serde(default = "default_digest_extensions")]
    pub digest_extensions: Vec<String>,
    /// Compression worker count (0 = logical CPU count).
    #[serde(default)]
    pub max_workers: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            shared_dir: None,
            writable_shared: default_writable_shared(),
            retry_attempts: default_retry_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            unzip_attempts: default_unzip_attempts(),
            digest_extensions: default_digest_extensions(),
            max_workers: 0,
        }
    }
}

impl StorageConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn default_local_dir() -> String {
    "Engine/Saved/BuildGraph".to_string()
}

fn default_writable_shared() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_unzip_attempts() -> u32 {
    3
}

fn default_digest_extensions() -> Vec<String> {
    vec![".version".into(), ".modules".into(), ".target".into()]
}

/// Script reader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Default properties placed in the outermost scope.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Default `ForEach` separator.
    #[serde(default = "default_foreach_separator")]
    pub foreach_separator: char,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            foreach_separator: default_foreach_separator(),
        }
    }
}

fn default_foreach_separator() -> char {
    ';'
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| BuildGraphError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| BuildGraphError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve the workspace root (expand ~).
    pub fn workspace_root(&self) -> PathBuf {
        expand_home(&self.workspace.root)
    }

    /// Resolve the local temp storage directory.
    pub fn local_storage_dir(&self) -> PathBuf {
        let dir = expand_home(&self.storage.local_dir);
        if dir.is_absolute() {
            dir
        } else {
            self.workspace_root().join(dir)
        }
    }

    /// Resolve the shared temp storage directory, if configured.
    pub fn shared_storage_dir(&self) -> Option<PathBuf> {
        self.storage.shared_dir.as_deref().map(expand_home)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_BUILDGRAPH_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_BUILDGRAPH_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_BUILDGRAPH_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_BUILDGRAPH_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_BUILDGRAPH_VAR}\"");
    }

    #[test]
    fn test_script_properties_are_not_env_expanded() {
        let result = expand_env_vars("value = \"$(Platform)\"");
        assert_eq!(result, "value = \"$(Platform)\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.workspace.root, ".");
        assert!(config.storage.shared_dir.is_none());
        assert!(config.storage.writable_shared);
        assert_eq!(config.storage.retry_attempts, 3);
        assert_eq!(config.storage.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.storage.unzip_attempts, 3);
        assert_eq!(config.storage.digest_extensions.len(), 3);
        assert_eq!(config.script.foreach_separator, ';');
    }

    #[test]
    fn test_relative_local_dir_resolves_against_root() {
        let toml_str = r#"
[workspace]
root = "/build/ws"

[storage]
local_dir = "Saved/Temp"
shared_dir = "/mnt/share/Builds"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.local_storage_dir(), PathBuf::from("/build/ws/Saved/Temp"));
        assert_eq!(
            config.shared_storage_dir(),
            Some(PathBuf::from("/mnt/share/Builds"))
        );
    }
}
