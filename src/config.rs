//! Configuration System
//!
//! Layered engine configuration: built-in defaults, the user's global file,
//! workspace files, then `SKILLSMITH_*` environment variables. Only
//! `ConfigLoader` touches the environment; everything else receives an
//! explicit `EngineConfig`.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub hashing: HashingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the engine keeps its files. Relative paths resolve against the
/// workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Engine data: snapshot store, history ledgers, staging
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Installed package working trees
    #[serde(default = "default_skills_dir")]
    pub skills_dir: PathBuf,

    #[serde(default = "default_manifest_file")]
    pub manifest_file: PathBuf,

    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from(".skillsmith")
}

pub(crate) fn default_skills_dir() -> PathBuf {
    PathBuf::from(".skillsmith/skills")
}

pub(crate) fn default_manifest_file() -> PathBuf {
    PathBuf::from("skillsmith.toml")
}

pub(crate) fn default_lock_file() -> PathBuf {
    PathBuf::from("skillsmith.lock")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            skills_dir: default_skills_dir(),
            manifest_file: default_manifest_file(),
            lock_file: default_lock_file(),
        }
    }
}

/// Sync pass tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum concurrent fetches
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,

    /// How long to wait for the workspace lock before giving up
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_lock_poll_ms")]
    pub lock_poll_ms: u64,

    /// File every fetched package must contain; empty disables the check
    #[serde(default = "default_required_file")]
    pub required_file: String,
}

pub(crate) fn default_fetch_workers() -> usize {
    4
}

pub(crate) fn default_lock_timeout_ms() -> u64 {
    10_000
}

pub(crate) fn default_lock_poll_ms() -> u64 {
    50
}

pub(crate) fn default_required_file() -> String {
    "SKILL.md".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_workers: default_fetch_workers(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_poll_ms: default_lock_poll_ms(),
            required_file: default_required_file(),
        }
    }
}

/// Registry that owns local evolution of newly installed packages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_name")]
    pub name: String,

    #[serde(default = "default_registry_id")]
    pub id: String,
}

pub(crate) fn default_registry_name() -> String {
    "local".to_string()
}

pub(crate) fn default_registry_id() -> String {
    "default".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: default_registry_name(),
            id: default_registry_id(),
        }
    }
}

/// GitHub fetcher settings
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// API token; sent as a bearer token when set
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Branch used when a source does not name one
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

pub(crate) fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

pub(crate) fn default_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_branch() -> String {
    "main".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            timeout_secs: default_timeout_secs(),
            default_branch: default_branch(),
        }
    }
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("default_branch", &self.default_branch)
            .finish()
    }
}

/// Fingerprint scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Path components excluded from fingerprints, snapshots, status and checkout
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
}

pub(crate) fn default_ignore() -> Vec<String> {
    vec![".skillsmith".to_string(), ".git".to_string()]
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            ignore: default_ignore(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Storage(String),
    Sync(String),
    Registry(String),
    GitHub(String),
    Hashing(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "storage: {}", msg),
            ValidationError::Sync(msg) => write!(f, "sync: {}", msg),
            ValidationError::Registry(msg) => write!(f, "registry: {}", msg),
            ValidationError::GitHub(msg) => write!(f, "github: {}", msg),
            ValidationError::Hashing(msg) => write!(f, "hashing: {}", msg),
            ValidationError::Logging(msg) => write!(f, "logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl EngineConfig {
    /// Validate the entire configuration, reporting every problem found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let storage_paths = [
            ("data_dir", &self.storage.data_dir),
            ("skills_dir", &self.storage.skills_dir),
            ("manifest_file", &self.storage.manifest_file),
            ("lock_file", &self.storage.lock_file),
        ];
        for (field, path) in storage_paths {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::Storage(format!("{} cannot be empty", field)));
            }
        }

        if self.sync.fetch_workers == 0 {
            errors.push(ValidationError::Sync("fetch_workers must be at least 1".to_string()));
        }
        if self.sync.lock_poll_ms == 0 {
            errors.push(ValidationError::Sync("lock_poll_ms must be positive".to_string()));
        }

        if self.registry.name.trim().is_empty() {
            errors.push(ValidationError::Registry("name cannot be empty".to_string()));
        }
        if self.registry.id.trim().is_empty() {
            errors.push(ValidationError::Registry("id cannot be empty".to_string()));
        }

        if !self.github.api_base.starts_with("http://") && !self.github.api_base.starts_with("https://") {
            errors.push(ValidationError::GitHub(format!(
                "api_base must be an http(s) URL, got '{}'",
                self.github.api_base
            )));
        }
        if self.github.timeout_secs == 0 {
            errors.push(ValidationError::GitHub("timeout_secs must be positive".to_string()));
        }
        if self.github.default_branch.trim().is_empty() {
            errors.push(ValidationError::GitHub("default_branch cannot be empty".to_string()));
        }

        for pattern in &self.hashing.ignore {
            if pattern.is_empty() || pattern.contains('/') || pattern.contains('\\') {
                errors.push(ValidationError::Hashing(format!(
                    "ignore entries must be single path components, got '{}'",
                    pattern
                )));
            }
        }

        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
