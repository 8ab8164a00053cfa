//! Error types for the skill version and lock reconciliation engine.

use crate::types::SnapshotId;
use std::path::PathBuf;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: SnapshotId,
        actual: SnapshotId,
    },

    #[error("Failed to read {path:?} while hashing: {source}")]
    HashIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{first:?} and {second:?} both normalize to {key:?}")]
    DuplicatePath {
        key: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures reported by a fetch collaborator.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported source: {0}")]
    Unsupported(String),
}

/// Engine-level errors surfaced to callers of the command surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unreadable file while fingerprinting {path:?}: {source}")]
    HashIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Reference '{reference}' does not resolve for package '{package}'")]
    RefNotFound { package: String, reference: String },

    #[error("Reference '{reference}' is ambiguous for package '{package}': {candidates:?}")]
    AmbiguousRef {
        package: String,
        reference: String,
        candidates: Vec<String>,
    },

    #[error("Nothing to commit for package '{package}': working tree matches head")]
    NothingToCommit { package: String },

    #[error("Integrity mismatch for package '{package}': expected {expected}, found {actual}")]
    IntegrityMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Workspace lock {path:?} is held by another process (waited {waited_ms} ms)")]
    LockWriteConflict { path: PathBuf, waited_ms: u64 },

    #[error("Lock schema migration failed: {0}")]
    SchemaMigration(String),

    #[error("Lock file schema version {found} is older than {expected}; run lock migrate")]
    SchemaOutdated { found: u32, expected: u32 },

    #[error("Package '{0}' has no lock entry; run sync first")]
    PackageNotInstalled(String),

    #[error("Refusing to install '{package}': {path:?} exists and is not tracked")]
    UntrackedWorkingTree { package: String, path: PathBuf },

    #[error("No stash entries for package '{0}'")]
    NoStash(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(StorageError),
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SnapshotNotFound(id) => EngineError::NotFound(format!("snapshot {}", id)),
            StorageError::HashIo { path, source } => EngineError::HashIo { path, source },
            other => EngineError::StorageError(other),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::StorageError(StorageError::IoError(err))
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Per-package failure recorded during a sync pass.
#[derive(Debug, Error)]
#[error("Reconciliation of '{package}' failed: {cause}")]
pub struct ReconciliationError {
    pub package: String,
    #[source]
    pub cause: EngineError,
}

impl ReconciliationError {
    pub fn new(package: impl Into<String>, cause: impl Into<EngineError>) -> Self {
        Self {
            package: package.into(),
            cause: cause.into(),
        }
    }
}
