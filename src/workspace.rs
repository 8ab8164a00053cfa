//! Workspace layout and shared engine state
//!
//! `WorkspaceContext` bundles what every operation needs: resolved paths, the
//! configuration, the snapshot store and the walker settings.

use crate::config::{EngineConfig, StorageConfig};
use crate::error::EngineError;
use crate::history::ledger::PackageLedger;
use crate::lock::{LockEntry, LockStore, WorkspaceLock};
use crate::store::ContentStore;
use crate::tree::walker::WalkerConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Absolute paths of everything the engine reads or writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub store_dir: PathBuf,
    pub history_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub skills_dir: PathBuf,
    pub manifest_file: PathBuf,
    pub lock_file: PathBuf,
}

impl WorkspacePaths {
    /// Resolve storage settings against the workspace root.
    pub fn resolve(root: &Path, storage: &StorageConfig) -> Self {
        let absolute = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        };
        let data_dir = absolute(&storage.data_dir);
        Self {
            root: root.to_path_buf(),
            store_dir: data_dir.join("store"),
            history_dir: data_dir.join("history"),
            staging_dir: data_dir.join("staging"),
            skills_dir: absolute(&storage.skills_dir),
            manifest_file: absolute(&storage.manifest_file),
            lock_file: absolute(&storage.lock_file),
            data_dir,
        }
    }

    /// Working tree directory of an installed package
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.skills_dir.join(name)
    }

    pub fn ledger_path(&self, name: &str) -> PathBuf {
        self.history_dir.join(format!("{}.json", name))
    }
}

/// Shared state of one workspace
pub struct WorkspaceContext {
    pub paths: WorkspacePaths,
    pub config: EngineConfig,
    pub store: ContentStore,
    pub walker: WalkerConfig,
}

impl WorkspaceContext {
    /// Open the workspace at `root` with an explicit configuration.
    pub fn open(root: &Path, config: EngineConfig) -> Result<Self, EngineError> {
        let root = if root.exists() {
            dunce::canonicalize(root)?
        } else {
            root.to_path_buf()
        };
        let paths = WorkspacePaths::resolve(&root, &config.storage);
        let store = ContentStore::open(&paths.store_dir)?;
        let walker = WalkerConfig::with_ignore(config.hashing.ignore.clone());
        Ok(Self {
            paths,
            config,
            store,
            walker,
        })
    }

    /// Enter the workspace exclusive section.
    pub fn lock_workspace(&self) -> Result<WorkspaceLock, EngineError> {
        WorkspaceLock::acquire(
            &self.paths.lock_file,
            Duration::from_millis(self.config.sync.lock_timeout_ms),
            Duration::from_millis(self.config.sync.lock_poll_ms),
        )
    }

    pub fn load_lock(&self) -> Result<LockStore, EngineError> {
        LockStore::load(&self.paths.lock_file)
    }

    /// Lock entry for `name` or `PackageNotInstalled`.
    pub fn require_entry(&self, lock: &LockStore, name: &str) -> Result<LockEntry, EngineError> {
        lock.get(name)
            .cloned()
            .ok_or_else(|| EngineError::PackageNotInstalled(name.to_string()))
    }

    /// Load the ledger of an installed package, discarding records the lock
    /// file never committed to.
    pub fn load_ledger(&self, entry: &LockEntry) -> Result<PackageLedger, EngineError> {
        let mut ledger = PackageLedger::load(&self.paths.ledger_path(&entry.name), &entry.name)?;
        let dropped = ledger.trim_to_revision(entry.local_revision);
        if !dropped.is_empty() {
            warn!(
                package = %entry.name,
                dropped = dropped.len(),
                "Discarding history records beyond the locked revision"
            );
        }
        Ok(ledger)
    }
}
