//! Lock file: the persisted manifest-to-installed mapping
//!
//! The lock file is a TOML document carrying an explicit `schema_version` and
//! one `[packages.<name>]` table per installed package. It is loaded in full,
//! mutated in memory and rewritten atomically on every change.

pub mod guard;
pub mod migrate;

use crate::error::{EngineError, StorageError};
use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use guard::WorkspaceLock;
pub use migrate::{migrate_lock_file, MigrationReport};

/// Schema version written by this crate
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

const SCHEMA_KEY: &str = "schema_version";
const PACKAGES_KEY: &str = "packages";

/// One installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub name: String,
    /// Registry the package was first imported from. Never rewritten.
    pub origin_registry: String,
    /// Source reference of the first import. Never rewritten.
    pub origin_ref: String,
    pub registry: String,
    pub registry_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_version: Option<String>,
    pub local_revision: u64,
    /// Fingerprint the working tree is expected to match
    pub integrity_hash: SnapshotId,
    pub head_snapshot_id: SnapshotId,
}

/// In-memory lock file
#[derive(Debug, Clone)]
pub struct LockStore {
    path: PathBuf,
    entries: BTreeMap<String, LockEntry>,
    /// Entries that did not parse, written back verbatim
    unrecognized: BTreeMap<String, toml::Value>,
}

impl LockStore {
    /// Empty store bound to `path`; nothing is written until `save`.
    pub fn empty<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: BTreeMap::new(),
            unrecognized: BTreeMap::new(),
        }
    }

    /// Load the lock file. A missing file is an empty store.
    ///
    /// Older schemas fail with `SchemaOutdated` (run `migrate_lock_file`);
    /// newer ones with `SchemaMigration`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let mut store = Self::empty(path);
        if !path.exists() {
            return Ok(store);
        }

        let document = read_document(path)?;
        let version = schema_version(&document)?;
        if version < CURRENT_SCHEMA_VERSION {
            return Err(EngineError::SchemaOutdated {
                found: version,
                expected: CURRENT_SCHEMA_VERSION,
            });
        }
        if version > CURRENT_SCHEMA_VERSION {
            return Err(EngineError::SchemaMigration(format!(
                "lock file schema version {} is newer than supported version {}",
                version, CURRENT_SCHEMA_VERSION
            )));
        }

        if let Some(packages) = document.get(PACKAGES_KEY).and_then(|v| v.as_table()) {
            for (key, value) in packages {
                match parse_entry(key, value) {
                    Some(entry) => {
                        store.entries.insert(key.clone(), entry);
                    }
                    None => {
                        warn!(package = %key, path = %path.display(), "Unrecognized lock entry kept as-is");
                        store.unrecognized.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        debug!(
            path = %path.display(),
            entries = store.entries.len(),
            unrecognized = store.unrecognized.len(),
            "Loaded lock file"
        );
        Ok(store)
    }

    /// Rewrite the whole lock file atomically.
    pub fn save(&self) -> Result<(), EngineError> {
        let mut packages = toml::Table::new();
        for (key, value) in &self.unrecognized {
            packages.insert(key.clone(), value.clone());
        }
        for (key, entry) in &self.entries {
            let value = toml::Value::try_from(entry).map_err(|e| {
                StorageError::Serialization(format!("Failed to encode lock entry '{}': {}", key, e))
            })?;
            packages.insert(key.clone(), value);
        }

        let mut document = toml::Table::new();
        document.insert(
            SCHEMA_KEY.to_string(),
            toml::Value::Integer(CURRENT_SCHEMA_VERSION as i64),
        );
        document.insert(PACKAGES_KEY.to_string(), toml::Value::Table(packages));

        write_document(&self.path, &document)?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "Saved lock file");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&LockEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Insert or replace the entry keyed by `entry.name`.
    pub fn insert(&mut self, entry: LockEntry) -> Option<LockEntry> {
        self.entries.insert(entry.name.clone(), entry)
    }

    pub fn remove(&mut self, name: &str) -> Option<LockEntry> {
        self.entries.remove(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LockEntry> {
        self.entries.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Keys of entries that could not be parsed.
    pub fn unrecognized(&self) -> Vec<String> {
        self.unrecognized.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entry(key: &str, value: &toml::Value) -> Option<LockEntry> {
    let entry: LockEntry = value.clone().try_into().ok()?;
    (entry.name == key).then_some(entry)
}

/// Schema version of a parsed lock document. No marker means version 1.
pub(crate) fn schema_version(document: &toml::Table) -> Result<u32, EngineError> {
    match document.get(SCHEMA_KEY) {
        None => Ok(1),
        Some(toml::Value::Integer(v)) if *v >= 1 && *v <= u32::MAX as i64 => Ok(*v as u32),
        Some(other) => Err(EngineError::SchemaMigration(format!(
            "unrecognized schema_version marker: {}",
            other
        ))),
    }
}

pub(crate) fn read_document(path: &Path) -> Result<toml::Table, EngineError> {
    let content = fs::read_to_string(path)?;
    content.parse::<toml::Table>().map_err(|e| {
        EngineError::SchemaMigration(format!("lock file {} is not valid TOML: {}", path.display(), e))
    })
}

/// Serialize and publish a lock document (temporary file + fsync + rename).
pub(crate) fn write_document(path: &Path, document: &toml::Table) -> Result<(), EngineError> {
    let content = toml::to_string(document)
        .map_err(|e| StorageError::Serialization(format!("Failed to encode lock file: {}", e)))?;
    write_atomic(path, content.as_bytes())?;
    Ok(())
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut temp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    temp_name.push(format!(".tmp-{}", std::process::id()));
    let temp_path = path.with_file_name(temp_name);
    {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        StorageError::IoError(e)
    })?;
    Ok(())
}
