//! Per-package history ledger
//!
//! Stored as `<data_dir>/history/<package>.json` and rewritten atomically.

use crate::error::{EngineError, StorageError};
use crate::lock::write_atomic;
use crate::types::SnapshotId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// How a history record came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Initial install from the package's origin
    Import,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub snapshot_id: SnapshotId,
    /// Head at the time of the commit; `None` for the import
    pub parent_snapshot_id: Option<SnapshotId>,
    pub local_revision: u64,
    pub kind: RecordKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    pub id: u64,
    pub snapshot_id: SnapshotId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageLedger {
    pub package: String,
    /// Insertion order, oldest first
    #[serde(default)]
    pub records: Vec<HistoryRecord>,
    #[serde(default)]
    pub tags: BTreeMap<String, SnapshotId>,
    /// Push order, oldest first
    #[serde(default)]
    pub stashes: Vec<StashEntry>,
    #[serde(default)]
    pub next_stash_id: u64,
    /// Snapshots of records discarded by `trim_to_revision`, released once
    /// the trimmed ledger is saved
    #[serde(skip)]
    pub discarded: Vec<SnapshotId>,
}

impl PackageLedger {
    pub fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            records: Vec::new(),
            tags: BTreeMap::new(),
            stashes: Vec::new(),
            next_stash_id: 1,
            discarded: Vec::new(),
        }
    }

    /// Load a ledger; a missing file is an empty ledger.
    pub fn load(path: &Path, package: &str) -> Result<Self, EngineError> {
        if !path.exists() {
            return Ok(Self::new(package));
        }
        let bytes = fs::read(path)?;
        let ledger: PackageLedger = serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::Serialization(format!("Failed to parse history {}: {}", path.display(), e))
        })?;
        Ok(ledger)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| StorageError::Serialization(format!("Failed to encode history: {}", e)))?;
        write_atomic(path, &bytes)?;
        Ok(())
    }

    pub fn delete(path: &Path) -> Result<(), EngineError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop records newer than the revision the lock file committed to.
    /// Returns the dropped records.
    pub fn trim_to_revision(&mut self, revision: u64) -> Vec<HistoryRecord> {
        let (kept, dropped): (Vec<_>, Vec<_>) = self
            .records
            .drain(..)
            .partition(|r| r.local_revision <= revision);
        self.records = kept;
        self.discarded
            .extend(dropped.iter().map(|r| r.snapshot_id.clone()));
        dropped
    }

    /// Push a stash entry with the next stash id.
    pub fn push_stash(
        &mut self,
        snapshot_id: SnapshotId,
        message: String,
        author: Option<String>,
    ) -> StashEntry {
        let id = self.next_stash_id.max(self.stashes.iter().map(|s| s.id + 1).max().unwrap_or(1));
        self.next_stash_id = id + 1;
        let entry = StashEntry {
            id,
            snapshot_id,
            message,
            author,
            timestamp: Utc::now(),
        };
        self.stashes.push(entry.clone());
        entry
    }

    /// Every snapshot reference this ledger holds (one per record, tag, stash).
    pub fn referenced_snapshots(&self) -> Vec<SnapshotId> {
        self.records
            .iter()
            .map(|r| r.snapshot_id.clone())
            .chain(self.tags.values().cloned())
            .chain(self.stashes.iter().map(|s| s.snapshot_id.clone()))
            .collect()
    }

    /// Distinct snapshots known to this package, for id-prefix resolution.
    pub fn known_snapshots(&self) -> Vec<SnapshotId> {
        let mut ids = self.referenced_snapshots();
        ids.sort();
        ids.dedup();
        ids
    }
}
