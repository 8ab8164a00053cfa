//! Content-addressed snapshot storage
//!
//! Snapshots are immutable file trees stored on the filesystem under their
//! fingerprint:
//! `{root}/objects/{hex[0..2]}/{hex[2..4]}/{snapshot_id}.snap`
//!
//! Writes are staged in `{root}/tmp` and published by rename, so a snapshot is
//! never addressable under its final id until its bytes are durable. Reference
//! counts are kept in a separate index (`refs.bin`); `collect()` deletes any
//! snapshot whose count is zero or missing.

pub mod refs;

use crate::error::StorageError;
use crate::tree::FileTree;
use crate::types::SnapshotId;
use parking_lot::Mutex;
use refs::RefIndex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const OBJECTS_DIR: &str = "objects";
const TMP_DIR: &str = "tmp";
const REFS_FILE: &str = "refs.bin";
const SNAPSHOT_EXT: &str = "snap";

/// On-disk form of one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSnapshot {
    snapshot_id: String,
    tree: FileTree,
}

/// Outcome of a garbage collection pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectReport {
    pub removed: Vec<SnapshotId>,
    pub bytes_freed: u64,
    pub retained: usize,
}

/// Content-addressed snapshot store
pub struct ContentStore {
    root: PathBuf,
    refs_lock: Mutex<()>,
}

impl ContentStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self {
            root,
            refs_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store a tree and return its snapshot id.
    ///
    /// Idempotent: if a snapshot with the same fingerprint already exists the
    /// call is a no-op and no bytes are duplicated.
    pub fn put(&self, tree: &FileTree) -> Result<SnapshotId, StorageError> {
        let snapshot_id = tree.fingerprint();
        if self.contains(&snapshot_id) {
            debug!(snapshot = %snapshot_id.short(), "Snapshot already stored");
            return Ok(snapshot_id);
        }

        let stored = StoredSnapshot {
            snapshot_id: snapshot_id.to_string(),
            tree: tree.clone(),
        };
        let serialized = bincode::serialize(&stored)
            .map_err(|e| StorageError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;

        let final_path = self.object_path(&snapshot_id);
        let temp_path = self.temp_path(&snapshot_id);
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StorageError::IoError(e)
        })?;

        debug!(
            snapshot = %snapshot_id.short(),
            files = tree.len(),
            bytes = tree.total_bytes(),
            "Stored snapshot"
        );
        Ok(snapshot_id)
    }

    /// Retrieve a snapshot tree, verifying its fingerprint.
    pub fn get(&self, snapshot_id: &SnapshotId) -> Result<FileTree, StorageError> {
        let path = self.object_path(snapshot_id);
        if !path.exists() {
            return Err(StorageError::SnapshotNotFound(snapshot_id.clone()));
        }

        let bytes = fs::read(&path)?;
        let stored: StoredSnapshot = bincode::deserialize(&bytes).map_err(|e| {
            StorageError::Serialization(format!("Failed to deserialize snapshot {:?}: {}", path, e))
        })?;

        let actual = stored.tree.fingerprint();
        if &actual != snapshot_id {
            return Err(StorageError::HashMismatch {
                expected: snapshot_id.clone(),
                actual,
            });
        }
        Ok(stored.tree)
    }

    /// Check if a snapshot exists
    pub fn contains(&self, snapshot_id: &SnapshotId) -> bool {
        self.object_path(snapshot_id).exists()
    }

    /// Increment the reference count of a stored snapshot.
    pub fn retain(&self, snapshot_id: &SnapshotId) -> Result<u64, StorageError> {
        self.retain_all(std::slice::from_ref(snapshot_id))?;
        self.ref_count(snapshot_id)
    }

    /// Decrement the reference count of a snapshot (saturating at zero).
    pub fn release(&self, snapshot_id: &SnapshotId) -> Result<u64, StorageError> {
        self.release_all(std::slice::from_ref(snapshot_id))?;
        self.ref_count(snapshot_id)
    }

    /// Retain several references in one index rewrite.
    pub fn retain_all(&self, snapshot_ids: &[SnapshotId]) -> Result<(), StorageError> {
        for id in snapshot_ids {
            if !self.contains(id) {
                return Err(StorageError::SnapshotNotFound(id.clone()));
            }
        }
        self.update_refs(|index| {
            for id in snapshot_ids {
                index.increment(id);
            }
        })
    }

    /// Release several references in one index rewrite.
    pub fn release_all(&self, snapshot_ids: &[SnapshotId]) -> Result<(), StorageError> {
        self.update_refs(|index| {
            for id in snapshot_ids {
                let (_, underflow) = index.decrement(id);
                if underflow {
                    warn!(snapshot = %id.short(), "Released snapshot with no references");
                }
            }
        })
    }

    /// Current reference count of a snapshot.
    pub fn ref_count(&self, snapshot_id: &SnapshotId) -> Result<u64, StorageError> {
        Ok(RefIndex::load_from_disk(self.refs_path())?.count(snapshot_id))
    }

    /// All snapshot ids physically present in the store, sorted.
    pub fn list(&self) -> Result<Vec<SnapshotId>, StorageError> {
        let mut ids = Vec::new();
        let objects = self.root.join(OBJECTS_DIR);
        for entry in walkdir::WalkDir::new(&objects).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| {
                StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to list snapshots: {}", e),
                ))
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(SnapshotId::parse)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Physically delete every snapshot whose reference count is zero.
    ///
    /// Snapshots with no entry in the index (orphans left by an interrupted
    /// operation) count as zero. Stale staging files are removed as well.
    pub fn collect(&self) -> Result<CollectReport, StorageError> {
        let _guard = self.refs_lock.lock();
        let refs_path = self.refs_path();
        let mut index = RefIndex::load_from_disk(&refs_path)?;
        let mut report = CollectReport::default();

        for id in self.list()? {
            if index.count(&id) > 0 {
                report.retained += 1;
                continue;
            }
            let path = self.object_path(&id);
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            fs::remove_file(&path)?;
            index.forget(&id);
            report.bytes_freed += size;
            report.removed.push(id);
        }

        for entry in fs::read_dir(self.root.join(TMP_DIR))? {
            let entry = entry?;
            report.bytes_freed += entry.metadata().map(|m| m.len()).unwrap_or(0);
            fs::remove_file(entry.path())?;
        }

        index.save_to_disk(&refs_path)?;
        info!(
            removed = report.removed.len(),
            retained = report.retained,
            bytes_freed = report.bytes_freed,
            "Collected unreferenced snapshots"
        );
        Ok(report)
    }

    fn update_refs<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut RefIndex),
    {
        let _guard = self.refs_lock.lock();
        let path = self.refs_path();
        let mut index = RefIndex::load_from_disk(&path)?;
        f(&mut index);
        index.save_to_disk(&path)
    }

    fn refs_path(&self) -> PathBuf {
        self.root.join(REFS_FILE)
    }

    /// Path structure: `{root}/objects/{hex[0..2]}/{hex[2..4]}/{snapshot_id}.snap`
    fn object_path(&self, snapshot_id: &SnapshotId) -> PathBuf {
        let hex = snapshot_id.as_str();
        self.root
            .join(OBJECTS_DIR)
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{}.{}", hex, SNAPSHOT_EXT))
    }

    fn temp_path(&self, snapshot_id: &SnapshotId) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        self.root.join(TMP_DIR).join(format!(
            "{}.{}.{}.partial",
            snapshot_id.as_str(),
            std::process::id(),
            nanos
        ))
    }
}
