//! Snapshot reference counts
//!
//! Persisted as a 4-byte little-endian version header followed by a bincode
//! list of `(snapshot_id, count)` entries.

use crate::error::StorageError;
use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

const REF_INDEX_VERSION: u32 = 1;

/// Reference count per snapshot id
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefIndex {
    pub(crate) counts: BTreeMap<SnapshotId, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefIndexEntry {
    snapshot_id: String,
    count: u64,
}

impl RefIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, id: &SnapshotId) -> u64 {
        self.counts.get(id).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, id: &SnapshotId) -> u64 {
        let count = self.counts.entry(id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement, saturating at zero. Returns the new count and whether the
    /// decrement underflowed.
    pub fn decrement(&mut self, id: &SnapshotId) -> (u64, bool) {
        match self.counts.get_mut(id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                (*count, false)
            }
            _ => (0, true),
        }
    }

    /// Drop zero entries for the given ids once they are physically gone.
    pub fn forget(&mut self, id: &SnapshotId) {
        self.counts.remove(id);
    }

    /// Load the index from disk. A missing file is an empty index.
    pub fn load_from_disk<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(RefIndex::new());
        }

        let bytes = fs::read(path)?;
        if bytes.len() < 4 {
            return Err(StorageError::Serialization(format!(
                "Reference index {:?} is truncated",
                path
            )));
        }
        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if version != REF_INDEX_VERSION {
            return Err(StorageError::Serialization(format!(
                "Unsupported reference index version: {}",
                version
            )));
        }

        let entries: Vec<RefIndexEntry> = bincode::deserialize(&bytes[4..]).map_err(|e| {
            StorageError::Serialization(format!("Failed to deserialize reference index: {}", e))
        })?;

        let mut counts = BTreeMap::new();
        for entry in entries {
            let id = SnapshotId::parse(&entry.snapshot_id).ok_or_else(|| {
                StorageError::Serialization(format!(
                    "Invalid snapshot id in reference index: {}",
                    entry.snapshot_id
                ))
            })?;
            counts.insert(id, entry.count);
        }
        Ok(RefIndex { counts })
    }

    /// Save the index atomically (temporary file + rename).
    pub fn save_to_disk<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entries: Vec<RefIndexEntry> = self
            .counts
            .iter()
            .map(|(id, count)| RefIndexEntry {
                snapshot_id: id.to_string(),
                count: *count,
            })
            .collect();
        let payload = bincode::serialize(&entries).map_err(|e| {
            StorageError::Serialization(format!("Failed to serialize reference index: {}", e))
        })?;

        let temp_path = path.with_extension("bin.tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&REF_INDEX_VERSION.to_le_bytes())?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StorageError::IoError(e)
        })?;
        Ok(())
    }
}
