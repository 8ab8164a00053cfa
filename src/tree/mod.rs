//! Package file trees
//!
//! A `FileTree` is the full content of one package working tree: every tracked
//! regular file keyed by its normalized relative path. Snapshots store exactly
//! this structure, and the tree fingerprint is the snapshot id.

pub mod hasher;
pub mod path;
pub mod walker;

use crate::error::StorageError;
use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walker::{Walker, WalkerConfig};

/// In-memory copy of a package tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTree {
    pub files: BTreeMap<String, Vec<u8>>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files
            .insert(path::normalize_path_string(&key.into()), content.into());
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|c| c.len() as u64).sum()
    }

    /// Fingerprint of this tree; identical to hashing the same files on disk.
    pub fn fingerprint(&self) -> SnapshotId {
        hasher::fingerprint_entries(
            self.files
                .iter()
                .map(|(k, v)| (k.as_str(), hasher::compute_content_hash(v))),
        )
    }

    /// Read every tracked file under `root` into memory.
    pub fn read_from_dir(root: &Path, config: &WalkerConfig) -> Result<Self, StorageError> {
        let walked = Walker::with_config(root.to_path_buf(), config.clone()).walk()?;
        let mut files = BTreeMap::new();
        for file in walked {
            let content = fs::read(&file.path).map_err(|source| StorageError::HashIo {
                path: file.path.clone(),
                source,
            })?;
            files.insert(file.key, content);
        }
        Ok(Self { files })
    }

    /// Replace the tracked content of `dest` with this tree.
    ///
    /// The tree is staged in a sibling directory and swapped into place; entries
    /// matching the ignore list (engine-internal files) are carried over from
    /// the old directory untouched.
    pub fn materialize(&self, dest: &Path, config: &WalkerConfig) -> Result<(), StorageError> {
        let parent = dest
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(format!("{:?} has no parent", dest)))?;
        let name = dest
            .file_name()
            .ok_or_else(|| StorageError::InvalidPath(format!("{:?} has no file name", dest)))?
            .to_string_lossy()
            .into_owned();
        fs::create_dir_all(parent)?;

        let staging = sibling(parent, &name, "materialize");
        let retired = sibling(parent, &name, "retired");
        remove_if_exists(&staging)?;
        remove_if_exists(&retired)?;

        if let Err(e) = self.write_into(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if dest.exists() {
            for entry in fs::read_dir(dest)? {
                let entry = entry?;
                let entry_name = entry.file_name().to_string_lossy().into_owned();
                if config.is_ignored_name(&entry_name) {
                    fs::rename(entry.path(), staging.join(&entry_name))?;
                }
            }
            fs::rename(dest, &retired)?;
        }

        if let Err(e) = fs::rename(&staging, dest) {
            if retired.exists() {
                let _ = fs::rename(&retired, dest);
            }
            return Err(e.into());
        }
        remove_if_exists(&retired)?;
        Ok(())
    }

    /// Write all files of this tree into a fresh directory.
    pub fn write_into(&self, dir: &Path) -> Result<(), StorageError> {
        fs::create_dir_all(dir)?;
        for (key, content) in &self.files {
            let target = path::resolve_key(dir, key)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, content)?;
        }
        Ok(())
    }
}

fn sibling(parent: &Path, name: &str, purpose: &str) -> PathBuf {
    parent.join(format!(".{}.{}-{}", name, purpose, std::process::id()))
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}
