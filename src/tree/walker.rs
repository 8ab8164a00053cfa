//! Filesystem walker for traversing a package working tree

use crate::error::StorageError;
use crate::tree::path;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A regular file found under the walk root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Normalized `/`-separated path relative to the root
    pub key: String,
    /// Absolute on-disk path
    pub path: PathBuf,
}

/// Filesystem walker configuration
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Follow symbolic links; loops surface as hash I/O errors
    pub follow_symlinks: bool,
    /// Path components excluded from hashing, snapshots and checkout
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: true,
            ignore_patterns: vec![".skillsmith".to_string(), ".git".to_string()],
        }
    }
}

impl WalkerConfig {
    pub fn with_ignore(ignore_patterns: Vec<String>) -> Self {
        Self {
            ignore_patterns,
            ..Self::default()
        }
    }

    /// True when a single path component is engine-internal.
    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.ignore_patterns.iter().any(|p| p == name)
    }
}

/// Filesystem walker
pub struct Walker {
    root: PathBuf,
    config: WalkerConfig,
}

impl Walker {
    /// Create a walker with custom configuration
    pub fn with_config(root: PathBuf, config: WalkerConfig) -> Self {
        Self { root, config }
    }

    /// Walk the tree and collect all regular files.
    ///
    /// Returns files sorted by key for determinism. Two files whose names
    /// normalize to the same key fail with `DuplicatePath`.
    pub fn walk(&self) -> Result<Vec<WalkedFile>, StorageError> {
        if !self.root.is_dir() {
            return Err(StorageError::HashIo {
                path: self.root.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "working tree directory does not exist",
                ),
            });
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| !self.should_ignore(entry));

        for entry in walker {
            let entry = entry.map_err(|e| walk_error(&self.root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let key = path::relative_key(&self.root, entry.path())?;
            files.push(WalkedFile {
                key,
                path: entry.path().to_path_buf(),
            });
        }

        files.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(pair) = files.windows(2).find(|pair| pair[0].key == pair[1].key) {
            return Err(StorageError::DuplicatePath {
                key: pair[0].key.clone(),
                first: pair[0].path.clone(),
                second: pair[1].path.clone(),
            });
        }
        Ok(files)
    }

    fn should_ignore(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        self.config
            .is_ignored_name(&entry.file_name().to_string_lossy())
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> StorageError {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    let message = err.to_string();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, message));
    StorageError::HashIo { path, source }
}
