//! Tree fingerprinting using BLAKE3

use crate::error::StorageError;
use crate::tree::walker::{Walker, WalkerConfig};
use crate::types::{Hash, SnapshotId};
use blake3::Hasher;
use std::fs;
use std::path::Path;

/// Compute content hash for file bytes
pub fn compute_content_hash(content: &[u8]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(content);
    *hasher.finalize().as_bytes()
}

/// Combine `(relative_path, content_hash)` pairs into a tree fingerprint.
///
/// Fingerprint = hash(for each entry sorted by path: path_len || path || content_hash)
///
/// Entries are sorted here, so callers may pass them in any order.
pub fn fingerprint_entries<'a, I>(entries: I) -> SnapshotId
where
    I: IntoIterator<Item = (&'a str, Hash)>,
{
    let mut sorted: Vec<(&str, Hash)> = entries.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Hasher::new();
    for (path, content_hash) in sorted {
        let path_bytes = path.as_bytes();
        // Path length (8 bytes, big-endian) keeps adjacent records unambiguous
        hasher.update(&(path_bytes.len() as u64).to_be_bytes());
        hasher.update(path_bytes);
        hasher.update(&content_hash);
    }
    SnapshotId::from_hash(hasher.finalize().as_bytes())
}

/// Fingerprint a directory tree on disk.
///
/// Raw bytes are hashed; only the relative path strings are normalized.
/// Fails with `StorageError::HashIo` if any file is unreadable mid-scan.
pub fn fingerprint_dir(root: &Path, config: &WalkerConfig) -> Result<SnapshotId, StorageError> {
    let files = Walker::with_config(root.to_path_buf(), config.clone()).walk()?;

    let mut entries = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = fs::read(&file.path).map_err(|source| StorageError::HashIo {
            path: file.path.clone(),
            source,
        })?;
        entries.push((file.key.as_str(), compute_content_hash(&bytes)));
    }

    let fingerprint = fingerprint_entries(entries);
    tracing::debug!(
        root = %root.display(),
        files = files.len(),
        fingerprint = %fingerprint.short(),
        "Fingerprinted tree"
    );
    Ok(fingerprint)
}
