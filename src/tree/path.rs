//! Path canonicalization and normalization utilities

use crate::error::StorageError;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Canonicalize an on-disk path (resolves symlinks, `..`, `.`).
///
/// Uses dunce so Windows paths come back without the `\\?\` prefix.
pub fn canonicalize_path(path: &Path) -> Result<PathBuf, StorageError> {
    dunce::canonicalize(path)
        .map_err(|e| StorageError::InvalidPath(format!("Failed to canonicalize {:?}: {}", path, e)))
}

/// Normalize a path string for hashing (without filesystem access)
///
/// Unicode is normalized to NFC and `\` separators become `/`.
pub fn normalize_path_string(path: &str) -> String {
    let normalized: String = path.nfc().collect();
    let mut result = normalized.replace('\\', "/");
    while result.len() > 1 && result.ends_with('/') {
        result.pop();
    }
    result
}

/// Relative, `/`-separated key for `path` under `root`.
pub fn relative_key(root: &Path, path: &Path) -> Result<String, StorageError> {
    let rel = path.strip_prefix(root).map_err(|_| {
        StorageError::InvalidPath(format!("{:?} is not inside {:?}", path, root))
    })?;

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            other => {
                return Err(StorageError::InvalidPath(format!(
                    "Unexpected component {:?} in {:?}",
                    other, rel
                )))
            }
        }
    }
    Ok(normalize_path_string(&parts.join("/")))
}

/// Convert a stored relative key back into a native path under `root`.
///
/// Keys that are absolute or try to climb out of `root` are rejected.
pub fn resolve_key(root: &Path, key: &str) -> Result<PathBuf, StorageError> {
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for part in key.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                return Err(StorageError::InvalidPath(format!(
                    "Snapshot path escapes its root: {}",
                    key
                )))
            }
            name => {
                out.push(name);
                depth += 1;
            }
        }
    }
    if depth == 0 {
        return Err(StorageError::InvalidPath(format!("Empty snapshot path: {:?}", key)));
    }
    Ok(out)
}
