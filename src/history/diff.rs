//! Working tree comparison: status classification and unified diffs

use crate::tree::FileTree;
use crate::types::SnapshotId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How one path differs between a base tree and the working tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    Unchanged,
}

/// One changed path with its textual diff (`None` for binary content)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub unified_diff: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub path: String,
    pub kind: ChangeKind,
}

/// Working tree compared against the package head
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingTreeStatus {
    pub package: String,
    pub head_snapshot_id: SnapshotId,
    pub entries: Vec<StatusEntry>,
}

impl WorkingTreeStatus {
    fn paths(&self, kind: ChangeKind) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.path.as_str())
            .collect()
    }

    pub fn added(&self) -> Vec<&str> {
        self.paths(ChangeKind::Added)
    }

    pub fn modified(&self) -> Vec<&str> {
        self.paths(ChangeKind::Modified)
    }

    pub fn removed(&self) -> Vec<&str> {
        self.paths(ChangeKind::Removed)
    }

    pub fn unchanged(&self) -> Vec<&str> {
        self.paths(ChangeKind::Unchanged)
    }

    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| e.kind == ChangeKind::Unchanged)
    }
}

/// Classify every path present in either tree, sorted by path.
pub fn compare_trees(base: &FileTree, current: &FileTree) -> Vec<StatusEntry> {
    let paths: BTreeSet<&String> = base.files.keys().chain(current.files.keys()).collect();
    paths
        .into_iter()
        .map(|path| {
            let kind = match (base.files.get(path), current.files.get(path)) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Removed,
                (Some(old), Some(new)) if old != new => ChangeKind::Modified,
                _ => ChangeKind::Unchanged,
            };
            StatusEntry {
                path: path.clone(),
                kind,
            }
        })
        .collect()
}

/// Changed paths between `base` and `current`, optionally restricted to one
/// file or directory.
pub fn diff_trees(base: &FileTree, current: &FileTree, path: Option<&str>) -> Vec<FileChange> {
    let filter = path.map(|p| p.trim_matches('/'));
    compare_trees(base, current)
        .into_iter()
        .filter(|entry| entry.kind != ChangeKind::Unchanged)
        .filter(|entry| match filter {
            None | Some("") => true,
            Some(p) => entry.path == p || entry.path.starts_with(&format!("{}/", p)),
        })
        .map(|entry| {
            let old = base.files.get(&entry.path).map(Vec::as_slice);
            let new = current.files.get(&entry.path).map(Vec::as_slice);
            FileChange {
                unified_diff: unified_diff(&entry.path, old, new),
                path: entry.path,
                kind: entry.kind,
            }
        })
        .collect()
}

/// Unified diff with `a/<path>` and `b/<path>` headers. A missing side is
/// treated as empty text; binary content yields `None`.
fn unified_diff(path: &str, old: Option<&[u8]>, new: Option<&[u8]>) -> Option<String> {
    let old = as_text(old.unwrap_or_default())?;
    let new = as_text(new.unwrap_or_default())?;

    let patch = diffy::create_patch(old, new).to_string();
    let mut out = format!("--- a/{}\n+++ b/{}\n", path, path);
    for line in patch.lines().skip(2) {
        out.push_str(line);
        out.push('\n');
    }
    Some(out)
}

fn as_text(bytes: &[u8]) -> Option<&str> {
    if bytes.contains(&0) {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}
