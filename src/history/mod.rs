//! Per-package version history
//!
//! Each installed package has one linear revision line. The state machine is
//! `{head_snapshot_id, local_revision}` in the lock entry:
//!
//! - `commit` moves both: a new snapshot becomes head and the revision goes up
//!   by exactly one.
//! - `checkout` moves only the head. The revision counter keeps its value, so
//!   committing after checking out an old snapshot continues counting from the
//!   latest revision, not from the one checked out.
//!
//! History records, tags and stashes live in the package ledger. The lock file
//! is the commit point: ledger records above the locked revision are ignored.
//!
//! Every referrer (lock head, record, tag, stash) holds one store reference.
//! References are retained before the write that introduces them and released
//! after the write that drops them.

pub mod diff;
pub mod ledger;

use crate::error::EngineError;
use crate::lock::{LockEntry, LockStore};
use crate::tree::hasher::fingerprint_dir;
use crate::tree::FileTree;
use crate::types::{is_valid_name, SnapshotId};
use crate::workspace::WorkspaceContext;
use chrono::Utc;
use diff::{compare_trees, diff_trees, FileChange, WorkingTreeStatus};
use ledger::{HistoryRecord, PackageLedger, RecordKind, StashEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Symbolic name of the current head
pub const HEAD_REF: &str = "HEAD";

/// Shortest snapshot id prefix accepted as a ref
pub const MIN_PREFIX_LEN: usize = 7;

const DEFAULT_STASH_MESSAGE: &str = "WIP";

/// Result of a checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub package: String,
    pub snapshot_id: SnapshotId,
    pub previous_head: SnapshotId,
    /// Unchanged by checkout
    pub local_revision: u64,
}

/// Result of binding a tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagBinding {
    pub package: String,
    pub tag: String,
    pub snapshot_id: SnapshotId,
    /// Snapshot the tag pointed at before, if it was re-bound
    pub previous: Option<SnapshotId>,
}

/// Version control operations on installed packages
pub struct VersionHistory<'a> {
    ctx: &'a WorkspaceContext,
    author: Option<String>,
}

impl<'a> VersionHistory<'a> {
    pub fn new(ctx: &'a WorkspaceContext) -> Self {
        Self { ctx, author: None }
    }

    /// Record `author` on the commits and stashes this instance writes.
    /// Blank names are ignored.
    pub fn with_author(mut self, author: Option<&str>) -> Self {
        self.author = author
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        self
    }

    /// Snapshot the working tree as the next revision.
    ///
    /// Fails with `NothingToCommit` when the working tree matches head.
    pub fn commit(&self, package: &str, message: &str) -> Result<HistoryRecord, EngineError> {
        let _guard = self.ctx.lock_workspace()?;
        let mut lock = self.ctx.load_lock()?;
        let mut entry = self.ctx.require_entry(&lock, package)?;
        let mut ledger = self.ctx.load_ledger(&entry)?;

        let tree = self.read_working_tree(package)?;
        let snapshot_id = tree.fingerprint();
        if snapshot_id == entry.head_snapshot_id {
            return Err(EngineError::NothingToCommit {
                package: package.to_string(),
            });
        }

        self.ctx.store.put(&tree)?;
        // One reference for the history record, one for the lock head
        self.ctx
            .store
            .retain_all(&[snapshot_id.clone(), snapshot_id.clone()])?;

        let record = HistoryRecord {
            snapshot_id: snapshot_id.clone(),
            parent_snapshot_id: Some(entry.head_snapshot_id.clone()),
            local_revision: entry.local_revision + 1,
            kind: RecordKind::Commit,
            message: message.to_string(),
            author: self.author.clone(),
            timestamp: Utc::now(),
        };
        ledger.records.push(record.clone());
        self.save_ledger(package, &mut ledger)?;

        let previous_head = std::mem::replace(&mut entry.head_snapshot_id, snapshot_id.clone());
        entry.integrity_hash = snapshot_id.clone();
        entry.local_revision = record.local_revision;
        lock.insert(entry);
        lock.save()?;

        self.ctx.store.release(&previous_head)?;
        info!(
            package,
            revision = record.local_revision,
            snapshot = %snapshot_id.short(),
            "Committed working tree"
        );
        Ok(record)
    }

    /// Materialize the snapshot `reference` resolves to and make it head.
    ///
    /// Uncommitted changes in the working tree are overwritten. The local
    /// revision is left untouched and no history record is written.
    pub fn checkout(&self, package: &str, reference: &str) -> Result<CheckoutResult, EngineError> {
        let _guard = self.ctx.lock_workspace()?;
        let mut lock = self.ctx.load_lock()?;
        let mut entry = self.ctx.require_entry(&lock, package)?;
        let ledger = self.ctx.load_ledger(&entry)?;

        let snapshot_id = self.resolve_in(&entry, &ledger, reference)?;
        let tree = self.ctx.store.get(&snapshot_id)?;
        tree.materialize(&self.ctx.paths.package_dir(package), &self.ctx.walker)?;

        self.ctx.store.retain(&snapshot_id)?;
        let previous_head = std::mem::replace(&mut entry.head_snapshot_id, snapshot_id.clone());
        entry.integrity_hash = snapshot_id.clone();
        let local_revision = entry.local_revision;
        lock.insert(entry);
        lock.save()?;
        self.ctx.store.release(&previous_head)?;

        info!(
            package,
            reference,
            snapshot = %snapshot_id.short(),
            revision = local_revision,
            "Checked out snapshot"
        );
        Ok(CheckoutResult {
            package: package.to_string(),
            snapshot_id,
            previous_head,
            local_revision,
        })
    }

    /// Save the working tree as a stash entry. Head and revision are untouched;
    /// a clean working tree is stashed too.
    pub fn stash_push(&self, package: &str, message: Option<&str>) -> Result<StashEntry, EngineError> {
        let _guard = self.ctx.lock_workspace()?;
        let lock = self.ctx.load_lock()?;
        let entry = self.ctx.require_entry(&lock, package)?;
        let mut ledger = self.ctx.load_ledger(&entry)?;

        let tree = self.read_working_tree(package)?;
        let snapshot_id = self.ctx.store.put(&tree)?;
        self.ctx.store.retain(&snapshot_id)?;

        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_STASH_MESSAGE);
        let stash = ledger.push_stash(snapshot_id, message.to_string(), self.author.clone());
        self.save_ledger(package, &mut ledger)?;

        info!(package, stash = stash.id, snapshot = %stash.snapshot_id.short(), "Stashed working tree");
        Ok(stash)
    }

    /// Materialize the latest (or the given) stash entry onto the working tree.
    ///
    /// The stash entry is kept and the lock entry is not modified, so the
    /// package reads as drifted until the change is committed.
    pub fn stash_apply(&self, package: &str, stash_id: Option<u64>) -> Result<StashEntry, EngineError> {
        let _guard = self.ctx.lock_workspace()?;
        let lock = self.ctx.load_lock()?;
        let entry = self.ctx.require_entry(&lock, package)?;
        let ledger = self.ctx.load_ledger(&entry)?;

        let stash = match stash_id {
            None => ledger.stashes.last().cloned(),
            Some(id) => ledger.stashes.iter().find(|s| s.id == id).cloned(),
        };
        let stash = match (stash, stash_id) {
            (Some(stash), _) => stash,
            (None, None) => return Err(EngineError::NoStash(package.to_string())),
            (None, Some(id)) => {
                return Err(EngineError::NotFound(format!(
                    "stash {} for package '{}'",
                    id, package
                )))
            }
        };

        let tree = self.ctx.store.get(&stash.snapshot_id)?;
        tree.materialize(&self.ctx.paths.package_dir(package), &self.ctx.walker)?;
        info!(package, stash = stash.id, "Applied stash");
        Ok(stash)
    }

    /// Stash entries, newest first.
    pub fn stash_list(&self, package: &str) -> Result<Vec<StashEntry>, EngineError> {
        let ledger = self.read_ledger(package)?;
        Ok(ledger.stashes.into_iter().rev().collect())
    }

    /// Bind `tag` to the snapshot `reference` resolves to (default: head).
    /// Re-binding an existing tag replaces it.
    pub fn tag(&self, package: &str, tag: &str, reference: Option<&str>) -> Result<TagBinding, EngineError> {
        if !is_valid_name(tag) || tag == HEAD_REF {
            return Err(EngineError::InvalidName(format!("'{}' is not a usable tag name", tag)));
        }

        let _guard = self.ctx.lock_workspace()?;
        let lock = self.ctx.load_lock()?;
        let entry = self.ctx.require_entry(&lock, package)?;
        let mut ledger = self.ctx.load_ledger(&entry)?;

        let snapshot_id = self.resolve_in(&entry, &ledger, reference.unwrap_or(HEAD_REF))?;
        self.ctx.store.retain(&snapshot_id)?;
        let previous = ledger.tags.insert(tag.to_string(), snapshot_id.clone());
        self.save_ledger(package, &mut ledger)?;

        if let Some(previous) = &previous {
            self.ctx.store.release(previous)?;
            info!(
                package,
                tag,
                from = %previous.short(),
                to = %snapshot_id.short(),
                "Re-bound existing tag"
            );
        } else {
            info!(package, tag, snapshot = %snapshot_id.short(), "Tagged snapshot");
        }

        Ok(TagBinding {
            package: package.to_string(),
            tag: tag.to_string(),
            snapshot_id,
            previous,
        })
    }

    /// Tag bindings sorted by name.
    pub fn tags(&self, package: &str) -> Result<Vec<(String, SnapshotId)>, EngineError> {
        Ok(self.read_ledger(package)?.tags.into_iter().collect())
    }

    /// History records newest first, in insertion order. This is not
    /// necessarily sorted by revision. `limit` keeps only the newest records.
    pub fn history(
        &self,
        package: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryRecord>, EngineError> {
        let ledger = self.read_ledger(package)?;
        let newest_first = ledger.records.into_iter().rev();
        Ok(match limit {
            Some(limit) => newest_first.take(limit).collect(),
            None => newest_first.collect(),
        })
    }

    /// Changes of the working tree against `reference` (default: head),
    /// optionally restricted to one path.
    pub fn diff(
        &self,
        package: &str,
        reference: Option<&str>,
        path: Option<&str>,
    ) -> Result<Vec<FileChange>, EngineError> {
        let lock = self.ctx.load_lock()?;
        let entry = self.ctx.require_entry(&lock, package)?;
        let ledger = self.ctx.load_ledger(&entry)?;

        let snapshot_id = self.resolve_in(&entry, &ledger, reference.unwrap_or(HEAD_REF))?;
        let base = self.ctx.store.get(&snapshot_id)?;
        let current = self.read_working_tree(package)?;
        Ok(diff_trees(&base, &current, path))
    }

    /// Classify every path of the working tree against head.
    pub fn status(&self, package: &str) -> Result<WorkingTreeStatus, EngineError> {
        let lock = self.ctx.load_lock()?;
        let entry = self.ctx.require_entry(&lock, package)?;

        let base = self.ctx.store.get(&entry.head_snapshot_id)?;
        let current = self.read_working_tree(package)?;
        Ok(WorkingTreeStatus {
            package: package.to_string(),
            head_snapshot_id: entry.head_snapshot_id,
            entries: compare_trees(&base, &current),
        })
    }

    /// Re-hash the working tree and compare it with the lock's integrity hash.
    pub fn verify(&self, package: &str) -> Result<SnapshotId, EngineError> {
        let lock = self.ctx.load_lock()?;
        let entry = self.ctx.require_entry(&lock, package)?;
        verify_entry(self.ctx, &entry)
    }

    /// Resolve a ref for an installed package without changing anything.
    pub fn resolve(&self, package: &str, reference: &str) -> Result<SnapshotId, EngineError> {
        let lock = self.ctx.load_lock()?;
        let entry = self.ctx.require_entry(&lock, package)?;
        let ledger = self.ctx.load_ledger(&entry)?;
        self.resolve_in(&entry, &ledger, reference)
    }

    /// Ref grammar, in order: `HEAD`, tag name, full snapshot id or unique
    /// prefix of at least `MIN_PREFIX_LEN` hex chars, decimal local revision.
    fn resolve_in(
        &self,
        entry: &LockEntry,
        ledger: &PackageLedger,
        reference: &str,
    ) -> Result<SnapshotId, EngineError> {
        let reference = reference.trim();
        if reference == HEAD_REF {
            return Ok(entry.head_snapshot_id.clone());
        }
        if let Some(id) = ledger.tags.get(reference) {
            return Ok(id.clone());
        }

        if reference.len() >= MIN_PREFIX_LEN && reference.bytes().all(|b| b.is_ascii_hexdigit()) {
            let prefix = reference.to_ascii_lowercase();
            let mut known = ledger.known_snapshots();
            if !known.contains(&entry.head_snapshot_id) {
                known.push(entry.head_snapshot_id.clone());
            }
            let mut candidates: Vec<SnapshotId> = known
                .into_iter()
                .filter(|id| id.as_str().starts_with(&prefix))
                .collect();
            if candidates.is_empty() {
                if let Some(full) = SnapshotId::parse(&prefix) {
                    if self.ctx.store.contains(&full) {
                        candidates.push(full);
                    }
                }
            }
            match candidates.len() {
                0 => {}
                1 => return Ok(candidates.remove(0)),
                _ => {
                    return Err(EngineError::AmbiguousRef {
                        package: entry.name.clone(),
                        reference: reference.to_string(),
                        candidates: candidates.iter().map(|c| c.to_string()).collect(),
                    })
                }
            }
        }

        if let Ok(revision) = reference.parse::<u64>() {
            if let Some(record) = ledger.records.iter().rev().find(|r| r.local_revision == revision) {
                return Ok(record.snapshot_id.clone());
            }
        }

        debug!(package = %entry.name, reference, "Reference did not resolve");
        Err(EngineError::RefNotFound {
            package: entry.name.clone(),
            reference: reference.to_string(),
        })
    }

    /// Persist the ledger, then drop references of records trimmed on load.
    fn save_ledger(&self, package: &str, ledger: &mut PackageLedger) -> Result<(), EngineError> {
        ledger.save(&self.ctx.paths.ledger_path(package))?;
        let discarded = std::mem::take(&mut ledger.discarded);
        if !discarded.is_empty() {
            self.ctx.store.release_all(&discarded)?;
        }
        Ok(())
    }

    fn read_ledger(&self, package: &str) -> Result<PackageLedger, EngineError> {
        let lock = self.ctx.load_lock()?;
        let entry = self.ctx.require_entry(&lock, package)?;
        self.ctx.load_ledger(&entry)
    }

    fn read_working_tree(&self, package: &str) -> Result<FileTree, EngineError> {
        Ok(FileTree::read_from_dir(
            &self.ctx.paths.package_dir(package),
            &self.ctx.walker,
        )?)
    }
}

/// Integrity check of one lock entry against its working tree.
pub(crate) fn verify_entry(ctx: &WorkspaceContext, entry: &LockEntry) -> Result<SnapshotId, EngineError> {
    let actual = fingerprint_dir(&ctx.paths.package_dir(&entry.name), &ctx.walker)?;
    if actual != entry.integrity_hash {
        return Err(EngineError::IntegrityMismatch {
            package: entry.name.clone(),
            expected: entry.integrity_hash.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(actual)
}

/// Record the import of a freshly installed package: writes a new ledger
/// with one `Import` record at revision 0. The caller has already retained
/// the snapshot for the record and the lock head.
pub(crate) fn write_import_ledger(
    ctx: &WorkspaceContext,
    package: &str,
    snapshot_id: &SnapshotId,
    message: String,
) -> Result<PackageLedger, EngineError> {
    let mut ledger = PackageLedger::new(package);
    ledger.records.push(HistoryRecord {
        snapshot_id: snapshot_id.clone(),
        parent_snapshot_id: None,
        local_revision: 0,
        kind: RecordKind::Import,
        message,
        author: None,
        timestamp: Utc::now(),
    });
    ledger.save(&ctx.paths.ledger_path(package))?;
    Ok(ledger)
}

/// Every reference a package holds: its lock head plus everything in its
/// ledger file (including records above the locked revision).
pub(crate) fn package_references(
    ctx: &WorkspaceContext,
    entry: Option<&LockEntry>,
    package: &str,
) -> Result<Vec<SnapshotId>, EngineError> {
    let ledger = PackageLedger::load(&ctx.paths.ledger_path(package), package)?;
    let mut refs = ledger.referenced_snapshots();
    if let Some(entry) = entry {
        refs.push(entry.head_snapshot_id.clone());
    }
    Ok(refs)
}

/// Drop a package's lock entry and ledger, then release all its references.
/// The working tree is left on disk.
pub(crate) fn forget_package(
    ctx: &WorkspaceContext,
    lock: &mut LockStore,
    package: &str,
) -> Result<usize, EngineError> {
    let entry = lock.remove(package);
    let refs = package_references(ctx, entry.as_ref(), package)?;
    lock.save()?;
    PackageLedger::delete(&ctx.paths.ledger_path(package))?;
    ctx.store.release_all(&refs)?;
    Ok(refs.len())
}
