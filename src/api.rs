//! Command surface
//!
//! `SkillApi` is the single entry point for callers: one method per command,
//! each returning a structured result or a typed `EngineError`. It owns the
//! workspace context and the fetcher registry; every call is a direct,
//! synchronous invocation.

use crate::config::{ConfigLoader, EngineConfig};
use crate::error::EngineError;
use crate::fetch::FetcherRegistry;
use crate::history::diff::{FileChange, WorkingTreeStatus};
use crate::history::ledger::{HistoryRecord, StashEntry};
use crate::history::{CheckoutResult, TagBinding, VersionHistory};
use crate::lock::{migrate_lock_file, LockEntry, MigrationReport};
use crate::manifest::{Manifest, PackageDeclaration};
use crate::reconcile::{Reconciler, SyncReport};
use crate::store::CollectReport;
use crate::types::SnapshotId;
use crate::workspace::{WorkspaceContext, WorkspacePaths};
use std::path::Path;
use tracing::info;

pub struct SkillApi {
    ctx: WorkspaceContext,
    fetchers: FetcherRegistry,
}

impl SkillApi {
    /// Open a workspace with an explicit configuration and the built-in
    /// fetchers.
    pub fn new(root: &Path, config: EngineConfig) -> Result<Self, EngineError> {
        if let Err(errors) = config.validate() {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(EngineError::ConfigError(messages.join("; ")));
        }
        let ctx = WorkspaceContext::open(root, config)?;
        let fetchers = FetcherRegistry::with_defaults(&ctx.paths.root, &ctx.config)?;
        Ok(Self { ctx, fetchers })
    }

    /// Open a workspace with a caller-supplied fetcher registry.
    pub fn with_fetchers(
        root: &Path,
        config: EngineConfig,
        fetchers: FetcherRegistry,
    ) -> Result<Self, EngineError> {
        let mut api = Self::new(root, config)?;
        api.fetchers = fetchers;
        Ok(api)
    }

    /// Open a workspace with layered configuration (defaults, global file,
    /// workspace files, environment).
    pub fn open(root: &Path) -> Result<Self, EngineError> {
        let config = ConfigLoader::load_validated(root)?;
        Self::new(root, config)
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.ctx.paths
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn context(&self) -> &WorkspaceContext {
        &self.ctx
    }

    fn history_ops(&self) -> VersionHistory<'_> {
        VersionHistory::new(&self.ctx)
    }

    pub fn commit(&self, name: &str, message: &str) -> Result<HistoryRecord, EngineError> {
        self.history_ops().commit(name, message)
    }

    /// `commit` with the author recorded on the new history record.
    pub fn commit_as(
        &self,
        name: &str,
        message: &str,
        author: Option<&str>,
    ) -> Result<HistoryRecord, EngineError> {
        self.history_ops().with_author(author).commit(name, message)
    }

    pub fn stash_push(&self, name: &str, message: Option<&str>) -> Result<StashEntry, EngineError> {
        self.history_ops().stash_push(name, message)
    }

    pub fn stash_push_as(
        &self,
        name: &str,
        message: Option<&str>,
        author: Option<&str>,
    ) -> Result<StashEntry, EngineError> {
        self.history_ops().with_author(author).stash_push(name, message)
    }

    /// Apply the newest stash, or the one with `stash_id`. Fails with
    /// `NoStash` when the package has no stash entries.
    pub fn stash_apply(&self, name: &str, stash_id: Option<u64>) -> Result<StashEntry, EngineError> {
        self.history_ops().stash_apply(name, stash_id)
    }

    pub fn stash_list(&self, name: &str) -> Result<Vec<StashEntry>, EngineError> {
        self.history_ops().stash_list(name)
    }

    pub fn tag(&self, name: &str, tag: &str, reference: Option<&str>) -> Result<TagBinding, EngineError> {
        self.history_ops().tag(name, tag, reference)
    }

    pub fn tags(&self, name: &str) -> Result<Vec<(String, SnapshotId)>, EngineError> {
        self.history_ops().tags(name)
    }

    pub fn checkout(&self, name: &str, reference: &str) -> Result<CheckoutResult, EngineError> {
        self.history_ops().checkout(name, reference)
    }

    /// Newest first; at most `limit` records when given.
    pub fn history(&self, name: &str, limit: Option<usize>) -> Result<Vec<HistoryRecord>, EngineError> {
        self.history_ops().history(name, limit)
    }

    pub fn status(&self, name: &str) -> Result<WorkingTreeStatus, EngineError> {
        self.history_ops().status(name)
    }

    pub fn diff(
        &self,
        name: &str,
        reference: Option<&str>,
        path: Option<&str>,
    ) -> Result<Vec<FileChange>, EngineError> {
        self.history_ops().diff(name, reference, path)
    }

    pub fn resolve(&self, name: &str, reference: &str) -> Result<SnapshotId, EngineError> {
        self.history_ops().resolve(name, reference)
    }

    /// Integrity check of one package; `IntegrityMismatch` on drift.
    pub fn verify(&self, name: &str) -> Result<SnapshotId, EngineError> {
        self.history_ops().verify(name)
    }

    pub fn lock_entry(&self, name: &str) -> Result<LockEntry, EngineError> {
        let lock = self.ctx.load_lock()?;
        self.ctx.require_entry(&lock, name)
    }

    pub fn lock_entries(&self) -> Result<Vec<LockEntry>, EngineError> {
        Ok(self.ctx.load_lock()?.entries().cloned().collect())
    }

    /// Upgrade the lock file to the current schema.
    pub fn migrate_lock(&self) -> Result<MigrationReport, EngineError> {
        let _guard = self.ctx.lock_workspace()?;
        migrate_lock_file(&self.ctx.paths.lock_file)
    }

    /// Reconcile against the workspace manifest file.
    pub fn sync(&self) -> Result<SyncReport, EngineError> {
        let manifest = Manifest::load(&self.ctx.paths.manifest_file)?;
        info!(
            manifest = %self.ctx.paths.manifest_file.display(),
            declared = manifest.declarations.len(),
            "Syncing workspace"
        );
        self.sync_declarations(&manifest.declarations)
    }

    pub fn sync_declarations(&self, declarations: &[PackageDeclaration]) -> Result<SyncReport, EngineError> {
        Reconciler::new(&self.ctx, &self.fetchers).sync(declarations)
    }

    /// `sync_declarations` for callers already running on a tokio runtime.
    pub async fn sync_declarations_async(
        &self,
        declarations: &[PackageDeclaration],
    ) -> Result<SyncReport, EngineError> {
        Reconciler::new(&self.ctx, &self.fetchers)
            .sync_async(declarations)
            .await
    }

    /// Delete unreferenced snapshots from the store.
    pub fn collect(&self) -> Result<CollectReport, EngineError> {
        let _guard = self.ctx.lock_workspace()?;
        Ok(self.ctx.store.collect()?)
    }
}
