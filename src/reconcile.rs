//! Manifest reconciliation
//!
//! A sync pass compares declared packages against the lock file and the
//! working trees on disk:
//! - declared but not locked: fetched, stored and installed at revision 0
//! - declared and locked: re-hashed and reported verified or drifted
//! - locked but not declared: pruned (bookkeeping only, the tree stays)
//!
//! The whole pass runs inside the workspace exclusive section. Fetches run
//! concurrently on a bounded pool; their results are applied one at a time.
//! One package failing never stops the others.

use crate::error::{EngineError, FetchError, ReconciliationError};
use crate::fetch::{FetcherRegistry, Resolution};
use crate::history::{forget_package, package_references, verify_entry, write_import_ledger};
use crate::history::ledger::PackageLedger;
use crate::lock::{LockEntry, LockStore, WorkspaceLock};
use crate::manifest::{validate_declarations, PackageDeclaration};
use crate::tree::FileTree;
use crate::types::SnapshotId;
use crate::workspace::WorkspaceContext;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Outcome of one sync pass
#[derive(Debug, Default)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub verified: Vec<String>,
    pub drifted: Vec<String>,
    pub pruned: Vec<String>,
    pub failed: Vec<ReconciliationError>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn failed_packages(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.package.as_str()).collect()
    }
}

struct FetchJob {
    declaration: PackageDeclaration,
    staging: PathBuf,
}

type FetchResult = (FetchJob, Result<Resolution, FetchError>);

/// State carried from planning to applying within one pass
struct SyncPass {
    _guard: WorkspaceLock,
    lock: LockStore,
    report: SyncReport,
    jobs: Vec<FetchJob>,
}

#[derive(Default)]
struct InstallProgress {
    snapshot: Option<SnapshotId>,
    ledger_written: bool,
    moved_to: Option<PathBuf>,
}

/// Drives install / verify / prune for a set of declarations
pub struct Reconciler<'a> {
    ctx: &'a WorkspaceContext,
    fetchers: &'a FetcherRegistry,
}

impl<'a> Reconciler<'a> {
    pub fn new(ctx: &'a WorkspaceContext, fetchers: &'a FetcherRegistry) -> Self {
        Self { ctx, fetchers }
    }

    /// Reconcile the workspace against `declarations`.
    ///
    /// Blocking. Safe to call from inside a tokio runtime: fetches then run
    /// on a dedicated thread with its own runtime.
    pub fn sync(&self, declarations: &[PackageDeclaration]) -> Result<SyncReport, EngineError> {
        let mut pass = self.begin(declarations)?;
        let jobs = std::mem::take(&mut pass.jobs);
        let fetched = if jobs.is_empty() {
            Vec::new()
        } else {
            self.fetch_blocking(jobs)?
        };
        self.finish(pass, fetched, declarations)
    }

    /// `sync` for async callers; fetches run on the caller's runtime.
    pub async fn sync_async(&self, declarations: &[PackageDeclaration]) -> Result<SyncReport, EngineError> {
        let mut pass = self.begin(declarations)?;
        let jobs = std::mem::take(&mut pass.jobs);
        let fetched = self.fetch_all(jobs).await;
        self.finish(pass, fetched, declarations)
    }

    /// Enter the exclusive section, verify locked packages and plan fetches.
    fn begin(&self, declarations: &[PackageDeclaration]) -> Result<SyncPass, EngineError> {
        validate_declarations(declarations).map_err(EngineError::Manifest)?;

        let guard = self.ctx.lock_workspace()?;
        let lock = self.ctx.load_lock()?;
        let mut report = SyncReport::default();

        let mut jobs = Vec::new();
        for declaration in declarations {
            let name = declaration.name();
            match lock.get(name) {
                Some(entry) => self.check_installed(entry, &mut report),
                None => {
                    let dest = self.ctx.paths.package_dir(name);
                    if dest.exists() {
                        report.failed.push(ReconciliationError::new(
                            name,
                            EngineError::UntrackedWorkingTree {
                                package: name.to_string(),
                                path: dest,
                            },
                        ));
                        continue;
                    }
                    jobs.push(FetchJob {
                        declaration: declaration.clone(),
                        staging: self
                            .ctx
                            .paths
                            .staging_dir
                            .join(format!("{}-{}", name, std::process::id())),
                    });
                }
            }
        }

        Ok(SyncPass {
            _guard: guard,
            lock,
            report,
            jobs,
        })
    }

    /// Apply fetch results one at a time, then prune undeclared packages.
    fn finish(
        &self,
        pass: SyncPass,
        fetched: Vec<FetchResult>,
        declarations: &[PackageDeclaration],
    ) -> Result<SyncReport, EngineError> {
        let SyncPass {
            _guard,
            mut lock,
            mut report,
            ..
        } = pass;

        for (job, result) in fetched {
            let name = job.declaration.name().to_string();
            let outcome = result
                .map_err(EngineError::from)
                .and_then(|resolution| self.install(&mut lock, &job, resolution));
            match outcome {
                Ok(entry) => {
                    info!(
                        package = %name,
                        origin = %entry.origin_ref,
                        snapshot = %entry.head_snapshot_id.short(),
                        "Installed package"
                    );
                    report.installed.push(name);
                }
                Err(cause) => {
                    warn!(package = %name, error = %cause, "Failed to install package");
                    report.failed.push(ReconciliationError::new(name, cause));
                }
            }
            remove_dir_if_exists(&job.staging);
        }

        let declared: Vec<&str> = declarations.iter().map(|d| d.name()).collect();
        for name in lock.names() {
            if declared.contains(&name.as_str()) {
                continue;
            }
            match forget_package(self.ctx, &mut lock, &name) {
                Ok(released) => {
                    info!(package = %name, released, "Pruned package");
                    report.pruned.push(name);
                }
                Err(cause) => report.failed.push(ReconciliationError::new(name, cause)),
            }
        }

        info!(
            installed = report.installed.len(),
            verified = report.verified.len(),
            drifted = report.drifted.len(),
            pruned = report.pruned.len(),
            failed = report.failed.len(),
            "Sync complete"
        );
        Ok(report)
    }

    fn check_installed(&self, entry: &LockEntry, report: &mut SyncReport) {
        let dir = self.ctx.paths.package_dir(&entry.name);
        if !dir.is_dir() {
            warn!(package = %entry.name, path = %dir.display(), "Working tree is missing");
            report.drifted.push(entry.name.clone());
            return;
        }
        match verify_entry(self.ctx, entry) {
            Ok(_) => report.verified.push(entry.name.clone()),
            Err(EngineError::IntegrityMismatch { actual, .. }) => {
                warn!(
                    package = %entry.name,
                    expected = %entry.integrity_hash.short(),
                    actual = %&actual[..actual.len().min(12)],
                    "Working tree drifted from lock"
                );
                report.drifted.push(entry.name.clone());
            }
            Err(cause) => report
                .failed
                .push(ReconciliationError::new(entry.name.clone(), cause)),
        }
    }

    fn fetch_blocking(&self, jobs: Vec<FetchJob>) -> Result<Vec<FetchResult>, EngineError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return self.fetch_on_own_runtime(jobs);
        }
        // A runtime cannot be started or blocked on from one of its own threads
        std::thread::scope(|scope| {
            scope
                .spawn(|| self.fetch_on_own_runtime(jobs))
                .join()
                .unwrap_or_else(|_| {
                    Err(FetchError::Network("fetch thread panicked".to_string()).into())
                })
        })
    }

    fn fetch_on_own_runtime(&self, jobs: Vec<FetchJob>) -> Result<Vec<FetchResult>, EngineError> {
        let runtime = tokio::runtime::Runtime::new()?;
        Ok(runtime.block_on(self.fetch_all(jobs)))
    }

    async fn fetch_all(&self, jobs: Vec<FetchJob>) -> Vec<FetchResult> {
        let semaphore = Semaphore::new(self.ctx.config.sync.fetch_workers.max(1));
        let semaphore = &semaphore;
        let fetches = jobs.into_iter().map(|job| async move {
            remove_dir_if_exists(&job.staging);
            let result = match semaphore.acquire().await {
                Ok(_permit) => {
                    debug!(package = %job.declaration.name(), source = %job.declaration.source, "Fetching");
                    self.fetchers.fetch(&job.declaration.source, &job.staging).await
                }
                Err(_) => Err(FetchError::Network("fetch pool closed".to_string())),
            };
            (job, result)
        });
        futures::future::join_all(fetches).await
    }

    /// Validate, store and publish one fetched package. On error everything
    /// done so far is undone.
    fn install(
        &self,
        lock: &mut LockStore,
        job: &FetchJob,
        resolution: Resolution,
    ) -> Result<LockEntry, EngineError> {
        let mut progress = InstallProgress::default();
        match self.install_steps(lock, job, resolution, &mut progress) {
            Ok(entry) => Ok(entry),
            Err(cause) => {
                lock.remove(job.declaration.name());
                self.rollback(job.declaration.name(), progress);
                Err(cause)
            }
        }
    }

    fn install_steps(
        &self,
        lock: &mut LockStore,
        job: &FetchJob,
        resolution: Resolution,
        progress: &mut InstallProgress,
    ) -> Result<LockEntry, EngineError> {
        let declaration = &job.declaration;
        let name = declaration.name();

        if let Some(pinned) = &declaration.pinned_version {
            if resolution.version.as_deref() != Some(pinned.as_str()) {
                return Err(FetchError::Validation(format!(
                    "'{}' pins version {} but the source provides {}",
                    name,
                    pinned,
                    resolution.version.as_deref().unwrap_or("no version")
                ))
                .into());
            }
        }
        let required = &self.ctx.config.sync.required_file;
        if !required.is_empty() && !job.staging.join(required).is_file() {
            return Err(FetchError::Validation(format!(
                "'{}' does not contain {}",
                declaration.source, required
            ))
            .into());
        }

        let dest = self.ctx.paths.package_dir(name);
        if dest.exists() {
            return Err(EngineError::UntrackedWorkingTree {
                package: name.to_string(),
                path: dest,
            });
        }

        let tree = FileTree::read_from_dir(&job.staging, &self.ctx.walker)?;
        let snapshot_id = self.ctx.store.put(&tree)?;
        // Leftovers of an earlier install that never reached the lock file
        let stale_refs = package_references(self.ctx, None, name)?;

        self.ctx
            .store
            .retain_all(&[snapshot_id.clone(), snapshot_id.clone()])?;
        progress.snapshot = Some(snapshot_id.clone());

        write_import_ledger(
            self.ctx,
            name,
            &snapshot_id,
            format!("Imported from {}", resolution.reference),
        )?;
        progress.ledger_written = true;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&job.staging, &dest)?;
        progress.moved_to = Some(dest);

        let entry = LockEntry {
            name: name.to_string(),
            origin_registry: resolution.registry,
            origin_ref: resolution.reference,
            registry: self.ctx.config.registry.name.clone(),
            registry_id: self.ctx.config.registry.id.clone(),
            upstream_version: resolution.version,
            local_revision: 0,
            integrity_hash: snapshot_id.clone(),
            head_snapshot_id: snapshot_id,
        };
        lock.insert(entry.clone());
        lock.save()?;

        if !stale_refs.is_empty() {
            self.ctx.store.release_all(&stale_refs)?;
        }
        Ok(entry)
    }

    fn rollback(&self, name: &str, progress: InstallProgress) {
        if let Some(dest) = progress.moved_to {
            remove_dir_if_exists(&dest);
        }
        if progress.ledger_written {
            if let Err(e) = PackageLedger::delete(&self.ctx.paths.ledger_path(name)) {
                warn!(package = %name, error = %e, "Failed to remove history during rollback");
            }
        }
        if let Some(snapshot_id) = progress.snapshot {
            if let Err(e) = self
                .ctx
                .store
                .release_all(&[snapshot_id.clone(), snapshot_id])
            {
                warn!(package = %name, error = %e, "Failed to release references during rollback");
            }
        }
    }
}

fn remove_dir_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove directory");
        }
    }
}
