//! Sync passes: install, verify, drift, prune and per-package failures

use super::test_utils::{installed, local_fetchers, read_file, write_file, TestWorkspace};
use async_trait::async_trait;
use skillsmith::fetch::{Resolution, SkillFetcher, SourceRef, GITHUB_SCHEME};
use skillsmith::manifest::PackageDeclaration;
use skillsmith::{EngineError, FetchError, SkillApi};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Serves `github` sources from memory; `acme/broken` fails with a network error.
struct FakeRemote {
    calls: AtomicUsize,
}

#[async_trait]
impl SkillFetcher for FakeRemote {
    fn scheme(&self) -> &'static str {
        GITHUB_SCHEME
    }

    async fn fetch(&self, source: &SourceRef, dest: &Path) -> Result<Resolution, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let SourceRef::GitHub(gh) = source else {
            return Err(FetchError::Unsupported(source.to_string()));
        };
        if gh.repo == "broken" {
            return Err(FetchError::Network("connection reset".to_string()));
        }
        fs::create_dir_all(dest).map_err(|e| FetchError::Network(e.to_string()))?;
        fs::write(dest.join("SKILL.md"), format!("---\nversion: 2.0.0\n---\n# {}\n", gh.repo))
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok(Resolution {
            registry: GITHUB_SCHEME.to_string(),
            reference: format!("https://github.com/{}/{}/tree/main", gh.owner, gh.repo),
            version: Some("2.0.0".to_string()),
            commit: Some("0123abc".to_string()),
        })
    }
}

fn api_with_remote(ws: &TestWorkspace) -> (SkillApi, Arc<FakeRemote>) {
    let remote = Arc::new(FakeRemote {
        calls: AtomicUsize::new(0),
    });
    let mut fetchers = local_fetchers(ws.root());
    fetchers.register(remote.clone());
    let api = SkillApi::with_fetchers(ws.root(), ws.config(), fetchers).unwrap();
    (api, remote)
}

#[test]
fn test_drift_is_reported_not_repaired() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", None, &[("a.txt", "original\n")]);
    let api = ws.api();
    let declarations = [PackageDeclaration::new("alpha", source)];
    api.sync_declarations(&declarations).unwrap();
    let entry = api.lock_entry("alpha").unwrap();

    write_file(&api, "alpha", "a.txt", "user edit\n");
    let report = api.sync_declarations(&declarations).unwrap();
    assert_eq!(report.drifted, vec!["alpha".to_string()]);
    assert!(report.verified.is_empty());
    assert!(report.installed.is_empty());

    assert_eq!(read_file(&api, "alpha", "a.txt"), "user edit\n");
    assert_eq!(api.lock_entry("alpha").unwrap(), entry);

    // Committing the edit resolves the drift
    api.commit("alpha", "keep edit").unwrap();
    let report = api.sync_declarations(&declarations).unwrap();
    assert_eq!(report.verified, vec!["alpha".to_string()]);
}

#[test]
fn test_missing_working_tree_is_drift() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", None, &[]);
    let api = ws.api();
    let declarations = [PackageDeclaration::new("alpha", source)];
    api.sync_declarations(&declarations).unwrap();

    fs::remove_dir_all(api.paths().package_dir("alpha")).unwrap();
    let report = api.sync_declarations(&declarations).unwrap();
    assert_eq!(report.drifted, vec!["alpha".to_string()]);
    assert!(api.lock_entry("alpha").is_ok());
}

#[test]
fn test_prune_releases_references_and_collect_removes() {
    let ws = TestWorkspace::new();
    let api = installed(&ws, "alpha", &[("a.txt", "one\n")]);
    write_file(&api, "alpha", "a.txt", "two\n");
    api.commit("alpha", "two").unwrap();
    api.tag("alpha", "first", Some("0")).unwrap();
    api.stash_push("alpha", None).unwrap();

    let store = &api.context().store;
    let snapshots = store.list().unwrap();
    assert_eq!(snapshots.len(), 2);

    let report = api.sync_declarations(&[]).unwrap();
    assert_eq!(report.pruned, vec!["alpha".to_string()]);
    assert!(api.lock_entry("alpha").is_err());
    // The working tree is left for the user
    assert_eq!(read_file(&api, "alpha", "a.txt"), "two\n");
    assert!(!api.paths().ledger_path("alpha").exists());

    for id in &snapshots {
        assert_eq!(store.ref_count(id).unwrap(), 0);
    }
    let collected = api.collect().unwrap();
    assert_eq!(collected.removed.len(), 2);
    assert!(collected.bytes_freed > 0);
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn test_collect_keeps_referenced_snapshots() {
    let ws = TestWorkspace::new();
    let api = installed(&ws, "alpha", &[]);
    let head = api.lock_entry("alpha").unwrap().head_snapshot_id;

    let report = api.collect().unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(report.retained, 1);
    assert!(api.context().store.contains(&head));
    // Lock head plus the import record
    assert_eq!(api.context().store.ref_count(&head).unwrap(), 2);
}

#[test]
fn test_fetch_failure_does_not_abort_batch() {
    let ws = TestWorkspace::new();
    let alpha = ws.add_source("alpha", None, &[]);
    let (api, remote) = api_with_remote(&ws);

    let report = api
        .sync_declarations(&[
            PackageDeclaration::new("alpha", alpha),
            PackageDeclaration::new("broken", "acme/broken"),
            PackageDeclaration::new("remote", "acme/remote"),
            PackageDeclaration::new("ghost", ws.missing_source("ghost")),
        ])
        .unwrap();

    let mut installed = report.installed.clone();
    installed.sort();
    assert_eq!(installed, vec!["alpha".to_string(), "remote".to_string()]);

    let mut failed = report.failed_packages();
    failed.sort();
    assert_eq!(failed, vec!["broken", "ghost"]);
    for failure in &report.failed {
        assert!(matches!(failure.cause, EngineError::Fetch(_)), "{failure}");
    }
    assert_eq!(remote.calls.load(Ordering::SeqCst), 2);

    let remote_entry = api.lock_entry("remote").unwrap();
    assert_eq!(remote_entry.origin_registry, "github");
    assert_eq!(remote_entry.origin_ref, "https://github.com/acme/remote/tree/main");
    assert_eq!(remote_entry.upstream_version.as_deref(), Some("2.0.0"));
    assert!(api.lock_entry("broken").is_err());
    assert!(!api.paths().package_dir("broken").exists());
}

#[test]
fn test_untracked_directory_is_not_overwritten() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", None, &[("a.txt", "from source\n")]);
    let api = ws.api();

    let dir = api.paths().package_dir("alpha");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("a.txt"), "hand written\n").unwrap();

    let report = api
        .sync_declarations(&[PackageDeclaration::new("alpha", source)])
        .unwrap();
    assert!(report.installed.is_empty());
    assert!(matches!(
        report.failed[0].cause,
        EngineError::UntrackedWorkingTree { .. }
    ));
    assert_eq!(fs::read_to_string(dir.join("a.txt")).unwrap(), "hand written\n");
    assert!(api.lock_entry("alpha").is_err());
}

#[test]
fn test_pinned_version_mismatch_rolls_back() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", Some("1.0.0"), &[]);
    let api = ws.api();

    let report = api
        .sync_declarations(&[PackageDeclaration::new("alpha", source.clone()).with_version("2.0.0")])
        .unwrap();
    assert!(report.installed.is_empty());
    assert!(matches!(
        report.failed[0].cause,
        EngineError::Fetch(FetchError::Validation(_))
    ));
    assert!(!api.paths().package_dir("alpha").exists());
    assert!(!api.paths().ledger_path("alpha").exists());
    let staging_left = fs::read_dir(&api.paths().staging_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(staging_left, 0);

    let report = api
        .sync_declarations(&[PackageDeclaration::new("alpha", source).with_version("1.0.0")])
        .unwrap();
    assert_eq!(report.installed, vec!["alpha".to_string()]);
}

#[test]
fn test_source_without_required_file_fails() {
    let ws = TestWorkspace::new();
    let source = ws.add_bare_source("bare", &[("readme.txt", "no skill file\n")]);
    let api = ws.api();

    let report = api
        .sync_declarations(&[PackageDeclaration::new("bare", source.clone())])
        .unwrap();
    assert_eq!(report.failed_packages(), vec!["bare"]);
    assert!(api.context().store.list().unwrap().is_empty());

    let mut config = ws.config();
    config.sync.required_file = String::new();
    let relaxed = ws.api_with(config);
    let report = relaxed
        .sync_declarations(&[PackageDeclaration::new("bare", source)])
        .unwrap();
    assert_eq!(report.installed, vec!["bare".to_string()]);
}

#[test]
fn test_name_override_sets_install_name() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("upstream-name", None, &[]);
    let api = ws.api();

    let report = api
        .sync_declarations(&[PackageDeclaration::new("key", source).with_name("tools")])
        .unwrap();
    assert_eq!(report.installed, vec!["tools".to_string()]);
    assert!(api.paths().package_dir("tools").join("SKILL.md").exists());
    assert!(api.lock_entry("key").is_err());
}

#[test]
fn test_duplicate_install_names_rejected() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", None, &[]);
    let api = ws.api();

    let err = api
        .sync_declarations(&[
            PackageDeclaration::new("alpha", source.clone()),
            PackageDeclaration::new("other", source).with_name("alpha"),
        ])
        .unwrap_err();
    assert!(matches!(err, EngineError::Manifest(_)), "{err:?}");
}

#[test]
fn test_many_packages_with_small_worker_pool() {
    let ws = TestWorkspace::new();
    let mut config = ws.config();
    config.sync.fetch_workers = 2;
    let api = ws.api_with(config);

    let declarations: Vec<PackageDeclaration> = (0..6)
        .map(|i| {
            let name = format!("pkg-{}", i);
            let source = ws.add_source(&name, None, &[("index.md", &format!("package {}\n", i))]);
            PackageDeclaration::new(name, source)
        })
        .collect();

    let report = api.sync_declarations(&declarations).unwrap();
    assert_eq!(report.installed.len(), 6);
    assert!(!report.has_failures());
    assert_eq!(api.lock_entries().unwrap().len(), 6);
}

#[test]
fn test_sync_without_manifest_fails_and_keeps_lock() {
    let ws = TestWorkspace::new();
    let api = installed(&ws, "alpha", &[("a.txt", "one\n")]);
    let before = api.lock_entry("alpha").unwrap();
    assert!(!api.paths().manifest_file.exists());

    let err = api.sync().unwrap_err();
    match err {
        EngineError::Manifest(message) => assert!(message.contains("not found"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(api.lock_entry("alpha").unwrap(), before);
    assert!(api.paths().ledger_path("alpha").exists());
    assert_eq!(api.history("alpha", None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_blocking_sync_inside_current_thread_runtime() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", None, &[("a.txt", "one\n")]);
    let api = ws.api();

    let report = api
        .sync_declarations(&[PackageDeclaration::new("alpha", source)])
        .unwrap();
    assert_eq!(report.installed, vec!["alpha".to_string()]);
    assert_eq!(read_file(&api, "alpha", "a.txt"), "one\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_sync_inside_multi_thread_runtime() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", None, &[]);
    let api = ws.api();

    let report = api
        .sync_declarations(&[PackageDeclaration::new("alpha", source)])
        .unwrap();
    assert_eq!(report.installed, vec!["alpha".to_string()]);
}

#[tokio::test]
async fn test_async_sync_uses_callers_runtime() {
    let ws = TestWorkspace::new();
    let alpha = ws.add_source("alpha", None, &[]);
    let (api, remote) = api_with_remote(&ws);

    let report = api
        .sync_declarations_async(&[
            PackageDeclaration::new("alpha", alpha),
            PackageDeclaration::new("remote", "acme/remote"),
        ])
        .await
        .unwrap();
    let mut installed = report.installed.clone();
    installed.sort();
    assert_eq!(installed, vec!["alpha".to_string(), "remote".to_string()]);
    assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

    let report = api
        .sync_declarations_async(&[PackageDeclaration::new("remote", "acme/remote")])
        .await
        .unwrap();
    assert_eq!(report.verified, vec!["remote".to_string()]);
    assert_eq!(report.pruned, vec!["alpha".to_string()]);
}
