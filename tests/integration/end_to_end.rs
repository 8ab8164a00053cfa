//! Full install / edit / commit / tag / checkout / stash cycle

use super::test_utils::{read_file, working_tree, write_file, TestWorkspace};
use skillsmith::history::ledger::RecordKind;
use skillsmith::lock::LockStore;
use skillsmith::manifest::PackageDeclaration;

#[test]
fn test_alpha_lifecycle() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", Some("1.0.0"), &[("notes.md", "original\n")]);
    let api = ws.api();

    let report = api
        .sync_declarations(&[PackageDeclaration::new("alpha", source.clone())])
        .unwrap();
    assert_eq!(report.installed, vec!["alpha".to_string()]);
    assert!(report.failed.is_empty());

    let installed = api.lock_entry("alpha").unwrap();
    assert_eq!(installed.local_revision, 0);
    assert_eq!(installed.origin_registry, "local");
    assert_eq!(installed.upstream_version.as_deref(), Some("1.0.0"));
    assert_eq!(installed.integrity_hash, installed.head_snapshot_id);
    let initial = installed.head_snapshot_id.clone();

    write_file(&api, "alpha", "notes.md", "first edit\n");
    let first = api.commit("alpha", "edit").unwrap();
    assert_eq!(first.local_revision, 1);
    assert_ne!(first.snapshot_id, initial);
    assert_eq!(api.lock_entry("alpha").unwrap().local_revision, 1);

    api.tag("alpha", "v1", None).unwrap();
    let v1_tree = working_tree(&api, "alpha");

    write_file(&api, "alpha", "notes.md", "second edit\n");
    let second = api.commit("alpha", "edit2").unwrap();
    assert_eq!(second.local_revision, 2);

    let checkout = api.checkout("alpha", "v1").unwrap();
    assert_eq!(checkout.snapshot_id, first.snapshot_id);
    assert_eq!(checkout.local_revision, 2);
    assert_eq!(working_tree(&api, "alpha"), v1_tree);
    assert_eq!(read_file(&api, "alpha", "notes.md"), "first edit\n");

    let entry = api.lock_entry("alpha").unwrap();
    assert_eq!(entry.local_revision, 2);
    assert_eq!(entry.head_snapshot_id, first.snapshot_id);

    api.stash_push("alpha", Some("v1 state")).unwrap();
    write_file(&api, "alpha", "notes.md", "something else\n");
    write_file(&api, "alpha", "extra.md", "scratch\n");
    api.stash_apply("alpha", None).unwrap();
    assert_eq!(working_tree(&api, "alpha"), v1_tree);

    // Provenance is never rewritten by local evolution
    assert_eq!(entry.origin_ref, installed.origin_ref);
    assert_eq!(entry.origin_registry, installed.origin_registry);

    let history = api.history("alpha", None).unwrap();
    let revisions: Vec<u64> = history.iter().map(|r| r.local_revision).collect();
    assert_eq!(revisions, vec![2, 1, 0]);
    assert_eq!(history[2].kind, RecordKind::Import);
    assert_eq!(history[0].message, "edit2");
}

#[test]
fn test_sync_from_manifest_file() {
    let ws = TestWorkspace::new();
    let alpha = ws.add_source("alpha", None, &[]);
    let beta = ws.add_source("beta", Some("0.3.0"), &[("run.sh", "echo hi\n")]);
    std::fs::write(
        ws.root().join("skillsmith.toml"),
        format!(
            "[skills.alpha]\nsource = \"{}\"\n\n[skills.beta-src]\nsource = \"{}\"\nname = \"beta\"\nversion = \"0.3.0\"\n",
            alpha, beta
        ),
    )
    .unwrap();

    let api = ws.api();
    let mut report = api.sync().unwrap();
    report.installed.sort();
    assert_eq!(report.installed, vec!["alpha".to_string(), "beta".to_string()]);

    let lock = LockStore::load(&api.paths().lock_file).unwrap();
    assert_eq!(lock.names(), vec!["alpha".to_string(), "beta".to_string()]);
    assert!(api.paths().package_dir("beta").join("run.sh").exists());

    let again = api.sync().unwrap();
    assert!(again.installed.is_empty());
    assert_eq!(again.verified.len(), 2);
}

#[test]
fn test_lock_file_has_schema_marker_and_fields() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", Some("2.1.0"), &[]);
    let api = ws.api();
    api.sync_declarations(&[PackageDeclaration::new("alpha", source)])
        .unwrap();

    let text = std::fs::read_to_string(&api.paths().lock_file).unwrap();
    assert!(text.contains("schema_version = 3"));
    assert!(text.contains("[packages"));
    assert!(text.contains("alpha"));
    for field in [
        "origin_registry",
        "origin_ref",
        "registry",
        "registry_id",
        "upstream_version",
        "local_revision",
        "integrity_hash",
        "head_snapshot_id",
    ] {
        assert!(text.contains(field), "lock file is missing {}", field);
    }
}
