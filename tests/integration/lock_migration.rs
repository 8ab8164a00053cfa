//! Lock file schema migration through the command surface

use super::test_utils::{installed, TestWorkspace};
use skillsmith::lock::{LockStore, CURRENT_SCHEMA_VERSION};
use skillsmith::EngineError;
use std::fs;

const INTEGRITY: &str = "5f0c6a2f5b1e4d3c2b1a09f8e7d6c5b4a3928170f6e5d4c3b2a19080706050a1";

#[test]
fn test_migrate_current_file_is_noop() {
    let ws = TestWorkspace::new();
    let api = installed(&ws, "alpha", &[]);
    let before = fs::read(&api.paths().lock_file).unwrap();

    let report = api.migrate_lock().unwrap();
    assert!(report.nothing_to_migrate());
    assert!(report.migrated.is_empty());
    assert_eq!(fs::read(&api.paths().lock_file).unwrap(), before);

    // Twice is still a no-op
    assert!(api.migrate_lock().unwrap().nothing_to_migrate());
    assert_eq!(fs::read(&api.paths().lock_file).unwrap(), before);
}

#[test]
fn test_outdated_lock_requires_migration() {
    let ws = TestWorkspace::new();
    let api = ws.api();
    fs::write(
        &api.paths().lock_file,
        format!(
            "[skills.alpha]\nsource = \"acme/skills/alpha\"\nintegrity = \"{}\"\nresolved = \"https://github.com/acme/skills/tree/main/alpha\"\n\n[skills.odd]\nsource = 7\n",
            INTEGRITY
        ),
    )
    .unwrap();

    let err = api.lock_entry("alpha").unwrap_err();
    assert!(matches!(err, EngineError::SchemaOutdated { found: 1, .. }), "{err:?}");

    let report = api.migrate_lock().unwrap();
    assert_eq!(report.from_version, 1);
    assert_eq!(report.to_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(report.migrated, vec!["alpha".to_string()]);
    assert_eq!(report.unrecognized, vec!["odd".to_string()]);

    let entry = api.lock_entry("alpha").unwrap();
    assert_eq!(entry.origin_registry, "github");
    assert_eq!(entry.origin_ref, "https://github.com/acme/skills/tree/main/alpha");
    assert_eq!(entry.local_revision, 0);
    assert_eq!(entry.integrity_hash.as_str(), INTEGRITY);
    assert_eq!(entry.head_snapshot_id.as_str(), INTEGRITY);

    let lock = LockStore::load(&api.paths().lock_file).unwrap();
    assert_eq!(lock.unrecognized(), vec!["odd".to_string()]);
    assert!(api.migrate_lock().unwrap().nothing_to_migrate());
}

#[test]
fn test_newer_schema_left_untouched() {
    let ws = TestWorkspace::new();
    let api = ws.api();
    let content = "schema_version = 9\n\n[packages]\n";
    fs::write(&api.paths().lock_file, content).unwrap();

    let err = api.migrate_lock().unwrap_err();
    assert!(matches!(err, EngineError::SchemaMigration(_)), "{err:?}");
    assert_eq!(fs::read_to_string(&api.paths().lock_file).unwrap(), content);
}
