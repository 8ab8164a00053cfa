//! Workspace exclusive section across competing callers

use super::test_utils::{installed, write_file, TestWorkspace};
use skillsmith::lock::WorkspaceLock;
use skillsmith::manifest::PackageDeclaration;
use skillsmith::EngineError;
use std::time::Duration;

#[test]
fn test_held_lock_times_out_mutations() {
    let ws = TestWorkspace::new();
    let api = installed(&ws, "alpha", &[("a.txt", "one\n")]);
    let before = api.lock_entry("alpha").unwrap();
    write_file(&api, "alpha", "a.txt", "two\n");

    let held = WorkspaceLock::acquire(
        &api.paths().lock_file,
        Duration::from_millis(100),
        Duration::from_millis(10),
    )
    .unwrap();

    let err = api.commit("alpha", "blocked").unwrap_err();
    assert!(matches!(err, EngineError::LockWriteConflict { .. }), "{err:?}");
    let err = api.sync_declarations(&[]).unwrap_err();
    assert!(matches!(err, EngineError::LockWriteConflict { .. }), "{err:?}");
    assert_eq!(api.lock_entry("alpha").unwrap(), before);

    drop(held);
    assert_eq!(api.commit("alpha", "unblocked").unwrap().local_revision, 1);
}

#[test]
fn test_lock_released_after_each_operation() {
    let ws = TestWorkspace::new();
    let source = ws.add_source("alpha", None, &[]);
    let api = ws.api();
    api.sync_declarations(&[PackageDeclaration::new("alpha", source)])
        .unwrap();

    let guard = WorkspaceLock::acquire(
        &api.paths().lock_file,
        Duration::from_millis(100),
        Duration::from_millis(10),
    );
    assert!(guard.is_ok());
}
