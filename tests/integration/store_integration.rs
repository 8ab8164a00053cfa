//! Content store behaviour over real package trees

use skillsmith::store::ContentStore;
use skillsmith::tree::hasher::fingerprint_dir;
use skillsmith::tree::walker::WalkerConfig;
use skillsmith::tree::FileTree;
use std::fs;
use tempfile::TempDir;

fn sample_package(root: &std::path::Path) {
    fs::create_dir_all(root.join("scripts")).unwrap();
    fs::write(root.join("SKILL.md"), "---\nversion: 1.0.0\n---\n").unwrap();
    fs::write(root.join("scripts").join("run.sh"), "#!/bin/sh\necho run\n").unwrap();
    fs::create_dir_all(root.join(".git")).unwrap();
    fs::write(root.join(".git").join("HEAD"), "ref: refs/heads/main\n").unwrap();
}

#[test]
fn test_put_same_tree_twice_stores_once() {
    let temp_dir = TempDir::new().unwrap();
    let package = temp_dir.path().join("pkg");
    sample_package(&package);
    let store = ContentStore::open(temp_dir.path().join("store")).unwrap();
    let walker = WalkerConfig::default();

    let first = store.put(&FileTree::read_from_dir(&package, &walker).unwrap()).unwrap();
    let second = store.put(&FileTree::read_from_dir(&package, &walker).unwrap()).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.list().unwrap(), vec![first.clone()]);
    assert_eq!(fingerprint_dir(&package, &walker).unwrap(), first);
}

#[test]
fn test_get_returns_stored_tree_without_ignored_entries() {
    let temp_dir = TempDir::new().unwrap();
    let package = temp_dir.path().join("pkg");
    sample_package(&package);
    let store = ContentStore::open(temp_dir.path().join("store")).unwrap();
    let walker = WalkerConfig::default();

    let id = store.put(&FileTree::read_from_dir(&package, &walker).unwrap()).unwrap();
    let tree = store.get(&id).unwrap();
    let keys: Vec<&str> = tree.files.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["SKILL.md", "scripts/run.sh"]);

    let restored = temp_dir.path().join("restored");
    tree.materialize(&restored, &walker).unwrap();
    assert_eq!(fingerprint_dir(&restored, &walker).unwrap(), id);
}

#[test]
fn test_orphaned_snapshot_is_collected() {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStore::open(temp_dir.path().join("store")).unwrap();

    let mut kept = FileTree::new();
    kept.insert("SKILL.md", "kept");
    let mut orphan = FileTree::new();
    orphan.insert("SKILL.md", "orphan");

    let kept_id = store.put(&kept).unwrap();
    let orphan_id = store.put(&orphan).unwrap();
    store.retain(&kept_id).unwrap();

    let report = store.collect().unwrap();
    assert_eq!(report.removed, vec![orphan_id.clone()]);
    assert!(store.contains(&kept_id));
    assert!(!store.contains(&orphan_id));
    assert!(store.get(&orphan_id).is_err());
}
