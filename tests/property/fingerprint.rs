//! Fingerprints depend on paths and content, never on write order

use proptest::prelude::*;
use skillsmith::tree::hasher::fingerprint_dir;
use skillsmith::tree::walker::WalkerConfig;
use skillsmith::tree::FileTree;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn file_map() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    let key = ("[a-z]{1,6}", any::<bool>()).prop_map(|(name, nested)| {
        if nested {
            format!("d/{}", name)
        } else {
            format!("f_{}", name)
        }
    });
    prop::collection::btree_map(key, prop::collection::vec(any::<u8>(), 0..64), 1..12)
}

fn write_files<'a>(root: &Path, files: impl Iterator<Item = (&'a String, &'a Vec<u8>)>) {
    for (key, content) in files {
        let target = root.join(key);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, content).unwrap();
    }
}

fn tree_of(files: &BTreeMap<String, Vec<u8>>) -> FileTree {
    let mut tree = FileTree::new();
    for (key, content) in files {
        tree.insert(key.clone(), content.clone());
    }
    tree
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_fingerprint_ignores_write_order(files in file_map()) {
        let temp_dir = TempDir::new().unwrap();
        let forward = temp_dir.path().join("forward");
        let backward = temp_dir.path().join("backward");
        fs::create_dir_all(&forward).unwrap();
        fs::create_dir_all(&backward).unwrap();
        write_files(&forward, files.iter());
        write_files(&backward, files.iter().rev());

        let walker = WalkerConfig::default();
        let a = fingerprint_dir(&forward, &walker).unwrap();
        let b = fingerprint_dir(&backward, &walker).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a, tree_of(&files).fingerprint());
    }

    #[test]
    fn test_fingerprint_sensitive_to_content(files in file_map(), index in any::<prop::sample::Index>()) {
        let base = tree_of(&files);
        let key = files.keys().nth(index.index(files.len())).unwrap().clone();

        let mut changed = files.clone();
        changed.get_mut(&key).unwrap().push(0xff);
        prop_assert_ne!(base.fingerprint(), tree_of(&changed).fingerprint());

        let mut removed = files.clone();
        removed.remove(&key);
        prop_assert_ne!(base.fingerprint(), tree_of(&removed).fingerprint());
    }

    #[test]
    fn test_fingerprint_sensitive_to_path(files in file_map()) {
        let base = tree_of(&files);
        let renamed: BTreeMap<String, Vec<u8>> = files
            .iter()
            .map(|(k, v)| (format!("{}x", k), v.clone()))
            .collect();
        prop_assert_ne!(base.fingerprint(), tree_of(&renamed).fingerprint());
    }
}
