//! Integration tests for the configuration system

use skillsmith::config::{ConfigLoader, EngineConfig};
use skillsmith::{EngineError, SkillApi};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_workspace_file_overrides_global_file() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("ws");
    fs::create_dir_all(root.join(".skillsmith")).unwrap();

    let global = temp_dir.path().join("global.toml");
    fs::write(
        &global,
        "[sync]\nfetch_workers = 8\nlock_timeout_ms = 500\n\n[registry]\nname = \"team\"\n",
    )
    .unwrap();
    fs::write(
        root.join(".skillsmith").join("config.toml"),
        "[sync]\nfetch_workers = 2\n",
    )
    .unwrap();
    fs::write(
        root.join(".skillsmith").join("ci.toml"),
        "[storage]\nlock_file = \"ci.lock\"\n",
    )
    .unwrap();

    let config = ConfigLoader::load_layered(&root, Some(&global), "ci", false).unwrap();
    assert_eq!(config.sync.fetch_workers, 2);
    assert_eq!(config.sync.lock_timeout_ms, 500);
    assert_eq!(config.registry.name, "team");
    assert_eq!(config.storage.lock_file, PathBuf::from("ci.lock"));
    assert_eq!(config.storage.manifest_file, PathBuf::from("skillsmith.toml"));

    let config = ConfigLoader::load_layered(&root, Some(&global), "development", false).unwrap();
    assert_eq!(config.storage.lock_file, PathBuf::from("skillsmith.lock"));
}

#[test]
fn test_defaults_without_any_files() {
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load_layered(temp_dir.path(), None, "development", false).unwrap();
    assert_eq!(config, EngineConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_config_is_rejected_by_api() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.sync.fetch_workers = 0;
    config.storage.lock_file = PathBuf::new();

    let err = match SkillApi::new(temp_dir.path(), config) {
        Ok(_) => panic!("invalid configuration accepted"),
        Err(err) => err,
    };
    match err {
        EngineError::ConfigError(message) => {
            assert!(message.contains("lock_file"));
            assert!(message.contains("fetch_workers"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_configured_paths_are_used() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.storage.skills_dir = PathBuf::from("installed");
    config.storage.lock_file = PathBuf::from("locks/team.lock");

    let api = SkillApi::new(temp_dir.path(), config).unwrap();
    assert!(api.paths().package_dir("alpha").ends_with("installed/alpha"));
    assert!(api.paths().lock_file.ends_with("locks/team.lock"));
    assert!(api.paths().store_dir.join("objects").is_dir());
}
