//! Shared test utilities for integration tests
//!
//! `TestWorkspace` owns a temporary directory holding a workspace root and a
//! separate directory of local skill sources that sync can install from.

use skillsmith::config::EngineConfig;
use skillsmith::fetch::{FetcherRegistry, LocalFetcher};
use skillsmith::manifest::PackageDeclaration;
use skillsmith::tree::walker::WalkerConfig;
use skillsmith::tree::FileTree;
use skillsmith::SkillApi;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestWorkspace {
    _dir: TempDir,
    root: PathBuf,
    sources: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let base = dunce::canonicalize(dir.path()).unwrap();
        let root = base.join("workspace");
        let sources = base.join("sources");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&sources).unwrap();
        Self {
            _dir: dir,
            root,
            sources,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a skill source directory with a `SKILL.md` (front matter
    /// carries `version` when given) plus `files`. Returns its absolute path.
    pub fn add_source(&self, name: &str, version: Option<&str>, files: &[(&str, &str)]) -> String {
        let dir = self.sources.join(name);
        fs::create_dir_all(&dir).unwrap();
        let front_matter = match version {
            Some(v) => format!("---\nname: {}\nversion: {}\n---\n", name, v),
            None => format!("---\nname: {}\n---\n", name),
        };
        fs::write(dir.join("SKILL.md"), format!("{}# {}\n", front_matter, name)).unwrap();
        for (path, content) in files {
            let target = dir.join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, content).unwrap();
        }
        dir.to_string_lossy().into_owned()
    }

    /// Source directory without a `SKILL.md`.
    pub fn add_bare_source(&self, name: &str, files: &[(&str, &str)]) -> String {
        let dir = self.sources.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (path, content) in files {
            fs::write(dir.join(path), content).unwrap();
        }
        dir.to_string_lossy().into_owned()
    }

    pub fn missing_source(&self, name: &str) -> String {
        self.sources.join(name).to_string_lossy().into_owned()
    }

    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.sync.lock_timeout_ms = 200;
        config.sync.lock_poll_ms = 10;
        config
    }

    pub fn api(&self) -> SkillApi {
        self.api_with(self.config())
    }

    pub fn api_with(&self, config: EngineConfig) -> SkillApi {
        SkillApi::with_fetchers(&self.root, config, local_fetchers(&self.root)).unwrap()
    }
}

/// Fetcher registry that only knows local sources (no network in tests).
pub fn local_fetchers(root: &Path) -> FetcherRegistry {
    let mut fetchers = FetcherRegistry::new();
    fetchers.register(Arc::new(LocalFetcher::new(root)));
    fetchers
}

/// Install `name` from a fresh source and return the API.
pub fn installed(ws: &TestWorkspace, name: &str, files: &[(&str, &str)]) -> SkillApi {
    let source = ws.add_source(name, Some("1.0.0"), files);
    let api = ws.api();
    let report = api
        .sync_declarations(&[PackageDeclaration::new(name, source)])
        .unwrap();
    assert_eq!(report.installed, vec![name.to_string()], "{:?}", report.failed);
    api
}

pub fn package_file(api: &SkillApi, name: &str, path: &str) -> PathBuf {
    api.paths().package_dir(name).join(path)
}

pub fn write_file(api: &SkillApi, name: &str, path: &str, content: &str) {
    let target = package_file(api, name, path);
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::write(target, content).unwrap();
}

pub fn read_file(api: &SkillApi, name: &str, path: &str) -> String {
    fs::read_to_string(package_file(api, name, path)).unwrap()
}

/// Tracked content of a package's working tree.
pub fn working_tree(api: &SkillApi, name: &str) -> BTreeMap<String, Vec<u8>> {
    FileTree::read_from_dir(&api.paths().package_dir(name), &WalkerConfig::default())
        .unwrap()
        .files
}
