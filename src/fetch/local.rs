//! Local filesystem fetcher

use super::{frontmatter_version, Resolution, SkillFetcher, SourceRef, LOCAL_SCHEME};
use crate::error::FetchError;
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directory names never copied out of a local source
const SKIPPED_DIRS: &[&str] = &[".git"];

/// Copies a package directory from the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    base_dir: PathBuf,
}

impl LocalFetcher {
    /// Relative source paths are resolved against `base_dir`.
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    fn resolve(&self, raw: &str) -> PathBuf {
        if let Some(rest) = raw.strip_prefix('~') {
            if let Some(dirs) = directories::BaseDirs::new() {
                return dirs.home_dir().join(rest.trim_start_matches(['/', '\\']));
            }
        }
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl SkillFetcher for LocalFetcher {
    fn scheme(&self) -> &'static str {
        LOCAL_SCHEME
    }

    async fn fetch(&self, source: &SourceRef, dest: &Path) -> Result<Resolution, FetchError> {
        let SourceRef::Local { path } = source else {
            return Err(FetchError::Unsupported(format!(
                "local fetcher cannot handle {}",
                source
            )));
        };

        let src = self.resolve(path);
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || copy_package(&src, &dest))
            .await
            .map_err(|e| FetchError::Network(format!("local copy task failed: {}", e)))?
    }
}

fn copy_package(src: &Path, dest: &Path) -> Result<Resolution, FetchError> {
    if !src.exists() {
        return Err(FetchError::NotFound(format!("skill source not found: {}", src.display())));
    }
    let canonical = dunce::canonicalize(src)
        .map_err(|e| FetchError::NotFound(format!("cannot resolve {}: {}", src.display(), e)))?;
    if !canonical.is_dir() {
        return Err(FetchError::Validation(format!(
            "skill source {} is not a directory",
            canonical.display()
        )));
    }

    copy_tree(&canonical, dest)
        .map_err(|e| FetchError::Validation(format!("failed to copy {}: {}", canonical.display(), e)))?;
    debug!(source = %canonical.display(), dest = %dest.display(), "Copied local skill");

    Ok(Resolution {
        registry: LOCAL_SCHEME.to_string(),
        reference: canonical.display().to_string(),
        version: frontmatter_version(dest),
        commit: None,
    })
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dest)?;
    let walker = WalkDir::new(src).follow_links(true).into_iter().filter_entry(|e| {
        e.depth() == 0
            || !SKIPPED_DIRS
                .iter()
                .any(|skip| e.file_name().to_string_lossy() == *skip)
    });
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
