//! Fetch collaborators
//!
//! A fetcher materializes a package's files from its declared source into a
//! destination directory and reports where the content resolved to. One
//! implementation exists per source scheme; the reconciler only sees the
//! `SkillFetcher` trait through a `FetcherRegistry`.

pub mod github;
pub mod local;

use crate::config::EngineConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub use github::GitHubFetcher;
pub use local::LocalFetcher;

/// Scheme name of local sources
pub const LOCAL_SCHEME: &str = "local";
/// Scheme name of GitHub sources
pub const GITHUB_SCHEME: &str = "github";

/// A GitHub location: `owner/repo`, optional branch, optional sub-directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubRef {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
    pub subpath: String,
}

/// Parsed source reference of a package declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceRef {
    Local { path: String },
    GitHub(GitHubRef),
}

impl SourceRef {
    /// Classify a raw source string.
    ///
    /// - `local:<path>` and paths starting with `./`, `../`, `/` or `~` are local
    /// - `github:<ref>`, anything mentioning `github.com`, and `owner/repo[/path]`
    ///   are GitHub
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FetchError::Unsupported("empty source reference".to_string()));
        }
        if let Some(path) = raw.strip_prefix("local:") {
            return Ok(SourceRef::Local {
                path: path.to_string(),
            });
        }
        if let Some(rest) = raw.strip_prefix("github:") {
            return GitHubRef::parse(rest).map(SourceRef::GitHub);
        }
        if raw.starts_with("./")
            || raw.starts_with("../")
            || raw.starts_with('/')
            || raw.starts_with('~')
            || raw == "."
        {
            return Ok(SourceRef::Local {
                path: raw.to_string(),
            });
        }
        GitHubRef::parse(raw).map(SourceRef::GitHub)
    }

    /// Registry name used for provenance in lock entries.
    pub fn registry(&self) -> &'static str {
        match self {
            SourceRef::Local { .. } => LOCAL_SCHEME,
            SourceRef::GitHub(_) => GITHUB_SCHEME,
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Local { path } => write!(f, "local:{}", path),
            SourceRef::GitHub(gh) => {
                write!(f, "github:{}/{}", gh.owner, gh.repo)?;
                if !gh.subpath.is_empty() {
                    write!(f, "/{}", gh.subpath)?;
                }
                if let Some(branch) = &gh.branch {
                    write!(f, "@{}", branch)?;
                }
                Ok(())
            }
        }
    }
}

impl GitHubRef {
    /// Parse `https://github.com/owner/repo[.git][/tree/branch[/path]]` or
    /// `owner/repo[/path]`.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let without_host = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let without_host = without_host
            .strip_prefix("www.github.com/")
            .or_else(|| without_host.strip_prefix("github.com/"));

        let unsupported = || FetchError::Unsupported(format!("cannot parse GitHub reference: {}", raw));

        match without_host {
            Some(path) => {
                let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
                if parts.len() < 2 {
                    return Err(unsupported());
                }
                let owner = parts[0].to_string();
                let repo = parts[1].trim_end_matches(".git").to_string();
                let (branch, subpath) = match parts.get(2) {
                    Some(&"tree") | Some(&"blob") => {
                        let branch = parts.get(3).ok_or_else(unsupported)?.to_string();
                        (Some(branch), parts[4.min(parts.len())..].join("/"))
                    }
                    Some(_) => return Err(unsupported()),
                    None => (None, String::new()),
                };
                Ok(GitHubRef {
                    owner,
                    repo,
                    branch,
                    subpath,
                })
            }
            None => {
                if trimmed.contains("github.com") || trimmed.contains("://") {
                    return Err(unsupported());
                }
                let parts: Vec<&str> = trimmed.split('/').filter(|p| !p.is_empty()).collect();
                if parts.len() < 2 {
                    return Err(unsupported());
                }
                Ok(GitHubRef {
                    owner: parts[0].to_string(),
                    repo: parts[1].trim_end_matches(".git").to_string(),
                    branch: None,
                    subpath: parts[2..].join("/"),
                })
            }
        }
    }
}

/// Where a fetched package resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub registry: String,
    pub reference: String,
    pub version: Option<String>,
    pub commit: Option<String>,
}

/// Fetch collaborator for one source scheme
#[async_trait]
pub trait SkillFetcher: Send + Sync {
    /// Scheme this fetcher serves (`SourceRef::registry`)
    fn scheme(&self) -> &'static str;

    /// Materialize the package into `dest`, which must not exist yet.
    async fn fetch(&self, source: &SourceRef, dest: &Path) -> Result<Resolution, FetchError>;
}

/// Dispatches fetches to the fetcher registered for the source's scheme
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<&'static str, Arc<dyn SkillFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in local and GitHub fetchers.
    ///
    /// Relative local sources resolve against `workspace_root`.
    pub fn with_defaults(workspace_root: &Path, config: &EngineConfig) -> Result<Self, FetchError> {
        let mut registry = Self::new();
        registry.register(Arc::new(LocalFetcher::new(workspace_root)));
        registry.register(Arc::new(GitHubFetcher::new(&config.github)?));
        Ok(registry)
    }

    /// Register (or replace) the fetcher for its scheme.
    pub fn register(&mut self, fetcher: Arc<dyn SkillFetcher>) {
        self.fetchers.insert(fetcher.scheme(), fetcher);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn SkillFetcher>> {
        self.fetchers.get(scheme).cloned()
    }

    /// Parse `raw` and fetch it with the matching fetcher.
    pub async fn fetch(&self, raw: &str, dest: &Path) -> Result<Resolution, FetchError> {
        let source = SourceRef::parse(raw)?;
        let fetcher = self.get(source.registry()).ok_or_else(|| {
            FetchError::Unsupported(format!("no fetcher registered for scheme '{}'", source.registry()))
        })?;
        fetcher.fetch(&source, dest).await
    }
}

impl fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.fetchers.keys().collect();
        schemes.sort();
        f.debug_struct("FetcherRegistry").field("schemes", &schemes).finish()
    }
}

/// `version:` value from the front matter of `<dir>/SKILL.md`, if any.
pub fn frontmatter_version(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join("SKILL.md")).ok()?;
    parse_frontmatter_version(&content)
}

fn parse_frontmatter_version(content: &str) -> Option<String> {
    let mut lines = content.lines();
    if lines.next()?.trim_end() != "---" {
        return None;
    }
    for line in lines {
        if line.trim_end() == "---" {
            break;
        }
        if let Some(value) = line.strip_prefix("version:") {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
