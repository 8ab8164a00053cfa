//! GitHub fetcher
//!
//! Resolves the branch to a commit, then walks the contents API at that
//! commit and downloads every file under the package's sub-directory.

use super::{frontmatter_version, GitHubRef, Resolution, SkillFetcher, SourceRef, GITHUB_SCHEME};
use crate::config::GitHubConfig;
use crate::error::FetchError;
use crate::tree::path::resolve_key;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const USER_AGENT: &str = concat!("skillsmith/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    download_url: Option<String>,
}

/// Fetches packages through the GitHub REST API
pub struct GitHubFetcher {
    client: Client,
    api_base: String,
    token: Option<String>,
    default_branch: String,
}

impl GitHubFetcher {
    pub fn new(config: &GitHubConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            default_branch: config.default_branch.clone(),
        })
    }

    fn request(&self, url: &str) -> RequestBuilder {
        let builder = self.client.get(url).header("Accept", GITHUB_ACCEPT);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, FetchError> {
        let response = self.request(url).send().await.map_err(map_http_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status.as_u16() {
                404 => FetchError::NotFound(format!("{} ({})", url, body)),
                _ => FetchError::Network(format!("Request to {} failed with status {}: {}", url, status, body)),
            });
        }
        response
            .json()
            .await
            .map_err(|e| FetchError::Network(format!("Failed to parse response from {}: {}", url, e)))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.request(url).send().await.map_err(map_http_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                404 => FetchError::NotFound(url.to_string()),
                _ => FetchError::Network(format!("Download of {} failed with status {}", url, status)),
            });
        }
        let bytes = response.bytes().await.map_err(map_http_error)?;
        Ok(bytes.to_vec())
    }

    async fn resolve_commit(&self, gh: &GitHubRef, branch: &str) -> Result<String, FetchError> {
        let url = format!("{}/repos/{}/{}/commits/{}", self.api_base, gh.owner, gh.repo, branch);
        let commit: CommitResponse = self.get_json(&url).await?;
        Ok(commit.sha)
    }

    async fn list_dir(&self, gh: &GitHubRef, dir: &str, sha: &str) -> Result<Vec<ContentEntry>, FetchError> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base, gh.owner, gh.repo, dir, sha
        );
        let value: serde_json::Value = self.get_json(&url).await?;
        if !value.is_array() {
            return Err(FetchError::Validation(format!(
                "{}/{}/{} is not a directory",
                gh.owner, gh.repo, dir
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| FetchError::Network(format!("Unexpected contents listing for {}: {}", url, e)))
    }

    async fn download_tree(&self, gh: &GitHubRef, sha: &str, dest: &Path) -> Result<usize, FetchError> {
        let prefix = if gh.subpath.is_empty() {
            String::new()
        } else {
            format!("{}/", gh.subpath)
        };

        let mut pending = vec![gh.subpath.clone()];
        let mut files = 0usize;
        while let Some(dir) = pending.pop() {
            for entry in self.list_dir(gh, &dir, sha).await? {
                match entry.kind.as_str() {
                    "dir" => {
                        if entry.path.rsplit('/').next() != Some(".git") {
                            pending.push(entry.path);
                        }
                    }
                    "file" => {
                        let url = entry.download_url.as_deref().ok_or_else(|| {
                            FetchError::Validation(format!("{} has no download url", entry.path))
                        })?;
                        let rel = entry.path.strip_prefix(&prefix).unwrap_or(&entry.path);
                        let target = resolve_key(dest, rel)
                            .map_err(|e| FetchError::Validation(e.to_string()))?;
                        let bytes = self.download(url).await?;
                        if let Some(parent) = target.parent() {
                            tokio::fs::create_dir_all(parent)
                                .await
                                .map_err(|e| FetchError::Validation(e.to_string()))?;
                        }
                        tokio::fs::write(&target, bytes)
                            .await
                            .map_err(|e| FetchError::Validation(e.to_string()))?;
                        files += 1;
                    }
                    other => debug!(path = %entry.path, kind = other, "Skipping non-file entry"),
                }
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl SkillFetcher for GitHubFetcher {
    fn scheme(&self) -> &'static str {
        GITHUB_SCHEME
    }

    async fn fetch(&self, source: &SourceRef, dest: &Path) -> Result<Resolution, FetchError> {
        let SourceRef::GitHub(gh) = source else {
            return Err(FetchError::Unsupported(format!(
                "GitHub fetcher cannot handle {}",
                source
            )));
        };

        let branch = gh.branch.clone().unwrap_or_else(|| self.default_branch.clone());
        let sha = self.resolve_commit(gh, &branch).await?;
        tokio::fs::create_dir_all(dest)
            .await
            .map_err(|e| FetchError::Validation(e.to_string()))?;
        let files = self.download_tree(gh, &sha, dest).await?;

        let mut reference = format!("https://github.com/{}/{}/tree/{}", gh.owner, gh.repo, branch);
        if !gh.subpath.is_empty() {
            reference.push('/');
            reference.push_str(&gh.subpath);
        }
        info!(reference = %reference, commit = %sha, files, "Fetched skill from GitHub");

        Ok(Resolution {
            registry: GITHUB_SCHEME.to_string(),
            reference,
            version: frontmatter_version(dest),
            commit: Some(sha),
        })
    }
}

fn map_http_error(error: reqwest::Error) -> FetchError {
    if let Some(status) = error.status() {
        match status.as_u16() {
            404 => FetchError::NotFound(format!("Not found: {}", error)),
            _ => FetchError::Network(format!("Request failed with status {}: {}", status, error)),
        }
    } else if error.is_timeout() {
        FetchError::Network(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        FetchError::Network(format!("Connection error: {}", error))
    } else {
        FetchError::Network(format!("HTTP error: {}", error))
    }
}
