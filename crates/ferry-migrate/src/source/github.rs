//! GitHub source.

use super::http::{clone_url, collect_pages, ApiClient, Auth};
use super::{SourcePlatform, SourceRepository};
use crate::config::MigrateConfig;
use crate::error::Result;
use crate::types::{PlatformKind, Release, ReleaseAsset, RepositoryRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepo {
    full_name: String,
    name: String,
    description: Option<String>,
    private: bool,
    #[serde(default)]
    fork: bool,
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    prerelease: bool,
    draft: bool,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    /// API URL; downloading it with `Accept: application/octet-stream`
    /// works for private repositories too.
    url: String,
    size: u64,
}

/// Repositories owned by or shared with the token's user.
pub struct GitHubPlatform {
    api: Arc<ApiClient>,
    token: String,
    exclude_fork: bool,
    ssh: bool,
}

impl GitHubPlatform {
    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Result<Self> {
        let api = ApiClient::new(
            api_base(&config.source.url),
            Auth::Bearer(config.source.token.clone()),
        )?;
        Ok(Self {
            api: Arc::new(api),
            token: config.source.token.clone(),
            exclude_fork: config.migrate.exclude_fork,
            ssh: config.migrate.ssh,
        })
    }

    #[cfg(test)]
    fn with_api(api: ApiClient, token: &str) -> Self {
        Self {
            api: Arc::new(api),
            token: token.to_string(),
            exclude_fork: false,
            ssh: false,
        }
    }
}

/// `https://api.github.com` for github.com, `{url}/api/v3` for Enterprise.
fn api_base(url: &str) -> String {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if host.is_empty() || host == "github.com" || host == "www.github.com" {
        "https://api.github.com".to_string()
    } else {
        format!("{}/api/v3", url.trim_end_matches('/'))
    }
}

async fn fetch_all<T: DeserializeOwned + Send>(api: &ApiClient, path: &str) -> Result<Vec<T>> {
    collect_pages(|page| async move {
        let items: Vec<T> = api
            .get_json(
                path,
                &[("per_page", PER_PAGE.to_string()), ("page", page.to_string())],
            )
            .await?;
        let more = items.len() == PER_PAGE;
        Ok((items, more))
    })
    .await
}

#[async_trait]
impl SourcePlatform for GitHubPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::GitHub
    }

    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let user: GitHubUser = self.api.get_json("/user", &[]).await?;
        debug!(login = %user.login, "Authenticated with GitHub");

        let repos: Vec<GitHubRepo> = fetch_all(&self.api, "/user/repos").await?;
        let total = repos.len();

        let mut listed: Vec<Arc<dyn SourceRepository>> = Vec::with_capacity(total);
        for repo in repos {
            if self.exclude_fork && repo.fork {
                debug!(repo = %repo.full_name, "Skipping fork");
                continue;
            }
            let url = clone_url(&repo.clone_url, &user.login, &self.token, self.ssh)?;
            let record = RepositoryRecord::new(repo.full_name.clone())
                .with_name(repo.name)
                .with_private(repo.private)
                .with_description(repo.description.unwrap_or_default());
            listed.push(Arc::new(GitHubRepository {
                record,
                clone_url: url,
                api: Arc::clone(&self.api),
            }));
        }
        info!(total, listed = listed.len(), "Listed GitHub repositories");
        Ok(listed)
    }
}

/// A GitHub repository.
pub struct GitHubRepository {
    record: RepositoryRecord,
    clone_url: String,
    api: Arc<ApiClient>,
}

impl fmt::Debug for GitHubRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubRepository")
            .field("repo_path", &self.record.repo_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceRepository for GitHubRepository {
    fn record(&self) -> &RepositoryRecord {
        &self.record
    }

    fn clone_url(&self) -> String {
        self.clone_url.clone()
    }

    async fn list_releases(&self) -> Result<Vec<Release>> {
        let path = format!("/repos/{}/releases", self.record.repo_path);
        let mut releases: Vec<GitHubRelease> = fetch_all(&self.api, &path).await?;
        releases.sort_by_key(|r| r.created_at);

        Ok(releases
            .into_iter()
            .map(|r| Release {
                name: r.name.filter(|n| !n.is_empty()).unwrap_or_else(|| r.tag_name.clone()),
                tag_name: r.tag_name,
                body: r.body.unwrap_or_default(),
                assets: r
                    .assets
                    .into_iter()
                    .map(|a| ReleaseAsset {
                        name: a.name,
                        url: a.url,
                        size: Some(a.size),
                    })
                    .collect(),
                prerelease: r.prerelease,
                draft: r.draft,
            })
            .collect())
    }

    async fn download_asset(&self, url: &str, dest: &Path) -> Result<u64> {
        self.api
            .download_to_file(url, dest, Some("application/octet-stream"))
            .await
    }
}
