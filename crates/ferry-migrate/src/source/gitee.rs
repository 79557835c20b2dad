//! Gitee source (API v5).

use super::http::{clone_url, collect_pages, ensure_git_suffix, header_number, ApiClient, Auth};
use super::{fetch_attachments, SourcePlatform, SourceRepository};
use crate::config::MigrateConfig;
use crate::error::Result;
use crate::markdown::extract_links;
use crate::types::{Attachment, PlatformKind, Release, ReleaseAsset, RepositoryRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Gitee appends source archives (zip and tar.gz) to every release.
const GENERATED_ARCHIVES: usize = 2;

#[derive(Debug, Deserialize)]
struct GiteeUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GiteeRepo {
    full_name: String,
    name: String,
    description: Option<String>,
    private: bool,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GiteeRelease {
    tag_name: String,
    name: Option<String>,
    body: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<GiteeAsset>,
}

#[derive(Debug, Deserialize)]
struct GiteeAsset {
    name: Option<String>,
    browser_download_url: String,
}

/// Repositories visible to the token's user.
pub struct GiteePlatform {
    api: Arc<ApiClient>,
    token: String,
    ssh: bool,
}

impl GiteePlatform {
    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Result<Self> {
        let api = ApiClient::new(
            format!("{}/api/v5", config.source.url),
            Auth::Query("access_token", config.source.token.clone()),
        )?;
        Ok(Self {
            api: Arc::new(api),
            token: config.source.token.clone(),
            ssh: config.migrate.ssh,
        })
    }
}

#[async_trait]
impl SourcePlatform for GiteePlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Gitee
    }

    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let user: GiteeUser = self.api.get_json("/user", &[]).await?;
        debug!(login = %user.login, "Authenticated with Gitee");

        let api = &self.api;
        let repos: Vec<GiteeRepo> = collect_pages(|page| async move {
            let (batch, headers): (Vec<GiteeRepo>, _) = api
                .get_page(
                    "/user/repos",
                    &[("page", page.to_string()), ("per_page", "100".to_string())],
                )
                .await?;
            let total_pages = header_number(&headers, "total_page").unwrap_or(1);
            Ok((batch, u64::from(page) < total_pages))
        })
        .await?;

        let mut listed: Vec<Arc<dyn SourceRepository>> = Vec::with_capacity(repos.len());
        for repo in repos {
            let http_url = ensure_git_suffix(&repo.html_url);
            let url = clone_url(&http_url, &user.login, &self.token, self.ssh)?;
            listed.push(Arc::new(GiteeRepository {
                record: RepositoryRecord::new(repo.full_name)
                    .with_name(repo.name)
                    .with_private(repo.private)
                    .with_description(repo.description.unwrap_or_default()),
                clone_url: url,
                api: Arc::clone(&self.api),
            }));
        }
        info!(count = listed.len(), "Listed Gitee repositories");
        Ok(listed)
    }
}

/// A Gitee repository.
pub struct GiteeRepository {
    record: RepositoryRecord,
    clone_url: String,
    api: Arc<ApiClient>,
}

impl fmt::Debug for GiteeRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GiteeRepository")
            .field("repo_path", &self.record.repo_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceRepository for GiteeRepository {
    fn record(&self) -> &RepositoryRecord {
        &self.record
    }

    fn clone_url(&self) -> String {
        self.clone_url.clone()
    }

    async fn list_releases(&self) -> Result<Vec<Release>> {
        let path = format!("/repos/{}/releases", self.record.repo_path);
        let releases: Vec<GiteeRelease> = self
            .api
            .get_json(&path, &[("per_page", "100".to_string()), ("direction", "asc".to_string())])
            .await?;

        Ok(releases
            .into_iter()
            .map(|r| {
                let keep = r.assets.len().saturating_sub(GENERATED_ARCHIVES);
                Release {
                    name: r.name.filter(|n| !n.is_empty()).unwrap_or_else(|| r.tag_name.clone()),
                    tag_name: r.tag_name,
                    body: r.body.unwrap_or_default(),
                    assets: r
                        .assets
                        .into_iter()
                        .take(keep)
                        .map(|a| ReleaseAsset {
                            name: a.name.unwrap_or_else(|| {
                                a.browser_download_url.rsplit('/').next().unwrap_or_default().to_string()
                            }),
                            url: a.browser_download_url,
                            size: None,
                        })
                        .collect(),
                    prerelease: r.prerelease,
                    draft: false,
                }
            })
            .collect())
    }

    async fn resolve_release_attachments(
        &self,
        body: &str,
        _repo_path: &str,
        _project_id: Option<&str>,
    ) -> Result<Vec<Attachment>> {
        let links = extract_links(body)
            .into_iter()
            .filter(|l| l.url.contains("/attach_files/"))
            .collect();
        fetch_attachments(&self.api, links, |link| link.url.clone()).await
    }

    async fn download_asset(&self, url: &str, dest: &Path) -> Result<u64> {
        self.api.download_to_file(url, dest, None).await
    }
}
