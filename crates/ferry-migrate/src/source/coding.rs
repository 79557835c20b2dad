//! CODING DevOps source.
//!
//! Every call is a `POST /open-api` with an `Action` field; failures come back
//! as HTTP 200 with `Response.Error` set.

use super::http::{to_ssh_url, with_credentials, ApiClient, Auth};
use super::{fetch_attachments, SourcePlatform, SourceRepository};
use crate::config::{MigrateConfig, MigrateType};
use crate::error::{MigrationError, Result};
use crate::markdown::extract_links;
use crate::types::{
    Attachment, AttachmentKind, PlatformKind, Release, ReleaseAsset, RepoType, RepositoryRecord,
    SubGroup,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const CLONE_USER: &str = "coding";
const PAGE_SIZE: u32 = 100;
const ENDPOINT: &str = "/open-api";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Depot {
    id: u64,
    name: String,
    https_url: String,
    ssh_url: String,
    vcs_type: String,
    project_name: String,
    description: String,
    is_shared: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Page {
    page_number: u32,
    total_page: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct DepotData {
    depots: Vec<Depot>,
    page: Page,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Project {
    id: u64,
    display_name: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct CodingRelease {
    tag_name: String,
    title: String,
    body: String,
    pre: bool,
    #[serde(rename = "iid")]
    iid: u64,
    image_download_url: Vec<String>,
    release_attachment: Vec<CodingAttachment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct CodingAttachment {
    attachment_name: String,
    attachment_download_url: String,
    attachment_size: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ReleasePage {
    releases: Vec<CodingRelease>,
    total_count: usize,
}

/// Thin `open-api` client.
#[derive(Debug)]
struct OpenApi {
    api: ApiClient,
}

impl OpenApi {
    /// Call `action` and decode `Response.<field>`.
    async fn call<T: DeserializeOwned + Default>(
        &self,
        action: &str,
        mut params: Value,
        field: &str,
    ) -> Result<T> {
        if let Some(map) = params.as_object_mut() {
            map.insert("Action".to_string(), Value::String(action.to_string()));
        }
        let mut body: Value = self.api.post_json(ENDPOINT, &params).await?;
        let mut response = body
            .get_mut("Response")
            .map(Value::take)
            .unwrap_or(Value::Null);

        if let Some(error) = response.get("Error") {
            let code = error.get("Code").and_then(Value::as_str).unwrap_or_default();
            if !code.is_empty() {
                let message = error.get("Message").and_then(Value::as_str).unwrap_or(code);
                return Err(if code.contains("AuthFailure") {
                    MigrationError::AuthenticationFailed(message.to_string())
                } else {
                    MigrationError::ApiError {
                        status: 200,
                        message: format!("{action}: {message}"),
                    }
                });
            }
        }
        match response.get_mut(field).map(Value::take) {
            Some(Value::Null) | None => Ok(T::default()),
            Some(value) => Ok(serde_json::from_value(value)?),
        }
    }

    /// Depots of a paged listing action.
    async fn depot_pages(&self, action: &str, extra: Value) -> Result<Vec<Depot>> {
        let mut depots = Vec::new();
        let mut page = 1;
        loop {
            let mut params = extra.clone();
            if let Some(map) = params.as_object_mut() {
                map.insert("PageNumber".to_string(), json!(page));
                map.insert("PageSize".to_string(), json!(PAGE_SIZE));
            }
            let data: DepotData = self.call(action, params, "DepotData").await?;
            let done = data.depots.is_empty() || data.page.page_number >= data.page.total_page;
            depots.extend(data.depots);
            if done {
                return Ok(depots);
            }
            page += 1;
        }
    }

    async fn project(&self, name: &str) -> Result<Project> {
        self.call("DescribeProjectByName", json!({ "ProjectName": name }), "Project")
            .await
    }
}

/// Team, project or single-repository listings of one CODING team.
pub struct CodingPlatform {
    api: Arc<OpenApi>,
    token: String,
    migrate_type: MigrateType,
    projects: Vec<String>,
    repos: Vec<String>,
    map_description: bool,
    map_display_name: bool,
    ssh: bool,
}

impl CodingPlatform {
    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Result<Self> {
        let api = ApiClient::new(
            config.source.url.clone(),
            Auth::Header("Authorization", format!("token {}", config.source.token)),
        )?;
        Ok(Self::with_api(api, config))
    }

    fn with_api(api: ApiClient, config: &MigrateConfig) -> Self {
        Self {
            api: Arc::new(OpenApi { api }),
            token: config.source.token.clone(),
            migrate_type: config.migrate.migrate_type,
            projects: config.source.project.clone(),
            repos: config.source.repo.clone(),
            map_description: config.migrate.map_description,
            map_display_name: config.migrate.map_display_name,
            ssh: config.migrate.ssh,
        }
    }

    async fn depots(&self) -> Result<Vec<Depot>> {
        match self.migrate_type {
            MigrateType::Team => {
                self.api
                    .depot_pages("DescribeTeamDepotInfoList", json!({}))
                    .await
            }
            MigrateType::Project => {
                let mut depots = Vec::new();
                for name in &self.projects {
                    let project = self.api.project(name.trim()).await?;
                    debug!(project = %name, id = project.id, "Resolved CODING project");
                    let batch = self
                        .api
                        .depot_pages(
                            "DescribeProjectDepotInfoList",
                            json!({ "ProjectId": project.id }),
                        )
                        .await?;
                    depots.extend(batch);
                }
                Ok(depots)
            }
            MigrateType::Repo => {
                let mut depots = Vec::new();
                for path in &self.repos {
                    let depot: Depot = self
                        .api
                        .call("DescribeGitDepot", json!({ "DepotPath": path.trim() }), "Depot")
                        .await?;
                    if depot.name.is_empty() {
                        return Err(MigrationError::RepositoryNotFound(path.clone()));
                    }
                    depots.push(depot);
                }
                Ok(depots)
            }
        }
    }

    /// Sub groups keyed by project name, with mapped description and display name.
    async fn sub_groups(&self, depots: &[Depot]) -> Result<HashMap<String, SubGroup>> {
        let mut groups = HashMap::new();
        for depot in depots {
            if groups.contains_key(&depot.project_name) {
                continue;
            }
            let mut group = SubGroup::new(depot.project_name.clone());
            if self.map_description || self.map_display_name {
                let project = self.api.project(&depot.project_name).await?;
                let description = project.description.trim();
                let display = project.display_name.trim();
                if self.map_description && !description.is_empty() {
                    group = group.with_description(description);
                }
                if self.map_display_name && !display.is_empty() {
                    group = group.with_display_label(display);
                }
            }
            groups.insert(depot.project_name.clone(), group);
        }
        Ok(groups)
    }

    fn clone_url(&self, depot: &Depot) -> Result<String> {
        if self.ssh {
            if depot.ssh_url.is_empty() {
                to_ssh_url(&depot.https_url)
            } else {
                Ok(depot.ssh_url.clone())
            }
        } else {
            with_credentials(&depot.https_url, CLONE_USER, &self.token)
        }
    }
}

#[async_trait]
impl SourcePlatform for CodingPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Coding
    }

    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let depots = self.depots().await?;
        let groups = self.sub_groups(&depots).await?;

        let mut repos: Vec<Arc<dyn SourceRepository>> = Vec::with_capacity(depots.len());
        for depot in depots {
            let repo_type = if depot.vcs_type.eq_ignore_ascii_case("svn") {
                RepoType::Svn
            } else {
                RepoType::Git
            };
            let sub_group = groups
                .get(&depot.project_name)
                .cloned()
                .unwrap_or_else(|| SubGroup::new(depot.project_name.clone()));
            let url = self.clone_url(&depot)?;
            let record = RepositoryRecord::new(format!("{}/{}", depot.project_name, depot.name))
                .with_sub_group(sub_group)
                .with_type(repo_type)
                .with_private(!depot.is_shared)
                .with_description(depot.description);
            repos.push(Arc::new(CodingRepository {
                record,
                clone_url: url,
                depot_id: depot.id,
                api: Arc::clone(&self.api),
            }));
        }
        info!(count = repos.len(), "Listed CODING repositories");
        Ok(repos)
    }
}

/// A CODING depot.
pub struct CodingRepository {
    record: RepositoryRecord,
    clone_url: String,
    depot_id: u64,
    api: Arc<OpenApi>,
}

impl fmt::Debug for CodingRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodingRepository")
            .field("repo_path", &self.record.repo_path)
            .field("depot_id", &self.depot_id)
            .finish_non_exhaustive()
    }
}

/// Replace body images with the signed download URLs CODING returns, by position.
fn rewrite_images(body: &str, downloads: &[String]) -> String {
    let images = extract_links(body)
        .into_iter()
        .filter(|l| l.kind == AttachmentKind::Img);
    let mut rewritten = body.to_string();
    for (image, download) in images.zip(downloads) {
        rewritten = rewritten.replace(&image.url, download);
    }
    rewritten
}

#[async_trait]
impl SourceRepository for CodingRepository {
    fn record(&self) -> &RepositoryRecord {
        &self.record
    }

    fn clone_url(&self) -> String {
        self.clone_url.clone()
    }

    async fn list_releases(&self) -> Result<Vec<Release>> {
        let mut releases: Vec<CodingRelease> = Vec::new();
        let mut page = 1;
        loop {
            let batch: ReleasePage = self
                .api
                .call(
                    "DescribeGitReleases",
                    json!({
                        "DepotId": self.depot_id,
                        "PageNumber": page,
                        "PageSize": PAGE_SIZE,
                        "ShowResourceUrl": true,
                    }),
                    "ReleasePageList",
                )
                .await?;
            let empty = batch.releases.is_empty();
            releases.extend(batch.releases);
            if empty || releases.len() >= batch.total_count {
                break;
            }
            page += 1;
        }
        releases.sort_by_key(|r| r.iid);

        Ok(releases
            .into_iter()
            .map(|r| Release {
                name: if r.title.is_empty() { r.tag_name.clone() } else { r.title },
                body: rewrite_images(&r.body, &r.image_download_url),
                tag_name: r.tag_name,
                assets: r
                    .release_attachment
                    .into_iter()
                    .map(|a| ReleaseAsset {
                        name: a.attachment_name,
                        url: a.attachment_download_url,
                        size: Some(a.attachment_size),
                    })
                    .collect(),
                prerelease: r.pre,
                draft: false,
            })
            .collect())
    }

    async fn resolve_release_attachments(
        &self,
        body: &str,
        _repo_path: &str,
        _project_id: Option<&str>,
    ) -> Result<Vec<Attachment>> {
        let images = extract_links(body)
            .into_iter()
            .filter(|l| {
                l.kind == AttachmentKind::Img
                    && (l.url.starts_with("https://") || l.url.starts_with("http://"))
            })
            .collect();
        fetch_attachments(&self.api.api, images, |link| link.url.clone()).await
    }

    async fn download_asset(&self, url: &str, dest: &Path) -> Result<u64> {
        self.api.api.download_to_file(url, dest, None).await
    }
}
