//! Target platform client.
//!
//! The orchestrator and release migrator talk to the target only through
//! [`TargetPlatform`]; [`CnbClient`] implements it over the CNB OpenAPI.

use crate::config::{MigrateConfig, OrganizationMapping};
use crate::error::{MigrationError, Result};
use crate::source::http::{build_client, check_status, cnb_api_url, with_credentials, READ_TIMEOUT};
use crate::types::{Attachment, Release, SubGroup};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Longest sub-organization name the target accepts.
pub const MAX_GROUP_NAME: usize = 50;
/// Longest sub-organization description.
pub const MAX_GROUP_DESCRIPTION: usize = 200;
/// Longest sub-organization remark (display label).
pub const MAX_GROUP_REMARK: usize = 50;
/// Longest repository description.
pub const MAX_REPO_DESCRIPTION: usize = 350;

/// Errcode returned with a 409 when a group path is taken by a repository.
const GROUP_PATH_TAKEN_BY_REPO: i64 = 10009;

const ACCEPT: &str = "application/vnd.cnb.api+json";
const PUSH_USER: &str = "cnb";

/// Result of an idempotent create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The resource was created.
    Created,
    /// The resource was already there.
    AlreadyExists,
}

/// Result of creating a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Created with this target release id.
    Created(String),
    /// A release for the tag already exists.
    AlreadyExists,
}

/// Operations the migration needs from the target platform.
///
/// All paths are full target paths including the root organization.
#[async_trait]
pub trait TargetPlatform: Send + Sync {
    /// The configured root organization.
    fn root_organization(&self) -> &str;

    /// Whether the root organization exists.
    async fn root_organization_exists(&self) -> Result<bool>;

    /// Names of the sub-organizations directly below the root.
    async fn list_sub_groups(&self) -> Result<HashSet<String>>;

    /// Create a sub-organization.
    async fn create_sub_group(
        &self,
        path: &str,
        description: &str,
        remark: &str,
    ) -> Result<CreateOutcome>;

    /// Whether a repository exists.
    async fn repo_exists(&self, path: &str) -> Result<bool>;

    /// Create a repository `name` inside `group`.
    async fn create_repo(
        &self,
        group: &str,
        name: &str,
        private: bool,
        description: &str,
    ) -> Result<CreateOutcome>;

    /// Authenticated git push URL for a repository.
    fn push_url(&self, path: &str) -> Result<String>;

    /// Create a release; `release.body` must already point at target-hosted attachments.
    async fn create_release(&self, repo_path: &str, release: &Release) -> Result<ReleaseOutcome>;

    /// Upload a release-body attachment and return its target path.
    async fn upload_attachment(&self, repo_path: &str, attachment: &Attachment) -> Result<String>;

    /// Upload a file as an asset of an existing release.
    async fn upload_release_asset(
        &self,
        repo_path: &str,
        release_id: &str,
        name: &str,
        file: &Path,
        size: u64,
    ) -> Result<()>;
}

/// Normalize a single group name for the target.
///
/// Drops `.git`/`.svn` suffixes, trims non-alphanumerics at both ends and
/// caps the length at [`MAX_GROUP_NAME`] characters.
pub fn normalize_group_name(name: &str) -> String {
    let mut name = name.trim();
    for suffix in [".git", ".svn"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped;
        }
    }
    let trimmed = name.trim_matches(|c: char| !c.is_alphanumeric());
    let capped: String = trimmed.chars().take(MAX_GROUP_NAME).collect();
    capped
        .trim_end_matches(|c: char| !c.is_alphanumeric())
        .to_string()
}

/// Normalize every segment of a group path, dropping empty segments.
pub fn normalize_group_path(path: &str) -> String {
    path.split('/')
        .map(normalize_group_name)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.trim().chars().take(max).collect()
}

/// Where repositories land below the root organization.
#[derive(Debug, Clone)]
pub struct TargetLayout {
    root: String,
    mapping: OrganizationMapping,
}

impl TargetLayout {
    /// Layout for `root` with the given mapping.
    pub fn new(root: impl Into<String>, mapping: OrganizationMapping) -> Self {
        Self {
            root: root.into(),
            mapping,
        }
    }

    /// Layout described by the configuration.
    pub fn from_config(config: &MigrateConfig) -> Self {
        Self::new(config.target.root_organization.clone(), config.mapping())
    }

    /// The mapping in effect.
    pub fn mapping(&self) -> OrganizationMapping {
        self.mapping
    }

    /// Full path of the group a repository with `sub_group` goes into.
    pub fn group_path(&self, sub_group: &SubGroup) -> String {
        let relative = normalize_group_path(&sub_group.name);
        match self.mapping {
            OrganizationMapping::SubGroups if !relative.is_empty() => {
                format!("{}/{relative}", self.root)
            }
            _ => self.root.clone(),
        }
    }

    /// Full target path of a repository.
    pub fn repo_path(&self, sub_group: &SubGroup, repo_name: &str) -> String {
        format!("{}/{repo_name}", self.group_path(sub_group))
    }

    /// Sub-organizations to create, relative to the root, parents first.
    ///
    /// Every ancestor of every group is included once; groups whose
    /// top-level name is in `existing` and that have no deeper segments are
    /// skipped. Ordering is by depth, then lexicographic.
    pub fn required_sub_groups<'a>(
        &self,
        groups: impl IntoIterator<Item = &'a SubGroup>,
        existing: &HashSet<String>,
    ) -> Vec<SubGroup> {
        if self.mapping == OrganizationMapping::Flat {
            return Vec::new();
        }
        let mut required: BTreeMap<String, SubGroup> = BTreeMap::new();
        for group in groups {
            let path = normalize_group_path(&group.name);
            if path.is_empty() {
                continue;
            }
            let segments: Vec<&str> = path.split('/').collect();
            for depth in 1..=segments.len() {
                let prefix = segments[..depth].join("/");
                if depth == 1 && segments.len() == 1 && existing.contains(&prefix) {
                    continue;
                }
                let entry = required
                    .entry(prefix.clone())
                    .or_insert_with(|| SubGroup::new(prefix));
                if depth == segments.len() {
                    if entry.description.is_none() {
                        entry.description.clone_from(&group.description);
                    }
                    if entry.display_label.is_none() {
                        entry.display_label.clone_from(&group.display_label);
                    }
                }
            }
        }
        let mut ordered: Vec<SubGroup> = required.into_values().collect();
        ordered.sort_by(|a, b| {
            a.name
                .matches('/')
                .count()
                .cmp(&b.name.matches('/').count())
                .then_with(|| a.name.cmp(&b.name))
        });
        ordered
    }

    /// Full path of a relative sub group.
    pub fn full_path(&self, relative: &str) -> String {
        format!("{}/{relative}", self.root)
    }
}

#[derive(Debug, Serialize)]
struct CreateGroupRequest<'a> {
    path: &'a str,
    remark: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    visibility: &'static str,
    description: String,
    license: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateReleaseRequest<'a> {
    tag_name: &'a str,
    name: &'a str,
    body: &'a str,
    prerelease: bool,
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct NamedGroup {
    #[serde(default)]
    name: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    name: &'a str,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct UploadAssets {
    path: String,
}

#[derive(Debug, Deserialize)]
struct UploadForm {
    assets: UploadAssets,
    upload_url: String,
    #[serde(default)]
    form: BTreeMap<String, String>,
    #[serde(default)]
    token: String,
}

#[derive(Debug, Serialize)]
struct AssetUploadRequest<'a> {
    asset_name: &'a str,
    size: u64,
    overwrite: bool,
}

#[derive(Debug, Deserialize)]
struct AssetUploadUrl {
    upload_url: String,
    verify_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errcode: i64,
}

/// HTTP client for a CNB deployment.
pub struct CnbClient {
    client: Client,
    api_url: String,
    web_url: String,
    token: String,
    root: String,
}

impl CnbClient {
    /// Create a client for the web URL `web_url`, e.g. `https://cnb.cool`.
    pub fn new(web_url: &str, token: impl Into<String>, root: impl Into<String>) -> Result<Self> {
        Self::with_api_url(web_url, &cnb_api_url(web_url)?, token, root)
    }

    /// Create a client with an explicit API endpoint.
    pub fn with_api_url(
        web_url: &str,
        api_url: &str,
        token: impl Into<String>,
        root: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(READ_TIMEOUT)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            web_url: web_url.trim_end_matches('/').to_string(),
            token: token.into(),
            root: root.into(),
        })
    }

    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Result<Self> {
        Self::new(
            &config.target.url,
            config.target.token.clone(),
            config.target.root_organization.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", self.api_url)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token).header("Accept", ACCEPT)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorized(request)
            .send()
            .await
            .map_err(|e| MigrationError::NetworkError(e.without_url().to_string()))
    }

    /// GET `path` and report whether it exists.
    async fn exists(&self, path: &str) -> Result<bool> {
        let response = self.send(self.client.get(self.url(path))).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => check_status(response).await.map(|_| true),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| MigrationError::NetworkError(e.without_url().to_string()))
    }
}

#[async_trait]
impl TargetPlatform for CnbClient {
    fn root_organization(&self) -> &str {
        &self.root
    }

    async fn root_organization_exists(&self) -> Result<bool> {
        self.exists(&format!("/{}", self.root)).await
    }

    async fn list_sub_groups(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        let mut page = 1u64;
        loop {
            let request = self
                .client
                .get(self.url(&format!("/{}/-/sub-groups", self.root)))
                .query(&[("page", page.to_string()), ("page_size", "100".to_string())]);
            let response = check_status(self.send(request).await?).await?;
            let headers = response.headers().clone();
            let groups: Vec<NamedGroup> = Self::json(response).await?;
            let fetched = groups.len();
            for group in groups {
                let name = if group.name.is_empty() {
                    group.path.rsplit('/').next().unwrap_or_default().to_string()
                } else {
                    group.name
                };
                names.insert(name);
            }

            let total = crate::source::http::header_number(&headers, "x-cnb-total").unwrap_or(0);
            let page_size =
                crate::source::http::header_number(&headers, "x-cnb-page-size").unwrap_or(100);
            if fetched == 0 || page * page_size >= total {
                return Ok(names);
            }
            page += 1;
        }
    }

    async fn create_sub_group(
        &self,
        path: &str,
        description: &str,
        remark: &str,
    ) -> Result<CreateOutcome> {
        let body = CreateGroupRequest {
            path,
            remark: truncate_chars(remark, MAX_GROUP_REMARK),
            description: truncate_chars(description, MAX_GROUP_DESCRIPTION),
        };
        let response = self
            .send(self.client.post(self.url("/groups")).json(&body))
            .await?;

        if response.status() == StatusCode::CONFLICT {
            let text = response.text().await.unwrap_or_default();
            let errcode = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|e| e.errcode)
                .unwrap_or_default();
            if errcode == GROUP_PATH_TAKEN_BY_REPO {
                return Err(MigrationError::SubGroupConflict(path.to_string()));
            }
            debug!(group = %path, "Sub-organization already exists");
            return Ok(CreateOutcome::AlreadyExists);
        }
        check_status(response).await?;
        info!(group = %path, "Created sub-organization");
        Ok(CreateOutcome::Created)
    }

    async fn repo_exists(&self, path: &str) -> Result<bool> {
        self.exists(&format!("/{path}")).await
    }

    async fn create_repo(
        &self,
        group: &str,
        name: &str,
        private: bool,
        description: &str,
    ) -> Result<CreateOutcome> {
        let body = CreateRepoRequest {
            name,
            visibility: if private { "private" } else { "public" },
            description: truncate_chars(description, MAX_REPO_DESCRIPTION),
            license: "",
        };
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/{group}/-/repos")))
                    .json(&body),
            )
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(CreateOutcome::AlreadyExists);
        }
        check_status(response).await?;
        Ok(CreateOutcome::Created)
    }

    fn push_url(&self, path: &str) -> Result<String> {
        with_credentials(&format!("{}/{path}.git", self.web_url), PUSH_USER, &self.token)
    }

    async fn create_release(&self, repo_path: &str, release: &Release) -> Result<ReleaseOutcome> {
        let body = CreateReleaseRequest {
            tag_name: &release.tag_name,
            name: &release.name,
            body: &release.body,
            prerelease: release.prerelease,
            draft: release.draft,
        };
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("/{repo_path}/-/releases")))
                    .json(&body),
            )
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(ReleaseOutcome::AlreadyExists);
        }
        let created: ReleaseResponse = Self::json(check_status(response).await?).await?;
        Ok(ReleaseOutcome::Created(created.id))
    }

    async fn upload_attachment(&self, repo_path: &str, attachment: &Attachment) -> Result<String> {
        let request = UploadRequest {
            name: &attachment.name,
            size: attachment.size,
        };
        let path = format!(
            "/{repo_path}/-/upload/{}",
            attachment.kind.upload_segment()
        );
        let response = self
            .send(self.client.post(self.url(&path)).json(&request))
            .await?;
        let signed: UploadForm = Self::json(check_status(response).await?).await?;

        let mut form = Form::new();
        for (key, value) in signed.form {
            form = form.text(key, value);
        }
        let part = Part::bytes(attachment.data.clone()).file_name(attachment.name.clone());
        form = form.part("file", part);
        let response = self
            .client
            .post(&signed.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MigrationError::NetworkError(e.without_url().to_string()))?;
        check_status(response).await?;

        let confirm = self
            .client
            .put(self.url(&signed.assets.path))
            .query(&[("token", signed.token.as_str())]);
        check_status(self.send(confirm).await?).await?;

        debug!(repo = %repo_path, name = %attachment.name, "Uploaded release attachment");
        Ok(signed.assets.path)
    }

    async fn upload_release_asset(
        &self,
        repo_path: &str,
        release_id: &str,
        name: &str,
        file: &Path,
        size: u64,
    ) -> Result<()> {
        let request = AssetUploadRequest {
            asset_name: name,
            size,
            overwrite: true,
        };
        let path = format!("/{repo_path}/-/releases/{release_id}/asset-upload-url");
        let response = self
            .send(self.client.post(self.url(&path)).json(&request))
            .await?;
        let urls: AssetUploadUrl = Self::json(check_status(response).await?).await?;

        let handle = tokio::fs::File::open(file).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(handle));
        let response = self
            .client
            .put(&urls.upload_url)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .map_err(|e| MigrationError::NetworkError(e.without_url().to_string()))?;
        check_status(response).await?;

        let verify = self.client.post(self.url(&urls.verify_url));
        check_status(self.send(verify).await?).await?;
        info!(repo = %repo_path, asset = %name, size, "Uploaded release asset");
        Ok(())
    }
}
