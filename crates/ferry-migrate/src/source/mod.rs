//! Source repository abstraction.
//!
//! A [`SourcePlatform`] lists repositories; each listed repository is a
//! [`SourceRepository`] carrying its own clone/release capabilities. The
//! orchestrator and release migrator only ever see these two traits.

pub mod aliyun;
pub mod cnb;
pub mod coding;
pub mod common;
pub mod gitea;
pub mod gitee;
pub mod github;
pub mod gitlab;
pub mod gongfeng;
pub mod http;
pub mod local;

use crate::config::MigrateConfig;
use crate::error::{MigrationError, Result};
use crate::git::{CloneOutcome, GitAdapter};
use crate::markdown::EmbeddedLink;
use crate::types::{Attachment, PlatformKind, Release, RepositoryRecord, SubGroup};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// A source hosting platform that can enumerate repositories.
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    /// Which platform this is.
    fn kind(&self) -> PlatformKind;

    /// Every repository selected by the configuration.
    ///
    /// Fails as a whole if any page fails; partial listings are never returned.
    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>>;
}

/// One source repository and its platform-specific capabilities.
#[async_trait]
pub trait SourceRepository: Send + Sync + fmt::Debug {
    /// Discovery-time metadata.
    fn record(&self) -> &RepositoryRecord;

    /// Clone URL with embedded credentials, or an SSH URL.
    fn clone_url(&self) -> String;

    /// Mirror-clone into `dest`.
    async fn clone_into(&self, git: &GitAdapter, dest: &Path) -> Result<CloneOutcome> {
        git.mirror_clone(&self.clone_url(), dest).await
    }

    /// Releases, oldest first.
    async fn list_releases(&self) -> Result<Vec<Release>> {
        Ok(Vec::new())
    }

    /// Download attachments referenced by a release body.
    async fn resolve_release_attachments(
        &self,
        _body: &str,
        _repo_path: &str,
        _project_id: Option<&str>,
    ) -> Result<Vec<Attachment>> {
        Ok(Vec::new())
    }

    /// Stream a release asset into `dest`, returning its size.
    async fn download_asset(&self, url: &str, _dest: &Path) -> Result<u64> {
        Err(MigrationError::UnsupportedFeature(format!(
            "release assets are not available from this platform ({url})"
        )))
    }

    /// Target grouping for this repository.
    fn sub_group(&self) -> SubGroup {
        self.record().sub_group.clone()
    }

    /// Whether the repository is private.
    fn is_private(&self) -> bool {
        self.record().is_private
    }

    /// Repository description.
    fn description(&self) -> &str {
        &self.record().description
    }
}

/// A repository with nothing beyond a record and a clone URL.
pub struct BasicRepository {
    record: RepositoryRecord,
    clone_url: String,
}

impl BasicRepository {
    /// Create a repository from its record and clone URL.
    pub fn new(record: RepositoryRecord, clone_url: String) -> Self {
        Self { record, clone_url }
    }
}

impl fmt::Debug for BasicRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicRepository")
            .field("repo_path", &self.record.repo_path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SourceRepository for BasicRepository {
    fn record(&self) -> &RepositoryRecord {
        &self.record
    }

    fn clone_url(&self) -> String {
        self.clone_url.clone()
    }
}

/// Drop the leading organization segment of `path` and its last segment.
///
/// `org/a/b/repo` maps to the sub group `a/b`.
pub(crate) fn sub_group_without_root(path: &str) -> SubGroup {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments.pop();
    if !segments.is_empty() {
        segments.remove(0);
    }
    SubGroup::new(segments.join("/"))
}

/// Download each link, resolving it to a fetchable URL with `resolve`.
///
/// The first failed download aborts the whole set.
pub(crate) async fn fetch_attachments(
    api: &http::ApiClient,
    links: Vec<EmbeddedLink>,
    resolve: impl Fn(&EmbeddedLink) -> String,
) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::with_capacity(links.len());
    for link in links {
        let data = api.download(&resolve(&link), None).await?;
        debug!(url = %link.url, bytes = data.len(), "Downloaded release attachment");
        attachments.push(Attachment::new(link.file_name(), link.url.clone(), link.kind, data));
    }
    Ok(attachments)
}

/// Build the platform selected by `config`.
pub fn connect(config: &MigrateConfig) -> Result<Arc<dyn SourcePlatform>> {
    let platform: Arc<dyn SourcePlatform> = match config.source.platform {
        PlatformKind::Coding => Arc::new(coding::CodingPlatform::from_config(config)?),
        PlatformKind::GitLab => Arc::new(gitlab::GitLabPlatform::from_config(config)?),
        PlatformKind::GitHub => Arc::new(github::GitHubPlatform::from_config(config)?),
        PlatformKind::Gitee => Arc::new(gitee::GiteePlatform::from_config(config)?),
        PlatformKind::Gitea => Arc::new(gitea::GiteaPlatform::from_config(config)?),
        PlatformKind::Gongfeng => Arc::new(gongfeng::GongfengPlatform::from_config(config)?),
        PlatformKind::Aliyun => Arc::new(aliyun::AliyunPlatform::from_config(config)?),
        PlatformKind::Cnb => Arc::new(cnb::CnbSourcePlatform::from_config(config)?),
        PlatformKind::Common => Arc::new(common::CommonPlatform::from_config(config)),
        PlatformKind::Local => Arc::new(local::LocalPlatform::from_config(config)),
    };
    Ok(platform)
}
