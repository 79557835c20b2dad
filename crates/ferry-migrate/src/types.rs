//! Common types for migration operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported source hosting platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// CODING DevOps (team/project based).
    Coding,
    /// GitLab (self-hosted or gitlab.com).
    GitLab,
    /// GitHub.
    GitHub,
    /// Gitee.
    Gitee,
    /// Gitea.
    Gitea,
    /// Tencent Gongfeng (GitLab v3 style API).
    Gongfeng,
    /// Alibaba Cloud Codeup.
    Aliyun,
    /// Another CNB instance, read as a mirror source.
    Cnb,
    /// Any git server reachable over HTTP(S) or SSH.
    Common,
    /// Bare repositories on the local filesystem.
    Local,
}

impl PlatformKind {
    /// All supported platforms.
    pub const ALL: [PlatformKind; 10] = [
        Self::Coding,
        Self::GitLab,
        Self::GitHub,
        Self::Gitee,
        Self::Gitea,
        Self::Gongfeng,
        Self::Aliyun,
        Self::Cnb,
        Self::Common,
        Self::Local,
    ];

    /// Configuration name of the platform.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::GitLab => "gitlab",
            Self::GitHub => "github",
            Self::Gitee => "gitee",
            Self::Gitea => "gitea",
            Self::Gongfeng => "gongfeng",
            Self::Aliyun => "aliyun",
            Self::Cnb => "cnb",
            Self::Common => "common",
            Self::Local => "local",
        }
    }

    /// Whether this platform authenticates with an API token.
    pub fn requires_token(&self) -> bool {
        !matches!(self, Self::Common | Self::Aliyun | Self::Local)
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unsupported platform: {s}"))
    }
}

/// Version control system of a source repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    /// Git repository.
    #[default]
    Git,
    /// Subversion repository; never migrated.
    Svn,
}

/// A target-side organizational unit mapped from a source grouping concept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubGroup {
    /// Path of the group relative to the target root, e.g. `team/project`.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional display label, stored as the group remark.
    pub display_label: Option<String>,
}

impl SubGroup {
    /// Create a sub group with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            display_label: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the display label.
    pub fn with_display_label(mut self, label: impl Into<String>) -> Self {
        self.display_label = Some(label.into());
        self
    }

    /// Sub group derived from a repository path by dropping its last segment.
    pub fn from_repo_path(repo_path: &str) -> Self {
        match repo_path.rsplit_once('/') {
            Some((parent, _)) => Self::new(parent),
            None => Self::default(),
        }
    }
}

/// Identifies one source repository.
///
/// Produced at discovery time and immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    /// Unique composite path, e.g. `group/subgroup/repo`.
    pub repo_path: String,
    /// Final path segment.
    pub repo_name: String,
    /// Grouping the repository belongs to.
    pub sub_group: SubGroup,
    /// Version control system.
    pub repo_type: RepoType,
    /// Whether the repository is private on the source.
    pub is_private: bool,
    /// Free-form description.
    pub description: String,
    /// Platform-specific project identifier, if any.
    pub source_project_id: Option<String>,
}

impl RepositoryRecord {
    /// Create a git repository record, deriving the name and sub group from the path.
    pub fn new(repo_path: impl Into<String>) -> Self {
        let repo_path = repo_path.into();
        let repo_name = repo_path
            .rsplit('/')
            .next()
            .unwrap_or(repo_path.as_str())
            .to_string();
        let sub_group = SubGroup::from_repo_path(&repo_path);
        Self {
            repo_path,
            repo_name,
            sub_group,
            repo_type: RepoType::Git,
            is_private: true,
            description: String::new(),
            source_project_id: None,
        }
    }

    /// Set the repository name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.repo_name = name.into();
        self
    }

    /// Set the sub group.
    pub fn with_sub_group(mut self, sub_group: SubGroup) -> Self {
        self.sub_group = sub_group;
        self
    }

    /// Set the repository type.
    pub fn with_type(mut self, repo_type: RepoType) -> Self {
        self.repo_type = repo_type;
        self
    }

    /// Set visibility.
    pub fn with_private(mut self, is_private: bool) -> Self {
        self.is_private = is_private;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the source project id.
    pub fn with_project_id(mut self, id: impl Into<String>) -> Self {
        self.source_project_id = Some(id.into());
        self
    }
}

/// A top-level release asset hosted on the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// File name.
    pub name: String,
    /// Download URL.
    pub url: String,
    /// Size in bytes, when the source reports it.
    pub size: Option<u64>,
}

/// A source release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Tag the release points at.
    pub tag_name: String,
    /// Release title.
    pub name: String,
    /// Markdown body, possibly embedding attachment links.
    pub body: String,
    /// Assets in source order.
    pub assets: Vec<ReleaseAsset>,
    /// Pre-release flag.
    pub prerelease: bool,
    /// Draft flag.
    pub draft: bool,
}

/// Kind of an embedded attachment, which selects the target upload bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Regular file link.
    File,
    /// Inline image.
    Img,
}

impl AttachmentKind {
    /// Upload path segment used by the target.
    pub fn upload_segment(&self) -> &'static str {
        match self {
            Self::File => "files",
            Self::Img => "imgs",
        }
    }
}

/// An attachment referenced from a release body, downloaded from the source.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// File name.
    pub name: String,
    /// Downloaded content.
    pub data: Vec<u8>,
    /// URL as it appears in the release body.
    pub source_url: String,
    /// File or image.
    pub kind: AttachmentKind,
    /// Size in bytes.
    pub size: u64,
}

impl Attachment {
    /// Create an attachment from downloaded bytes.
    pub fn new(
        name: impl Into<String>,
        source_url: impl Into<String>,
        kind: AttachmentKind,
        data: Vec<u8>,
    ) -> Self {
        let size = data.len() as u64;
        Self {
            name: name.into(),
            data,
            source_url: source_url.into(),
            kind,
            size,
        }
    }
}
