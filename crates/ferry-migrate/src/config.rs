//! Migration configuration.
//!
//! Loaded once from a YAML file with an environment overlay
//! (`PLUGIN_SOURCE__TOKEN`, `PLUGIN_MIGRATE__CONCURRENCY`, ...), validated,
//! and then passed by reference to every component that needs it.

use crate::error::{MigrationError, Result};
use crate::types::PlatformKind;
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Hard cap on concurrently migrated repositories.
pub const MAX_CONCURRENCY: usize = 20;

/// Default number of concurrently migrated repositories.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PLUGIN";

/// Commented configuration template written by `ferry init`.
pub const TEMPLATE: &str = r#"# Source platform settings.
source:
  # coding | gitlab | github | gitee | gitea | gongfeng | aliyun | cnb | common | local
  platform: coding
  url: https://e.coding.net
  token: ""
  # Used by `common` (HTTP) and `aliyun`.
  username: ""
  password: ""
  # Projects to migrate when migrate.type is `project`.
  project: []
  # Repository paths to migrate when migrate.type is `repo`.
  repo: []
  # Group to mirror when platform is `cnb`.
  group: ""
  # Organization id when platform is `aliyun`.
  organization_id: ""
  # Directory holding bare repositories when platform is `local`.
  path: source_git_dir

# Target platform settings.
target:
  url: https://cnb.cool
  token: ""
  # Must already exist on the target.
  root_organization: ""

migrate:
  # team | project | repo
  type: team
  concurrency: 10
  force_push: false
  allow_incomplete_push: false
  use_lfs_migrate: false
  # Size threshold in MB for moving blobs into LFS.
  file_limit_size: 500
  # 1: root/<group>/<repo>, 2: root/<repo>
  organization_mapping_level: 1
  skip_exists_repo: true
  code: true
  release: false
  rebase: false
  ssh: false
  exclude_fork: false
  map_description: false
  map_display_name: false
  log_level: info
  # Scratch clones; removed when the run ends.
  work_dir: migrate_work
  ledger: successful.log
"#;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MigrateConfig {
    /// Source platform settings.
    #[validate(nested)]
    pub source: SourceConfig,

    /// Target platform settings.
    #[validate(nested)]
    pub target: TargetConfig,

    /// Migration behaviour.
    #[validate(nested)]
    pub migrate: MigrateOptions,
}

/// Source platform settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SourceConfig {
    /// Source platform.
    pub platform: PlatformKind,
    /// Base URL of the source platform.
    pub url: String,
    /// API token.
    pub token: String,
    /// Username for basic-auth platforms.
    pub username: String,
    /// Password for basic-auth platforms.
    pub password: String,
    /// Projects to migrate in `project` mode.
    pub project: Vec<String>,
    /// Repository paths to migrate in `repo` mode.
    pub repo: Vec<String>,
    /// Group to mirror from a CNB source.
    pub group: String,
    /// Codeup organization id.
    pub organization_id: String,
    /// Directory scanned by the local platform.
    pub path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            platform: PlatformKind::Coding,
            url: "https://e.coding.net".to_string(),
            token: String::new(),
            username: String::new(),
            password: String::new(),
            project: Vec::new(),
            repo: Vec::new(),
            group: String::new(),
            organization_id: String::new(),
            path: PathBuf::from("source_git_dir"),
        }
    }
}

/// Target platform settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TargetConfig {
    /// Web URL of the target, e.g. `https://cnb.cool`.
    #[validate(url(message = "target.url must be a valid URL"))]
    pub url: String,
    /// API token.
    #[validate(length(min = 1, message = "target.token is required"))]
    pub token: String,
    /// Root organization every repository is created under.
    #[validate(length(min = 1, message = "target.root_organization is required"))]
    pub root_organization: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: "https://cnb.cool".to_string(),
            token: String::new(),
            root_organization: String::new(),
        }
    }
}

/// Which source repositories are migrated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrateType {
    /// Everything visible to the token.
    #[default]
    Team,
    /// Repositories of the listed projects.
    Project,
    /// The listed repositories only.
    Repo,
}

/// How source groups map onto the target root organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizationMapping {
    /// `root/<sub group>/<repo>`; sub-organizations are created up front.
    SubGroups,
    /// `root/<repo>`.
    Flat,
}

/// Migration behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MigrateOptions {
    /// Selection mode.
    #[serde(rename = "type")]
    pub migrate_type: MigrateType,
    /// Concurrent repositories; clamped to [`MAX_CONCURRENCY`].
    #[validate(range(min = 1, message = "migrate.concurrency must be at least 1"))]
    pub concurrency: usize,
    /// Force-push branches and tags.
    pub force_push: bool,
    /// Tolerate missing LFS objects.
    pub allow_incomplete_push: bool,
    /// Rewrite history into LFS when the target rejects large files.
    pub use_lfs_migrate: bool,
    /// Threshold in MB used by the LFS history rewrite.
    #[validate(range(min = 1, message = "migrate.file_limit_size must be positive"))]
    pub file_limit_size: u64,
    /// 1 maps source groups to sub-organizations, 2 flattens under the root.
    #[validate(range(min = 1, max = 2, message = "migrate.organization_mapping_level must be 1 or 2"))]
    pub organization_mapping_level: u8,
    /// Count an already existing target repository as success without pushing.
    pub skip_exists_repo: bool,
    /// Migrate git content.
    pub code: bool,
    /// Migrate releases and their assets.
    pub release: bool,
    /// Rebase target-only commits onto the source when the target exists.
    pub rebase: bool,
    /// Clone over SSH instead of HTTP(S).
    pub ssh: bool,
    /// Skip forks when listing GitHub repositories.
    pub exclude_fork: bool,
    /// Use the source project description as sub-organization description.
    pub map_description: bool,
    /// Use the source project display name as sub-organization remark.
    pub map_display_name: bool,
    /// Log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Scratch directory for mirror clones.
    pub work_dir: PathBuf,
    /// Success ledger file.
    pub ledger: PathBuf,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            migrate_type: MigrateType::Team,
            concurrency: DEFAULT_CONCURRENCY,
            force_push: false,
            allow_incomplete_push: false,
            use_lfs_migrate: false,
            file_limit_size: 500,
            organization_mapping_level: 1,
            skip_exists_repo: true,
            code: true,
            release: false,
            rebase: false,
            ssh: false,
            exclude_fork: false,
            map_description: false,
            map_display_name: false,
            log_level: "info".to_string(),
            work_dir: PathBuf::from("migrate_work"),
            ledger: PathBuf::from("successful.log"),
        }
    }
}

impl MigrateOptions {
    /// Concurrency after applying the hard cap.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

impl MigrateConfig {
    /// Load configuration from a YAML file plus `PLUGIN_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MigrationError::InvalidConfig(format!(
                "configuration file {} not found",
                path.display()
            )));
        }
        let builder = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .add_source(environment());
        Self::finish(builder.build()?.try_deserialize()?)
    }

    /// Parse configuration from YAML text, without environment overrides.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Self::finish(settings.try_deserialize()?)
    }

    fn finish(mut config: Self) -> Result<Self> {
        config.normalize();
        config.check()?;
        Ok(config)
    }

    /// Trim user input and apply platform-implied settings.
    fn normalize(&mut self) {
        self.source.url = self.source.url.trim().trim_end_matches('/').to_string();
        self.target.url = self.target.url.trim().trim_end_matches('/').to_string();
        self.target.root_organization = self
            .target
            .root_organization
            .trim()
            .trim_matches('/')
            .to_string();
        self.migrate.log_level = self.migrate.log_level.trim().to_lowercase();
        // GitHub owners are users or orgs, not nested groups.
        if self.source.platform == PlatformKind::GitHub {
            self.migrate.organization_mapping_level = 2;
        }
    }

    /// Validate field rules and cross-field requirements.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| MigrationError::InvalidConfig(e.to_string()))?;

        let source = &self.source;
        let platform = source.platform;

        if !matches!(platform, PlatformKind::Aliyun | PlatformKind::Local)
            && !(source.url.starts_with("http://") || source.url.starts_with("https://"))
        {
            return invalid("source.url must start with http:// or https://");
        }
        if platform.requires_token() && source.token.trim().is_empty() {
            return invalid(format!("source.token is required for platform {platform}"));
        }
        if platform == PlatformKind::Common {
            if !self.migrate.ssh
                && (source.username.is_empty() || source.password.is_empty())
            {
                return invalid("source.username and source.password are required for platform common");
            }
            if source.repo.is_empty() {
                return invalid("source.repo is required for platform common");
            }
        }
        if platform == PlatformKind::Aliyun {
            if source.organization_id.trim().is_empty() {
                return invalid("source.organization_id is required for platform aliyun");
            }
            if source.token.trim().is_empty() {
                return invalid("source.token is required for platform aliyun");
            }
        }
        if platform == PlatformKind::Local && source.path == self.migrate.work_dir {
            return invalid("migrate.work_dir must differ from source.path");
        }
        if platform == PlatformKind::Cnb && source.group.trim().is_empty() {
            return invalid("source.group is required for platform cnb");
        }
        match self.migrate.migrate_type {
            MigrateType::Project if source.project.is_empty() => {
                return invalid("source.project is required when migrate.type is project");
            }
            MigrateType::Repo if source.repo.is_empty() => {
                return invalid("source.repo is required when migrate.type is repo");
            }
            _ => {}
        }
        if !matches!(
            self.migrate.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return invalid(format!("unknown migrate.log_level {}", self.migrate.log_level));
        }
        Ok(())
    }

    /// Selected organization mapping.
    pub fn mapping(&self) -> OrganizationMapping {
        if self.migrate.organization_mapping_level == 1 {
            OrganizationMapping::SubGroups
        } else {
            OrganizationMapping::Flat
        }
    }

    /// Copy of this configuration with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for secret in [
            &mut copy.source.token,
            &mut copy.source.password,
            &mut copy.target.token,
        ] {
            if !secret.is_empty() {
                *secret = "<redacted>".to_string();
            }
        }
        copy
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("source.project")
        .with_list_parse_key("source.repo")
}

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(MigrationError::InvalidConfig(message.into()))
}
