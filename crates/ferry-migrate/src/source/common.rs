//! Generic git server reachable over HTTP(S) or SSH.

use super::http::{clone_url, ensure_git_suffix};
use super::{BasicRepository, SourcePlatform, SourceRepository};
use crate::config::MigrateConfig;
use crate::error::Result;
use crate::types::{PlatformKind, RepositoryRecord};
use async_trait::async_trait;
use std::sync::Arc;

/// Repositories listed explicitly in `source.repo` under `source.url`.
#[derive(Debug, Clone)]
pub struct CommonPlatform {
    base_url: String,
    username: String,
    password: String,
    repos: Vec<String>,
    ssh: bool,
}

impl CommonPlatform {
    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Self {
        Self {
            base_url: config.source.url.clone(),
            username: config.source.username.clone(),
            password: config.source.password.clone(),
            repos: config.source.repo.clone(),
            ssh: config.migrate.ssh,
        }
    }
}

#[async_trait]
impl SourcePlatform for CommonPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Common
    }

    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let mut repos: Vec<Arc<dyn SourceRepository>> = Vec::with_capacity(self.repos.len());
        for path in &self.repos {
            let path = path.trim().trim_matches('/').trim_end_matches(".git");
            if path.is_empty() {
                continue;
            }
            let http_url = ensure_git_suffix(&format!("{}/{path}", self.base_url));
            let url = clone_url(&http_url, &self.username, &self.password, self.ssh)?;
            repos.push(Arc::new(BasicRepository::new(RepositoryRecord::new(path), url)));
        }
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform(ssh: bool) -> CommonPlatform {
        CommonPlatform {
            base_url: "https://git.example.com".to_string(),
            username: "bot".to_string(),
            password: "pw".to_string(),
            repos: vec![" group/app.git ".to_string(), "".to_string(), "solo".to_string()],
            ssh,
        }
    }

    #[tokio::test]
    async fn test_lists_configured_repositories() {
        let repos = platform(false).list_all().await.unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].record().repo_path, "group/app");
        assert_eq!(repos[0].clone_url(), "https://bot:pw@git.example.com/group/app.git");
        assert_eq!(repos[1].sub_group().name, "");
    }

    #[tokio::test]
    async fn test_ssh_mode() {
        let repos = platform(true).list_all().await.unwrap();
        assert_eq!(repos[0].clone_url(), "git@git.example.com:group/app.git");
    }
}
