//! Tencent Gongfeng source (GitLab v3 style API).

use super::http::{clone_url, collect_pages, header_number, ApiClient, Auth};
use super::{BasicRepository, SourcePlatform, SourceRepository};
use crate::config::MigrateConfig;
use crate::error::Result;
use crate::types::{PlatformKind, RepositoryRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const CLONE_USER: &str = "oauth2";

#[derive(Debug, Deserialize)]
struct GongfengProject {
    path_with_namespace: String,
    name: String,
    description: Option<String>,
    /// 0 private, 10 internal, 20 public.
    #[serde(default)]
    visibility_level: u8,
    http_url_to_repo: String,
}

/// Projects owned by the token's user.
pub struct GongfengPlatform {
    api: ApiClient,
    token: String,
    ssh: bool,
}

impl GongfengPlatform {
    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(
                format!("{}/api/v3", config.source.url),
                Auth::Header("PRIVATE-TOKEN", config.source.token.clone()),
            )?,
            token: config.source.token.clone(),
            ssh: config.migrate.ssh,
        })
    }
}

#[async_trait]
impl SourcePlatform for GongfengPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Gongfeng
    }

    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let api = &self.api;
        let projects: Vec<GongfengProject> = collect_pages(|page| async move {
            let (batch, headers): (Vec<GongfengProject>, _) = api
                .get_page(
                    "/projects",
                    &[
                        ("owned", "true".to_string()),
                        ("per_page", "100".to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let total_pages = header_number(&headers, "X-Total-Pages").unwrap_or(1);
            Ok((batch, u64::from(page) < total_pages))
        })
        .await?;

        let mut repos: Vec<Arc<dyn SourceRepository>> = Vec::with_capacity(projects.len());
        for project in projects {
            let url = clone_url(&project.http_url_to_repo, CLONE_USER, &self.token, self.ssh)?;
            let record = RepositoryRecord::new(project.path_with_namespace)
                .with_name(project.name)
                .with_private(project.visibility_level < 20)
                .with_description(project.description.unwrap_or_default());
            repos.push(Arc::new(BasicRepository::new(record, url)));
        }
        info!(count = repos.len(), "Listed Gongfeng projects");
        Ok(repos)
    }
}
