//! Another CNB deployment used as a read-only mirror source.

use super::http::{clone_url, cnb_api_url, collect_pages, header_number, ApiClient, Auth};
use super::{sub_group_without_root, BasicRepository, SourcePlatform, SourceRepository};
use crate::config::MigrateConfig;
use crate::error::Result;
use crate::types::{PlatformKind, RepositoryRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

const CLONE_USER: &str = "cnb";
const PAGE_SIZE: u64 = 100;

#[derive(Debug, Deserialize)]
struct CnbRepo {
    path: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    visibility_level: String,
}

/// All repositories below one group, including descendants.
pub struct CnbSourcePlatform {
    api: ApiClient,
    web_url: String,
    token: String,
    group: String,
    ssh: bool,
}

impl CnbSourcePlatform {
    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Result<Self> {
        let api = ApiClient::new(
            cnb_api_url(&config.source.url)?,
            Auth::Bearer(config.source.token.clone()),
        )?;
        Ok(Self::with_api(api, config))
    }

    fn with_api(api: ApiClient, config: &MigrateConfig) -> Self {
        Self {
            api,
            web_url: config.source.url.clone(),
            token: config.source.token.clone(),
            group: config.source.group.trim().trim_matches('/').to_string(),
            ssh: config.migrate.ssh,
        }
    }
}

#[async_trait]
impl SourcePlatform for CnbSourcePlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Cnb
    }

    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let api = &self.api;
        let path = format!("/{}/-/repos", self.group);
        let path = path.as_str();
        let listed: Vec<CnbRepo> = collect_pages(|page| async move {
            let (batch, headers): (Vec<CnbRepo>, _) = api
                .get_page(
                    path,
                    &[
                        ("page", page.to_string()),
                        ("page_size", PAGE_SIZE.to_string()),
                        ("descendant", "all".to_string()),
                    ],
                )
                .await?;
            let total = header_number(&headers, "x-cnb-total").unwrap_or(0);
            Ok((batch, u64::from(page) * PAGE_SIZE < total))
        })
        .await?;

        let mut repos: Vec<Arc<dyn SourceRepository>> = Vec::with_capacity(listed.len());
        for repo in listed {
            let http_url = format!("{}/{}.git", self.web_url, repo.path);
            let url = clone_url(&http_url, CLONE_USER, &self.token, self.ssh)?;
            let record = RepositoryRecord::new(repo.path.clone())
                .with_name(repo.name)
                .with_sub_group(sub_group_without_root(&repo.path))
                .with_private(!repo.visibility_level.eq_ignore_ascii_case("public"))
                .with_description(repo.description);
            repos.push(Arc::new(BasicRepository::new(record, url)));
        }
        info!(group = %self.group, count = repos.len(), "Listed CNB repositories");
        Ok(repos)
    }
}
