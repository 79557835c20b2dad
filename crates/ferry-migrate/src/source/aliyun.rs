//! Alibaba Cloud Codeup source.

use super::http::{clone_url, collect_pages, ensure_git_suffix, header_number, ApiClient, Auth};
use super::{sub_group_without_root, BasicRepository, SourcePlatform, SourceRepository};
use crate::config::MigrateConfig;
use crate::error::Result;
use crate::types::{PlatformKind, RepositoryRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Codeup OpenAPI endpoint.
pub const OPENAPI_BASE: &str = "https://openapi-rdc.aliyuncs.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeupRepository {
    path_with_namespace: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    visibility: String,
    web_url: String,
}

/// Repositories of one Codeup organization.
pub struct AliyunPlatform {
    api: ApiClient,
    organization_id: String,
    username: String,
    password: String,
    ssh: bool,
}

impl AliyunPlatform {
    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Result<Self> {
        Self::with_base(OPENAPI_BASE, config)
    }

    /// Create against a specific OpenAPI endpoint.
    pub fn with_base(base: &str, config: &MigrateConfig) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(
                base,
                Auth::Header("x-yunxiao-token", config.source.token.clone()),
            )?,
            organization_id: config.source.organization_id.trim().to_string(),
            username: config.source.username.clone(),
            password: config.source.password.clone(),
            ssh: config.migrate.ssh,
        })
    }
}

#[async_trait]
impl SourcePlatform for AliyunPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Aliyun
    }

    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let api = &self.api;
        let path = format!(
            "/oapi/v1/codeup/organizations/{}/repositories",
            self.organization_id
        );
        let path = path.as_str();
        let listed: Vec<CodeupRepository> = collect_pages(|page| async move {
            let (batch, headers): (Vec<CodeupRepository>, _) = api
                .get_page(
                    path,
                    &[("page", page.to_string()), ("perPage", "100".to_string())],
                )
                .await?;
            let total_pages = header_number(&headers, "X-Total-Pages").unwrap_or(1);
            Ok((batch, u64::from(page) < total_pages))
        })
        .await?;

        let mut repos: Vec<Arc<dyn SourceRepository>> = Vec::with_capacity(listed.len());
        for repo in listed {
            let http_url = ensure_git_suffix(&repo.web_url);
            let url = clone_url(&http_url, &self.username, &self.password, self.ssh)?;
            let record = RepositoryRecord::new(repo.path_with_namespace.clone())
                .with_name(repo.name)
                .with_sub_group(sub_group_without_root(&repo.path_with_namespace))
                .with_private(repo.visibility != "public")
                .with_description(repo.description);
            repos.push(Arc::new(BasicRepository::new(record, url)));
        }
        info!(count = repos.len(), "Listed Codeup repositories");
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_lists_organization_repositories() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oapi/v1/codeup/organizations/org-1/repositories"))
            .and(query_param("perPage", "100"))
            .and(header("x-yunxiao-token", "pt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Total-Pages", "1")
                    .set_body_json(serde_json::json!([{
                        "id": 9,
                        "pathWithNamespace": "org-1/backend/api",
                        "name": "api",
                        "description": "svc",
                        "visibility": "private",
                        "webUrl": "https://codeup.aliyun.com/org-1/backend/api"
                    }])),
            )
            .mount(&server)
            .await;

        let config = MigrateConfig::from_yaml_str(
            "source:\n  platform: aliyun\n  token: pt\n  organization_id: org-1\n  username: u\n  password: p\ntarget:\n  token: t\n  root_organization: acme\n",
        )
        .unwrap();
        let platform = AliyunPlatform::with_base(&server.uri(), &config).unwrap();
        let repos = platform.list_all().await.unwrap();

        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].record().repo_path, "org-1/backend/api");
        assert_eq!(repos[0].sub_group().name, "backend");
        assert_eq!(repos[0].clone_url(), "https://u:p@codeup.aliyun.com/org-1/backend/api.git");
    }
}
