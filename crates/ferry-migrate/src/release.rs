//! Release migration: body attachments, release creation and release assets.

use crate::error::Result;
use crate::source::SourceRepository;
use crate::target::{ReleaseOutcome, TargetPlatform};
use crate::types::Release;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Release assets larger than this are never transferred.
pub const MAX_RELEASE_ASSET_SIZE: u64 = 50 * 1024 * 1024 * 1024;

/// What happened to one repository's releases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseReport {
    /// Releases created on the target.
    pub created: usize,
    /// Releases that already existed and were left alone.
    pub existing: usize,
    /// Body attachments uploaded.
    pub attachments: usize,
    /// Release assets uploaded.
    pub assets_uploaded: usize,
    /// Release assets skipped for size.
    pub assets_skipped: usize,
}

/// Copies releases of one repository to the target.
pub struct ReleaseMigrator<'a> {
    target: &'a dyn TargetPlatform,
    scratch_dir: &'a Path,
    max_asset_size: u64,
}

impl<'a> ReleaseMigrator<'a> {
    /// Create a migrator that stages asset downloads in `scratch_dir`.
    pub fn new(target: &'a dyn TargetPlatform, scratch_dir: &'a Path) -> Self {
        Self {
            target,
            scratch_dir,
            max_asset_size: MAX_RELEASE_ASSET_SIZE,
        }
    }

    /// Override the asset size ceiling.
    pub fn with_max_asset_size(mut self, bytes: u64) -> Self {
        self.max_asset_size = bytes;
        self
    }

    /// Migrate every release of `source` into `target_repo`, oldest first.
    pub async fn migrate(
        &self,
        source: &dyn SourceRepository,
        target_repo: &str,
    ) -> Result<ReleaseReport> {
        let releases = source.list_releases().await?;
        let mut report = ReleaseReport::default();
        if releases.is_empty() {
            return Ok(report);
        }
        tokio::fs::create_dir_all(self.scratch_dir).await?;

        for release in releases {
            self.migrate_one(source, target_repo, release, &mut report)
                .await?;
        }
        info!(
            repo = %source.record().repo_path,
            created = report.created,
            existing = report.existing,
            assets = report.assets_uploaded,
            "Migrated releases"
        );
        Ok(report)
    }

    async fn migrate_one(
        &self,
        source: &dyn SourceRepository,
        target_repo: &str,
        mut release: Release,
        report: &mut ReleaseReport,
    ) -> Result<()> {
        let record = source.record();

        // The body is immutable once the release exists, so rewrite it first.
        let attachments = source
            .resolve_release_attachments(
                &release.body,
                &record.repo_path,
                record.source_project_id.as_deref(),
            )
            .await?;
        for attachment in &attachments {
            let hosted = self.target.upload_attachment(target_repo, attachment).await?;
            release.body = release.body.replace(&attachment.source_url, &hosted);
            report.attachments += 1;
        }

        let release_id = match self.target.create_release(target_repo, &release).await? {
            ReleaseOutcome::Created(id) => {
                report.created += 1;
                id
            }
            ReleaseOutcome::AlreadyExists => {
                warn!(repo = %target_repo, tag = %release.tag_name, "Release already exists, skipping");
                report.existing += 1;
                return Ok(());
            }
        };

        for asset in &release.assets {
            if asset.size.is_some_and(|size| size > self.max_asset_size) {
                warn!(repo = %target_repo, asset = %asset.name, "Release asset exceeds size ceiling, skipping");
                report.assets_skipped += 1;
                continue;
            }
            let staged = self.scratch_dir.join(staging_name(&release.tag_name, &asset.name));
            let size = source.download_asset(&asset.url, &staged).await?;
            if size > self.max_asset_size {
                warn!(repo = %target_repo, asset = %asset.name, size, "Release asset exceeds size ceiling, skipping");
                report.assets_skipped += 1;
                remove_quietly(&staged).await;
                continue;
            }
            let uploaded = self
                .target
                .upload_release_asset(target_repo, &release_id, &asset.name, &staged, size)
                .await;
            remove_quietly(&staged).await;
            uploaded?;
            debug!(repo = %target_repo, asset = %asset.name, size, "Release asset copied");
            report.assets_uploaded += 1;
        }
        Ok(())
    }
}

fn staging_name(tag: &str, asset: &str) -> String {
    format!("{tag}-{asset}").replace(['/', '\\'], "_")
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "Could not remove staged asset");
    }
}
