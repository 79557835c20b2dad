//! Rebase resync: replay target-only commits on top of the migrated source.

use super::{redact_credentials, GitAdapter};
use crate::error::{MigrationError, Result};
use std::path::Path;
use tracing::{info, warn};

const SOURCE_REMOTE: &str = "source";

const INVALID_UPSTREAM_MARKERS: [&str; 2] = ["fatal: invalid upstream", "致命错误：无效的上游"];

/// Whether rebase output reports a missing upstream branch.
pub fn is_invalid_upstream(output: &str) -> bool {
    INVALID_UPSTREAM_MARKERS.iter().any(|m| output.contains(m))
}

/// Branch names tracked from `remote` in `git branch -r` output, without
/// the symbolic `HEAD` entry.
pub fn parse_remote_branches(listing: &str, remote: &str) -> Vec<String> {
    let prefix = format!("{remote}/");
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.contains("->"))
        .filter_map(|line| line.strip_prefix(prefix.as_str()))
        .filter(|branch| !branch.is_empty() && *branch != "HEAD")
        .map(str::to_string)
        .collect()
}

impl GitAdapter {
    /// Rebase every branch of the target working clone onto the same branch
    /// of the local source mirror.
    ///
    /// Branches missing on the source are skipped. Returns the branches that
    /// were rebased, in listing order.
    pub async fn rebase_onto(&self, target_clone: &Path, source_repo: &Path) -> Result<Vec<String>> {
        let source = tokio::fs::canonicalize(source_repo).await?;
        let source = source.to_string_lossy().into_owned();

        self.run_checked(
            "remote add",
            Some(target_clone),
            &["remote", "add", SOURCE_REMOTE, &source],
        )
        .await?;
        self.run_with_retry("fetch", Some(target_clone), &["fetch", SOURCE_REMOTE])
            .await?;

        let listing = self
            .run_checked("branch", Some(target_clone), &["branch", "-r"])
            .await?;

        let mut rebased = Vec::new();
        for branch in parse_remote_branches(&listing, "origin") {
            let tracking = format!("refs/remotes/origin/{branch}");
            self.run_checked(
                "checkout",
                Some(target_clone),
                &["checkout", "-B", &branch, &tracking],
            )
            .await?;

            let upstream = format!("{SOURCE_REMOTE}/{branch}");
            let output = self
                .git(Some(target_clone), &["rebase", &upstream])
                .await?;

            if output.success {
                rebased.push(branch);
            } else if is_invalid_upstream(&output.output) {
                info!(branch = %branch, "Branch missing on source, skipping rebase");
            } else {
                if let Err(e) = self
                    .run_checked("rebase --abort", Some(target_clone), &["rebase", "--abort"])
                    .await
                {
                    warn!(branch = %branch, error = %e, "Failed to abort rebase");
                }
                return Err(MigrationError::GitCommand {
                    operation: format!("rebase {branch}"),
                    output: redact_credentials(output.output.trim()),
                });
            }
        }

        Ok(rebased)
    }

    /// Force-push each rebased branch back to the target individually.
    pub async fn push_rebased_branches(&self, target_clone: &Path, branches: &[String]) -> Result<()> {
        for branch in branches {
            let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
            self.run_with_retry(
                "push rebased branch",
                Some(target_clone),
                &["push", "-f", "origin", &refspec],
            )
            .await?;
            info!(branch = %branch, "Pushed rebased branch");
        }
        Ok(())
    }
}
