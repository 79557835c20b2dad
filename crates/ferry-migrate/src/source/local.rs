//! Bare repositories on the local filesystem.

use super::{SourcePlatform, SourceRepository};
use crate::config::MigrateConfig;
use crate::error::{MigrationError, Result};
use crate::types::{PlatformKind, RepositoryRecord};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Scans a directory tree for bare repositories.
#[derive(Debug, Clone)]
pub struct LocalPlatform {
    root: PathBuf,
}

impl LocalPlatform {
    /// Scan `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create from configuration.
    pub fn from_config(config: &MigrateConfig) -> Self {
        Self::new(config.source.path.clone())
    }
}

/// A bare repository found on disk.
pub struct LocalRepository {
    record: RepositoryRecord,
    path: PathBuf,
}

impl fmt::Debug for LocalRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRepository")
            .field("repo_path", &self.record.repo_path)
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl SourceRepository for LocalRepository {
    fn record(&self) -> &RepositoryRecord {
        &self.record
    }

    fn clone_url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// A directory is a bare repository when it has `HEAD` and `objects/`.
fn is_bare_repository(dir: &Path) -> bool {
    dir.join("HEAD").is_file() && dir.join("objects").is_dir()
}

fn scan(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        if is_bare_repository(&dir) {
            found.push(dir);
            continue;
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                pending.push(entry.path());
            }
        }
    }
    found.sort();
    Ok(found)
}

#[async_trait]
impl SourcePlatform for LocalPlatform {
    fn kind(&self) -> PlatformKind {
        PlatformKind::Local
    }

    async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
            MigrationError::InvalidConfig(format!(
                "cannot read local source {}: {e}",
                self.root.display()
            ))
        })?;
        let scan_root = root.clone();
        let dirs = tokio::task::spawn_blocking(move || scan(&scan_root))
            .await
            .map_err(|e| MigrationError::IoError(std::io::Error::other(e)))??;

        let mut repos: Vec<Arc<dyn SourceRepository>> = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let Ok(relative) = dir.strip_prefix(&root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            let repo_path = relative.trim_end_matches(".git").to_string();
            if repo_path.is_empty() {
                continue;
            }
            debug!(repo = %repo_path, "Found local bare repository");
            repos.push(Arc::new(LocalRepository {
                record: RepositoryRecord::new(repo_path),
                path: dir,
            }));
        }
        Ok(repos)
    }
}
