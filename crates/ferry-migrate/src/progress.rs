//! Per-repository pipeline stages and progress reporting.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback type for progress updates.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Why a repository was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Present in the success ledger.
    AlreadyMigrated,
    /// Not a git repository.
    Unsupported,
    /// Target repository exists and existing repositories are skipped.
    TargetExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyMigrated => write!(f, "already migrated"),
            Self::Unsupported => write!(f, "unsupported repository type"),
            Self::TargetExists => write!(f, "target repository exists"),
        }
    }
}

/// Stage of one repository's migration.
///
/// `Discovered → Cloning → TargetEnsuring → Pushing → [LfsPushing] →
/// [Rebasing] → [ReleaseMigrating] → Recorded`, with `Skipped` reachable
/// before any work and `Failed` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStage {
    /// Listed by the source platform.
    Discovered,
    /// Mirror clone from the source.
    Cloning,
    /// Checking or creating the target repository.
    TargetEnsuring,
    /// Pushing branches and tags.
    Pushing,
    /// Pushing LFS objects.
    LfsPushing,
    /// Rebasing target-only commits onto the source.
    Rebasing,
    /// Migrating releases and assets.
    ReleaseMigrating,
    /// Written to the success ledger.
    Recorded,
    /// Skipped without migrating.
    Skipped(SkipReason),
    /// Migration failed.
    Failed,
}

impl RepoStage {
    /// Whether no further stage follows.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Recorded | Self::Skipped(_) | Self::Failed)
    }
}

impl fmt::Display for RepoStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered => write!(f, "Discovered"),
            Self::Cloning => write!(f, "Cloning source repository"),
            Self::TargetEnsuring => write!(f, "Ensuring target repository"),
            Self::Pushing => write!(f, "Pushing to target"),
            Self::LfsPushing => write!(f, "Pushing LFS objects"),
            Self::Rebasing => write!(f, "Rebasing onto source"),
            Self::ReleaseMigrating => write!(f, "Migrating releases"),
            Self::Recorded => write!(f, "Done"),
            Self::Skipped(reason) => write!(f, "Skipped ({reason})"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress update information.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Repository the update is about.
    pub repo_path: String,
    /// Stage just entered.
    pub stage: RepoStage,
    /// Repositories that reached a terminal stage.
    pub completed: u64,
    /// Repositories in this run.
    pub total: u64,
}

/// Progress tracker for a migration run.
#[derive(Default)]
pub struct MigrationProgress {
    completed: AtomicU64,
    total: AtomicU64,
    callback: Option<ProgressCallback>,
}

impl fmt::Debug for MigrationProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationProgress")
            .field("completed", &self.completed.load(Ordering::SeqCst))
            .field("total", &self.total.load(Ordering::SeqCst))
            .finish()
    }
}

impl MigrationProgress {
    /// Create a progress tracker without a callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a progress tracker with a callback.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            ..Self::default()
        }
    }

    /// Set the number of repositories in this run.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
    }

    /// Report that `repo_path` entered `stage`.
    pub fn stage(&self, repo_path: &str, stage: RepoStage) {
        if stage.is_terminal() {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(callback) = &self.callback {
            callback(ProgressUpdate {
                repo_path: repo_path.to_string(),
                stage,
                completed: self.completed.load(Ordering::SeqCst),
                total: self.total.load(Ordering::SeqCst),
            });
        }
    }

    /// Repositories finished so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Get current progress percentage.
    pub fn percentage(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        let completed = self.completed.load(Ordering::SeqCst);
        (completed as f64 / total as f64) * 100.0
    }
}

/// Console progress bar using indicatif.
pub struct ConsoleProgressReporter {
    progress_bar: indicatif::ProgressBar,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter.
    pub fn new() -> Self {
        let progress_bar = indicatif::ProgressBar::new(0);
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        ) {
            progress_bar.set_style(style.progress_chars("#>-"));
        }
        Self { progress_bar }
    }

    /// Create a progress callback for use with migration.
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.progress_bar.clone();
        Arc::new(move |update: ProgressUpdate| {
            pb.set_length(update.total);
            pb.set_position(update.completed);
            let message = match update.stage {
                RepoStage::Failed => console::style(format!("{}: {}", update.repo_path, update.stage))
                    .red()
                    .to_string(),
                stage => format!("{}: {stage}", update.repo_path),
            };
            pb.set_message(message);
        })
    }

    /// Finish the progress bar.
    pub fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
