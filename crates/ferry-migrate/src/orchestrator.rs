//! Migration orchestrator.
//!
//! Discovers repositories, prepares the target organization tree and then
//! drives a bounded pool of workers through the per-repository pipeline:
//! ledger check, clone, target ensure, push, LFS push, optional rebase
//! resync, optional release migration and finally the ledger record.
//!
//! Only discovery and target-structure failures abort the run. Everything
//! that goes wrong inside one repository's pipeline is logged and counted
//! as a failure for that repository alone.

use crate::config::MigrateConfig;
use crate::error::{MigrationError, Result};
use crate::filter;
use crate::git::{is_non_fast_forward, CloneOutcome, GitAdapter, GitOptions};
use crate::ledger::SuccessLedger;
use crate::progress::{MigrationProgress, RepoStage, SkipReason};
use crate::release::ReleaseMigrator;
use crate::source::{self, SourcePlatform, SourceRepository};
use crate::stats::{MigrationStats, StatsSnapshot};
use crate::target::{CnbClient, TargetLayout, TargetPlatform};
use crate::types::{RepoType, SubGroup};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How one repository's pipeline ended, short of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepoOutcome {
    Migrated,
    Skipped(SkipReason),
}

/// Runs a whole migration.
pub struct Migrator {
    config: Arc<MigrateConfig>,
    source: Option<Arc<dyn SourcePlatform>>,
    target: Arc<dyn TargetPlatform>,
    git: GitAdapter,
    progress: Arc<MigrationProgress>,
}

impl Migrator {
    /// Create a migrator for the configured source and CNB target, using the
    /// system `git` binary.
    pub fn new(config: MigrateConfig) -> Result<Self> {
        let target = Arc::new(CnbClient::from_config(&config)?);
        let git = GitAdapter::system(GitOptions::from(&config.migrate));
        Ok(Self {
            config: Arc::new(config),
            source: None,
            target,
            git,
            progress: Arc::new(MigrationProgress::new()),
        })
    }

    /// Create a migrator from explicit collaborators.
    pub fn with_parts(
        config: MigrateConfig,
        source: Arc<dyn SourcePlatform>,
        target: Arc<dyn TargetPlatform>,
        git: GitAdapter,
    ) -> Self {
        Self {
            config: Arc::new(config),
            source: Some(source),
            target,
            git,
            progress: Arc::new(MigrationProgress::new()),
        }
    }

    /// Report per-repository stages to `progress`.
    pub fn with_progress(mut self, progress: MigrationProgress) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// Run to completion.
    pub async fn run(&self) -> Result<StatsSnapshot> {
        self.run_until(std::future::pending()).await
    }

    /// Run until done or until `shutdown` resolves.
    ///
    /// On shutdown the in-flight workers are dropped, the work directory is
    /// removed and [`MigrationError::Interrupted`] is returned. The work
    /// directory is removed after a normal finish as well.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<StatsSnapshot>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.execute() => result,
            () = shutdown => {
                warn!("Interrupt received, abandoning in-flight repositories");
                Err(MigrationError::Interrupted)
            }
        };
        remove_dir_quietly(&self.config.migrate.work_dir).await;
        result
    }

    async fn execute(&self) -> Result<StatsSnapshot> {
        let started = Instant::now();
        let repos = self.discover().await?;

        let root = self.target.root_organization().to_string();
        if !self.target.root_organization_exists().await? {
            return Err(MigrationError::RootOrganizationMissing(root));
        }

        let layout = TargetLayout::from_config(&self.config);
        let groups: Vec<SubGroup> = repos.iter().map(|r| r.sub_group()).collect();
        self.ensure_sub_groups(&layout, &groups).await?;

        let ledger = Arc::new(SuccessLedger::open(&self.config.migrate.ledger)?);
        let stats = Arc::new(MigrationStats::new(repos.len()));
        self.progress.set_total(repos.len() as u64);

        let concurrency = self.config.migrate.effective_concurrency();
        info!(
            repositories = repos.len(),
            concurrency, "Starting repository migration"
        );

        let worker = Arc::new(Worker {
            config: Arc::clone(&self.config),
            target: Arc::clone(&self.target),
            git: self.git.clone(),
            layout,
            ledger,
            stats: Arc::clone(&stats),
            progress: Arc::clone(&self.progress),
        });
        let slots = Arc::new(Semaphore::new(concurrency));
        let mut workers = JoinSet::new();

        for repo in repos {
            self.progress
                .stage(&repo.record().repo_path, RepoStage::Discovered);
            let worker = Arc::clone(&worker);
            let slots = Arc::clone(&slots);
            workers.spawn(async move {
                // Closed only if the pool is dropped, in which case nothing runs.
                let Ok(_permit) = slots.acquire_owned().await else {
                    return;
                };
                worker.process(repo).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Migration worker terminated abnormally");
            }
        }

        let snapshot = stats.log_summary();
        info!(elapsed_secs = started.elapsed().as_secs(), "Repository migration complete");
        Ok(snapshot)
    }

    async fn discover(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
        let platform = match &self.source {
            Some(platform) => Arc::clone(platform),
            None => source::connect(&self.config)?,
        };
        info!(platform = %platform.kind(), "Discovering source repositories");
        let listed = platform.list_all().await?;
        let selection = filter::select(listed, &self.config);
        Ok(selection.repos)
    }

    /// Create missing sub-organizations one at a time, parents first, before
    /// any worker starts.
    async fn ensure_sub_groups(&self, layout: &TargetLayout, groups: &[SubGroup]) -> Result<()> {
        let mut required = layout.required_sub_groups(groups, &Default::default());
        if required.is_empty() {
            return Ok(());
        }
        let existing = self.target.list_sub_groups().await?;
        required = layout.required_sub_groups(groups, &existing);

        for group in &required {
            let path = layout.full_path(&group.name);
            self.target
                .create_sub_group(
                    &path,
                    group.description.as_deref().unwrap_or_default(),
                    group.display_label.as_deref().unwrap_or_default(),
                )
                .await?;
        }
        info!(count = required.len(), "Sub-organizations ready");
        Ok(())
    }
}

/// State shared by every worker task.
struct Worker {
    config: Arc<MigrateConfig>,
    target: Arc<dyn TargetPlatform>,
    git: GitAdapter,
    layout: TargetLayout,
    ledger: Arc<SuccessLedger>,
    stats: Arc<MigrationStats>,
    progress: Arc<MigrationProgress>,
}

/// Scratch locations of one repository below the work directory.
struct RepoDirs {
    mirror: PathBuf,
    rebase: PathBuf,
    releases: PathBuf,
}

impl RepoDirs {
    fn new(work_dir: &Path, repo_path: &str) -> Self {
        Self {
            mirror: work_dir.join(format!("{repo_path}.git")),
            rebase: work_dir.join(format!("{repo_path}.rebase")),
            releases: work_dir.join(format!("{repo_path}.releases")),
        }
    }

    async fn remove(&self) {
        for dir in [&self.mirror, &self.rebase, &self.releases] {
            remove_dir_quietly(dir).await;
        }
    }
}

impl Worker {
    async fn process(&self, repo: Arc<dyn SourceRepository>) {
        let path = repo.record().repo_path.clone();
        let dirs = RepoDirs::new(&self.config.migrate.work_dir, &path);
        let started = Instant::now();

        match self.migrate_repo(repo.as_ref(), &dirs).await {
            Ok(RepoOutcome::Migrated) => {
                self.stats.record_success();
                self.progress.stage(&path, RepoStage::Recorded);
                info!(repo = %path, elapsed_secs = started.elapsed().as_secs(), "Repository migrated");
            }
            Ok(RepoOutcome::Skipped(reason)) => {
                self.stats.record_skip();
                self.progress.stage(&path, RepoStage::Skipped(reason));
                info!(repo = %path, reason = %reason, "Repository skipped");
            }
            Err(e) => {
                self.progress.stage(&path, RepoStage::Failed);
                error!(repo = %path, error = %e, "Repository migration failed");
            }
        }
        dirs.remove().await;
    }

    async fn migrate_repo(
        &self,
        repo: &dyn SourceRepository,
        dirs: &RepoDirs,
    ) -> Result<RepoOutcome> {
        let record = repo.record();
        let path = record.repo_path.as_str();
        let options = &self.config.migrate;

        if self.ledger.is_migrated(path) {
            return Ok(RepoOutcome::Skipped(SkipReason::AlreadyMigrated));
        }
        if record.repo_type == RepoType::Svn {
            return Ok(RepoOutcome::Skipped(SkipReason::Unsupported));
        }

        let clone = if options.code {
            self.progress.stage(path, RepoStage::Cloning);
            Some(repo.clone_into(&self.git, &dirs.mirror).await?)
        } else {
            None
        };

        self.progress.stage(path, RepoStage::TargetEnsuring);
        let sub_group = repo.sub_group();
        let target_path = self.layout.repo_path(&sub_group, &record.repo_name);
        let existed = self.target.repo_exists(&target_path).await?;
        if existed && options.skip_exists_repo {
            warn!(repo = %path, target = %target_path, "Target repository exists, skipping");
            return Ok(RepoOutcome::Skipped(SkipReason::TargetExists));
        }
        if !existed {
            self.target
                .create_repo(
                    &self.layout.group_path(&sub_group),
                    &record.repo_name,
                    repo.is_private(),
                    repo.description(),
                )
                .await?;
            info!(repo = %path, target = %target_path, "Created target repository");
        }

        if clone == Some(CloneOutcome::Cloned) {
            let push_url = self.target.push_url(&target_path)?;
            let resync = options.rebase && existed;
            self.push_code(path, &dirs.mirror, &push_url, resync).await?;
            if resync {
                self.progress.stage(path, RepoStage::Rebasing);
                self.resync(&dirs.mirror, &dirs.rebase, &push_url).await?;
            }
        } else if clone == Some(CloneOutcome::Empty) {
            info!(repo = %path, "Empty repository, nothing to push");
        }

        if options.release {
            self.progress.stage(path, RepoStage::ReleaseMigrating);
            ReleaseMigrator::new(self.target.as_ref(), &dirs.releases)
                .migrate(repo, &target_path)
                .await?;
        }

        self.ledger.record_success_blocking(path).await?;
        Ok(RepoOutcome::Migrated)
    }

    async fn push_code(&self, path: &str, mirror: &Path, push_url: &str, resync: bool) -> Result<()> {
        self.progress.stage(path, RepoStage::Pushing);
        let force = self.config.migrate.force_push;
        match self.git.push_with_remediation(mirror, push_url, force).await {
            Ok(_) => {}
            // Diverged branches are reconciled by the rebase stage.
            Err(MigrationError::GitCommand { output, .. })
                if resync && is_non_fast_forward(&output) =>
            {
                warn!(repo = %path, "Target has diverged branches, continuing with rebase");
            }
            Err(e) => return Err(e),
        }

        if self.git.has_lfs_content(mirror).await? {
            self.progress.stage(path, RepoStage::LfsPushing);
            self.git.push_lfs(mirror, push_url).await?;
        } else {
            debug!(repo = %path, "No LFS objects to push");
        }
        Ok(())
    }

    async fn resync(&self, mirror: &Path, checkout: &Path, push_url: &str) -> Result<()> {
        remove_dir_quietly(checkout).await;
        self.git.clone_working(push_url, checkout).await?;
        let branches = self.git.rebase_onto(checkout, mirror).await?;
        self.git.push_rebased_branches(checkout, &branches).await
    }
}

async fn remove_dir_quietly(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(path = %dir.display(), "Removed directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::ScriptedRunner;
    use crate::git::{CommandOutput, RetryPolicy};
    use crate::source::BasicRepository;
    use crate::target::{CreateOutcome, ReleaseOutcome};
    use crate::types::{Attachment, PlatformKind, Release, RepositoryRecord};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    struct StaticSource(Vec<Arc<dyn SourceRepository>>);

    #[async_trait]
    impl SourcePlatform for StaticSource {
        fn kind(&self) -> PlatformKind {
            PlatformKind::GitLab
        }

        async fn list_all(&self) -> Result<Vec<Arc<dyn SourceRepository>>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct FakeTarget {
        root_missing: bool,
        existing_repos: HashSet<String>,
        existing_groups: HashSet<String>,
        created_groups: Mutex<Vec<String>>,
        created_repos: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TargetPlatform for FakeTarget {
        fn root_organization(&self) -> &str {
            "acme"
        }
        async fn root_organization_exists(&self) -> Result<bool> {
            Ok(!self.root_missing)
        }
        async fn list_sub_groups(&self) -> Result<HashSet<String>> {
            Ok(self.existing_groups.clone())
        }
        async fn create_sub_group(&self, path: &str, _: &str, _: &str) -> Result<CreateOutcome> {
            self.created_groups.lock().push(path.to_string());
            Ok(CreateOutcome::Created)
        }
        async fn repo_exists(&self, path: &str) -> Result<bool> {
            Ok(self.existing_repos.contains(path))
        }
        async fn create_repo(&self, group: &str, name: &str, _: bool, _: &str) -> Result<CreateOutcome> {
            self.created_repos.lock().push(format!("{group}/{name}"));
            Ok(CreateOutcome::Created)
        }
        fn push_url(&self, path: &str) -> Result<String> {
            Ok(format!("https://cnb:t@cnb.example/{path}.git"))
        }
        async fn create_release(&self, _: &str, _: &Release) -> Result<ReleaseOutcome> {
            Ok(ReleaseOutcome::Created("1".to_string()))
        }
        async fn upload_attachment(&self, _: &str, _: &Attachment) -> Result<String> {
            Ok(String::new())
        }
        async fn upload_release_asset(&self, _: &str, _: &str, _: &str, _: &Path, _: u64) -> Result<()> {
            Ok(())
        }
    }

    fn repo(path: &str) -> Arc<dyn SourceRepository> {
        Arc::new(BasicRepository::new(
            RepositoryRecord::new(path),
            format!("https://src.example/{path}.git"),
        ))
    }

    fn config(dir: &Path, extra: &str) -> MigrateConfig {
        let mut config = MigrateConfig::from_yaml_str(&format!(
            "source:\n  platform: gitlab\n  url: https://src.example\n  token: s\ntarget:\n  token: t\n  root_organization: acme\nmigrate:\n  concurrency: 2\n{extra}"
        ))
        .unwrap();
        config.migrate.work_dir = dir.join("work");
        config.migrate.ledger = dir.join("successful.log");
        config
    }

    fn migrator(
        config: MigrateConfig,
        repos: Vec<Arc<dyn SourceRepository>>,
        target: Arc<FakeTarget>,
        runner: &Arc<ScriptedRunner>,
    ) -> Migrator {
        let git = GitAdapter::new(runner.clone(), GitOptions::from(&config.migrate))
            .with_retry(RetryPolicy::none());
        Migrator::with_parts(config, Arc::new(StaticSource(repos)), target, git)
    }

    #[tokio::test]
    async fn test_missing_root_organization_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(FakeTarget {
            root_missing: true,
            ..Default::default()
        });
        let runner = Arc::new(ScriptedRunner::new());
        let result = migrator(config(dir.path(), ""), vec![repo("g/a")], target, &runner)
            .run()
            .await;

        assert!(matches!(result, Err(MigrationError::RootOrganizationMissing(root)) if root == "acme"));
        assert!(runner.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sub_groups_created_before_repositories() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(FakeTarget {
            existing_groups: HashSet::from(["solo".to_string()]),
            ..Default::default()
        });
        let runner = Arc::new(ScriptedRunner::new());
        let repos = vec![repo("team/web/site"), repo("team/api"), repo("solo/x")];
        let stats = migrator(config(dir.path(), ""), repos, target.clone(), &runner)
            .run()
            .await
            .unwrap();

        assert_eq!(
            *target.created_groups.lock(),
            vec!["acme/team", "acme/team/web"]
        );
        assert_eq!(stats.succeeded, 3);
        let mut created = target.created_repos.lock().clone();
        created.sort();
        assert_eq!(created, vec!["acme/solo/x", "acme/team/api", "acme/team/web/site"]);
    }

    #[tokio::test]
    async fn test_flat_mapping_creates_no_sub_groups() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(FakeTarget::default());
        let runner = Arc::new(ScriptedRunner::new());
        migrator(
            config(dir.path(), "  organization_mapping_level: 2\n"),
            vec![repo("team/api")],
            target.clone(),
            &runner,
        )
        .run()
        .await
        .unwrap();

        assert!(target.created_groups.lock().is_empty());
        assert_eq!(*target.created_repos.lock(), vec!["acme/api"]);
    }

    #[tokio::test]
    async fn test_svn_and_existing_targets_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(FakeTarget {
            existing_repos: HashSet::from(["acme/g/old".to_string()]),
            ..Default::default()
        });
        let runner = Arc::new(ScriptedRunner::new());
        let svn: Arc<dyn SourceRepository> = Arc::new(BasicRepository::new(
            RepositoryRecord::new("g/legacy").with_type(RepoType::Svn),
            String::new(),
        ));
        let stats = migrator(
            config(dir.path(), ""),
            vec![svn, repo("g/old"), repo("g/new")],
            target,
            &runner,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(runner.count("g/legacy"), 0);
        assert_eq!(runner.count("push"), 1);
    }

    #[tokio::test]
    async fn test_failure_is_contained_to_one_repository() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on("g/broken.git", vec![CommandOutput::failed("fatal: repository not found")]);
        let stats = migrator(
            config(dir.path(), ""),
            vec![repo("g/broken"), repo("g/fine")],
            Arc::new(FakeTarget::default()),
            &runner,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        let ledger = std::fs::read_to_string(dir.path().join("successful.log")).unwrap();
        assert!(ledger.contains("g/fine"));
        assert!(!ledger.contains("g/broken"));
    }

    #[tokio::test]
    async fn test_code_disabled_only_ensures_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(FakeTarget::default());
        let runner = Arc::new(ScriptedRunner::new());
        let stats = migrator(
            config(dir.path(), "  code: false\n"),
            vec![repo("g/a")],
            target.clone(),
            &runner,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(stats.succeeded, 1);
        assert!(runner.calls.lock().is_empty());
        assert_eq!(*target.created_repos.lock(), vec!["acme/g/a"]);
    }

    #[tokio::test]
    async fn test_empty_repository_skips_push() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.on(
            "clone --mirror",
            vec![CommandOutput::ok("warning: You appear to have cloned an empty repository.")],
        );
        let stats = migrator(
            config(dir.path(), ""),
            vec![repo("g/empty")],
            Arc::new(FakeTarget::default()),
            &runner,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(stats.succeeded, 1);
        assert_eq!(runner.count("push"), 0);
        assert_eq!(runner.count("lfs fetch"), 0);
    }

    #[tokio::test]
    async fn test_work_dir_removed_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), "");
        let work_dir = config.migrate.work_dir.clone();
        std::fs::create_dir_all(work_dir.join("leftover")).unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        migrator(config, vec![repo("g/a")], Arc::new(FakeTarget::default()), &runner)
            .run()
            .await
            .unwrap();

        assert!(!work_dir.exists());
    }
}
