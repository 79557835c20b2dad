//! CLI command implementations.

use anyhow::{bail, Context, Result};
use ferry_migrate::config::{MAX_CONCURRENCY, TEMPLATE};
use ferry_migrate::{
    CnbClient, ConsoleProgressReporter, GitAdapter, GitOptions, MigrateConfig, MigrationProgress,
    Migrator, TargetPlatform,
};
use std::path::Path;
use tracing::{info, warn};

fn load_config(path: &Path) -> Result<MigrateConfig> {
    MigrateConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

/// Run a migration until it finishes or Ctrl-C is pressed.
pub async fn migrate(config_path: &Path, verbose: u8) -> Result<()> {
    let config = load_config(config_path)?;
    crate::init_tracing(&config.migrate.log_level, verbose, true);

    if config.migrate.concurrency > MAX_CONCURRENCY {
        warn!(
            requested = config.migrate.concurrency,
            max = MAX_CONCURRENCY,
            "Concurrency capped"
        );
    }
    info!(
        platform = %config.source.platform,
        root = %config.target.root_organization,
        "Starting migration"
    );

    let reporter = ConsoleProgressReporter::new();
    let migrator = Migrator::new(config)
        .context("failed to set up the migration")?
        .with_progress(MigrationProgress::with_callback(reporter.callback()));

    let stats = migrator
        .run_until(async {
            // Without a signal handler, run to completion.
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;
    reporter.finish("done");
    let stats = stats?;

    println!();
    println!("Migration Summary");
    println!("=================");
    println!("Total:     {}", stats.total);
    println!("Succeeded: {}", stats.succeeded);
    println!("Skipped:   {}", stats.skipped);
    println!("Failed:    {}", stats.failed);
    if stats.needs_attention() {
        println!();
        println!("Some repositories were skipped or failed, see migrate.log for details.");
    }
    Ok(())
}

/// Write the configuration template.
pub fn init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            output.display()
        );
    }
    std::fs::write(output, TEMPLATE)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Wrote configuration template to {}", output.display());
    Ok(())
}

/// Validate configuration, local git tooling and the target root organization.
pub async fn check(config_path: &Path, verbose: u8) -> Result<()> {
    let config = load_config(config_path)?;
    crate::init_tracing(&config.migrate.log_level, verbose, false);

    println!("Configuration OK:");
    print!(
        "{}",
        serde_yaml::to_string(&config.redacted()).context("failed to render configuration")?
    );

    let git = GitAdapter::system(GitOptions::from(&config.migrate));
    let versions = git
        .check_installation()
        .await
        .context("git and git-lfs must be installed")?;
    println!("Tooling:   {versions}");

    let target = CnbClient::from_config(&config)?;
    if target.root_organization_exists().await? {
        println!("Target:    root organization {} found", target.root_organization());
        Ok(())
    } else {
        bail!(
            "root organization {} does not exist on {}",
            target.root_organization(),
            config.target.url
        )
    }
}
