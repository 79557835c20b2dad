//! # Ferry Migration Engine
//!
//! This crate moves git repositories, their LFS objects and their releases
//! from hosted git platforms to a CNB-style target platform.
//!
//! ## Features
//!
//! - **Ten source platforms**: CODING, GitLab, GitHub, Gitee, Gitea, Gongfeng,
//!   Codeup, another CNB instance, plain git servers and local bare repositories
//! - **Bounded parallelism**: a fixed pool of workers, one repository each
//! - **Resumable runs**: an append-only success ledger skips finished repositories
//! - **Retrying git adapter**: backoff on transient failures, LFS remediation
//!   for pushes rejected by the target size limit, optional rebase resync
//! - **Release migration**: body attachments, releases and release assets
//!
//! ## Example
//!
//! ```rust,ignore
//! use ferry_migrate::{MigrateConfig, Migrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MigrateConfig::load("config.yaml")?;
//!     let migrator = Migrator::new(config)?;
//!
//!     let stats = migrator
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!
//!     println!("{} migrated, {} failed", stats.succeeded, stats.failed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod filter;
pub mod git;
pub mod ledger;
pub mod markdown;
pub mod orchestrator;
pub mod progress;
pub mod release;
pub mod source;
pub mod stats;
pub mod target;
pub mod types;

// Re-export main types
pub use config::{MigrateConfig, MigrateOptions, MigrateType, OrganizationMapping};
pub use error::{MigrationError, Result};
pub use git::{CommandOutput, CommandRunner, GitAdapter, GitOptions, GitProcess, RetryPolicy};
pub use ledger::SuccessLedger;
pub use orchestrator::Migrator;
pub use progress::{
    ConsoleProgressReporter, MigrationProgress, ProgressCallback, ProgressUpdate, RepoStage,
    SkipReason,
};
pub use release::{ReleaseMigrator, ReleaseReport};
pub use source::{SourcePlatform, SourceRepository};
pub use stats::{MigrationStats, StatsSnapshot};
pub use target::{CnbClient, TargetLayout, TargetPlatform};
pub use types::*;

/// Version of the migration engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
