//! Ferry CLI - migrate repositories to a CNB-style platform.

use clap::{Parser, Subcommand};
use ferry_migrate::MigrationError;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Exit status after an interrupt, as a shell reports SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

/// Log file appended to in the current directory.
const LOG_FILE: &str = "migrate.log";

/// Ferry - repository migration to CNB
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate every selected repository
    Migrate {
        /// Configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Write a commented configuration template
    Init {
        /// Output path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the configuration and the local toolchain
    Check {
        /// Configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Migrate { config } => commands::migrate(&config, cli.verbose).await,
        Commands::Init { output, force } => {
            init_tracing("info", cli.verbose, false);
            commands::init(&output, force)
        }
        Commands::Check { config } => commands::check(&config, cli.verbose).await,
        Commands::Version => {
            println!("ferry {}", ferry_migrate::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        if matches!(
            e.downcast_ref::<MigrationError>(),
            Some(MigrationError::Interrupted)
        ) {
            eprintln!("Interrupted, working directory removed");
            std::process::exit(EXIT_INTERRUPTED);
        }
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Install the global subscriber: stdout, plus an ANSI-free copy in
/// [`LOG_FILE`] when `to_file` is set.
///
/// `RUST_LOG` wins over the configured level; each `-v` raises it one step.
pub(crate) fn init_tracing(configured: &str, verbose: u8, to_file: bool) {
    let level = match verbose {
        0 => configured,
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("ferry_migrate={level},ferry={level}").into());

    let file_layer = if to_file {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(LOG_FILE)
        {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Arc::new(file)),
            ),
            Err(e) => {
                eprintln!("Warning: cannot open {LOG_FILE}: {e}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
}
