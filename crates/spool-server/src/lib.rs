//! # Spool Server
//!
//! Operator entry point for the Spool job queue. Applications register
//! their jobs and hand the registry to [`run`]:
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = JobRegistry::new();
//!     registry.register::<SendInvoice>();
//!     spool_server::run(registry).await
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod signal;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use spool_config::ConfigLoader;
use spool_jobs::{register_metrics, JobRegistry};
use tracing::info;

/// Parses the command line, loads configuration and runs the command.
pub async fn run(registry: JobRegistry) -> Result<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::from_file(path)?,
        None => ConfigLoader::from_default_location()?,
    };
    let config = loader.get().await;

    spool_core::init_tracing(&config.logging)?;
    register_metrics();

    info!("Spool {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);
    info!("Queue driver: {}", config.queue.driver);

    match cli.command {
        Command::Work(args) => {
            commands::work(&config, &args, registry).await?;
        }
        Command::Retry => {
            let count = commands::retry(&config).await?;
            println!("{} failed job(s) queued for retry", count);
        }
        Command::Housekeep => {
            let report = commands::housekeep(&config).await?;
            println!(
                "requeued: {}, failed: {}, purged: {}",
                report.requeued, report.failed, report.purged
            );
        }
        Command::Migrate => {
            commands::migrate(&config).await?;
            println!("Migrations applied");
        }
    }

    Ok(())
}
