//! Operator commands.

use crate::cli::WorkArgs;
use crate::signal::shutdown_signal;
use anyhow::{bail, Context, Result};
use spool_config::{AppConfig, QueueDriver};
use spool_jobs::{
    connect_pool, run_migrations, HousekeepingReport, JobRegistry, Queue, Supervisor,
    SupervisorConfig, SupervisorReport,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Runs worker loops until they stop on their own limits or a signal arrives.
pub async fn work(config: &AppConfig, args: &WorkArgs, registry: JobRegistry) -> Result<SupervisorReport> {
    let mut worker = config.worker.clone();
    args.apply(&mut worker);

    let queue = args
        .queue
        .clone()
        .unwrap_or_else(|| config.queue.default_queue.clone());
    let settings = SupervisorConfig::from_config(&worker, queue)?;

    if registry.is_empty() {
        warn!("No jobs registered; every claimed job will fail");
    }

    let connector = Queue::new(config)
        .connect()
        .await
        .context("Failed to open the queue")?;

    let restart = settings.restart;
    let supervisor = Supervisor::new(connector, Arc::new(registry), settings);
    let shutdown = supervisor.shutdown_handle();
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.stop();
        })
    };

    let report = supervisor.run().await;
    signals.abort();

    if report.panicked > 0 {
        bail!("{} worker loop(s) panicked", report.panicked);
    }
    if restart && report.memory_exhausted() && !shutdown.is_stopping() {
        respawn()?;
    }
    Ok(report)
}

/// Replaces this process with a fresh copy of itself, same arguments.
#[cfg(unix)]
fn respawn() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Failed to locate the spool binary")?;
    info!(exe = %exe.display(), "Memory limit reached, restarting worker process");
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(err).context("Failed to restart the worker process")
}

#[cfg(not(unix))]
fn respawn() -> Result<()> {
    warn!("Memory limit reached; restart the worker process to continue");
    Ok(())
}

/// Resets failed jobs to waiting.
pub async fn retry(config: &AppConfig) -> Result<u64> {
    let connector = Queue::new(config).connect().await?;
    let count = connector.reset().await?;
    info!(count, "Failed jobs queued for retry");
    Ok(count)
}

/// Runs one housekeeping sweep.
pub async fn housekeep(config: &AppConfig) -> Result<HousekeepingReport> {
    let connector = Queue::new(config).connect().await?;
    let report = connector.house_keeping().await?;
    info!(
        requeued = report.requeued,
        failed = report.failed,
        purged = report.purged,
        "Housekeeping complete"
    );
    Ok(report)
}

/// Applies the schema migrations to the configured database.
pub async fn migrate(config: &AppConfig) -> Result<()> {
    if config.queue.driver != QueueDriver::Database {
        bail!("migrations only apply to the database driver");
    }
    let pool = connect_pool(&config.database).await?;
    run_migrations(&pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.queue.driver = QueueDriver::Memory;
        config.queue.poll_backoff_ms = 0;
        config.worker.throttle_ms = 0;
        config.worker.max_batch = 3;
        config
    }

    #[tokio::test]
    async fn test_work_stops_at_batch_ceiling() {
        let args = WorkArgs {
            inline: true,
            ..WorkArgs::default()
        };
        let report = work(&memory_config(), &args, JobRegistry::new()).await.unwrap();
        assert_eq!(report.exits.len(), 1);
        assert_eq!(report.iterations(), 3);
    }

    #[tokio::test]
    async fn test_work_rejects_bad_memory_limit() {
        let mut config = memory_config();
        config.worker.memory_limit = Some("12X".to_string());
        let err = work(&config, &WorkArgs::default(), JobRegistry::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown Memory Limit"));
    }

    #[tokio::test]
    async fn test_retry_and_housekeep_on_empty_store() {
        let config = memory_config();
        assert_eq!(retry(&config).await.unwrap(), 0);
        assert_eq!(housekeep(&config).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_migrate_requires_database_driver() {
        assert!(migrate(&memory_config()).await.is_err());
    }
}
