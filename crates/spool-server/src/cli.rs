//! Command line interface.

use clap::{Args, Parser, Subcommand};
use spool_config::WorkerConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "spool", version, about = "Database-backed job queue")]
pub struct Cli {
    /// Path to a TOML configuration file. Defaults to the `./config` directory.
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Consume jobs from a queue until stopped.
    Work(WorkArgs),
    /// Move every failed job back to waiting.
    Retry,
    /// Run a single housekeeping sweep.
    Housekeep,
    /// Apply the bundled database migrations.
    Migrate,
}

#[derive(Args, Debug, Default, Clone)]
pub struct WorkArgs {
    /// Queue to consume. Falls back to `queue.default_queue`.
    #[clap(long)]
    pub queue: Option<String>,

    /// Number of concurrent worker loops.
    #[clap(long)]
    pub workers: Option<usize>,

    /// Replace loops that stop on a time, memory or batch limit.
    #[clap(long)]
    pub restart: bool,

    /// Run one loop in the main task instead of spawning.
    #[clap(long)]
    pub inline: bool,
}

impl WorkArgs {
    /// Overlays the flags on the configured worker section.
    pub fn apply(&self, config: &mut WorkerConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        config.restart |= self.restart;
        config.inline |= self.inline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_work() {
        let cli = Cli::try_parse_from([
            "spool", "work", "--queue", "mail", "--workers", "3", "--restart",
        ])
        .unwrap();

        let Command::Work(args) = cli.command else {
            panic!("expected work command");
        };
        assert_eq!(args.queue.as_deref(), Some("mail"));
        assert_eq!(args.workers, Some(3));
        assert!(args.restart);
        assert!(!args.inline);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["spool", "retry", "--config", "/etc/spool.toml"]).unwrap();
        assert!(matches!(cli.command, Command::Retry));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/spool.toml")));
    }

    #[test]
    fn test_missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["spool"]).is_err());
    }

    #[test]
    fn test_apply_keeps_configured_values() {
        let mut config = WorkerConfig {
            workers: 2,
            restart: true,
            ..WorkerConfig::default()
        };
        WorkArgs::default().apply(&mut config);
        assert_eq!(config.workers, 2);
        assert!(config.restart);

        WorkArgs {
            workers: Some(8),
            inline: true,
            ..WorkArgs::default()
        }
        .apply(&mut config);
        assert_eq!(config.workers, 8);
        assert!(config.inline);
    }
}
