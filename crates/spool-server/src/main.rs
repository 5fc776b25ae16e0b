//! Standalone Spool worker.
//!
//! Ships a single `log` callable, useful for smoke-testing a deployment with
//! `to_queue(&dispatcher, "log", data)`. Real deployments embed
//! [`spool_server::run`] with their own registry.

use serde_json::Value;
use spool_jobs::{JobContext, JobRegistry};
use tracing::info;

#[tokio::main]
async fn main() {
    let registry = JobRegistry::new();
    registry.register_fn("log", |data: Value, ctx: JobContext| async move {
        info!(queue = %ctx.queue, data = %data, "log job");
        Ok(())
    });

    if let Err(e) = spool_server::run(registry).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
