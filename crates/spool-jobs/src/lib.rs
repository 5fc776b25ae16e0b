//! Spool Jobs - persistent database-backed job queue
//!
//! Jobs are persisted as rows in a shared table and claimed by worker loops
//! with row-level locking, so many processes can consume the same queue
//! without running a job twice.
//!
//! - Typed jobs serialized into a named envelope
//! - Optional per-field payload encryption (AES or RSA)
//! - Priority by weight, then FIFO by id, per named queue
//! - Delayed availability
//! - Housekeeping of stalled executions with bounded retries
//! - Self-limiting worker loops (time, memory, batch) with restart
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Producer                                                   │
//! │     │  job.dispatch(&dispatcher).delay(..).await            │
//! │     ▼                                                       │
//! │  ┌──────────────┐   encode    ┌────────────────────────┐    │
//! │  │ JobEnvelope  │ ──────────► │ Connector (db/memory)  │    │
//! │  └──────────────┘ (encrypt)   │  waiting → executing   │    │
//! │                               │  → done | failed       │    │
//! │                               └───────────┬────────────┘    │
//! │                                 claim     │  housekeeping   │
//! │                                           ▼                 │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ Supervisor                                           │   │
//! │  │  ┌────────┐ ┌────────┐ ┌────────┐                    │   │
//! │  │  │ loop 0 │ │ loop 1 │ │ loop N │ ──► JobRegistry    │   │
//! │  │  └────────┘ └────────┘ └────────┘      (by name)     │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use spool_jobs::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct SendEmailJob {
//!     to: String,
//!     subject: String,
//! }
//!
//! #[async_trait::async_trait]
//! impl Job for SendEmailJob {
//!     const NAME: &'static str = "send_email";
//!     const QUEUE: Option<&'static str> = Some("emails");
//!
//!     async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
//!         // Send email logic
//!         Ok(())
//!     }
//! }
//!
//! let connector = Queue::new(&config).connect().await?;
//! let dispatcher = Dispatcher::new(connector.clone());
//!
//! SendEmailJob {
//!     to: "user@example.com".to_string(),
//!     subject: "Welcome!".to_string(),
//! }
//! .dispatch(&dispatcher)
//! .weight(10)
//! .await?;
//!
//! let registry = JobRegistry::new();
//! registry.register::<SendEmailJob>();
//!
//! let supervisor = Supervisor::new(
//!     connector,
//!     Arc::new(registry),
//!     SupervisorConfig::from_config(&config.worker, "emails")?,
//! );
//! supervisor.run().await;
//! ```

pub mod connector;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod worker;

pub use connector::{
    connect_pool, run_migrations, Connector, ConnectorSettings, DatabaseConnector, FetchOutcome,
    HousekeepingReport, JobEvents, LoggingEvents, MemoryConnector,
};
pub use dispatch::{to_queue, DispatchOutcome, Dispatchable, Dispatcher, PendingDispatch};
pub use envelope::{Attributes, DelayUnit, JobEnvelope, PayloadCodec};
pub use error::{JobError, JobResult};
pub use job::{Job, JobContext, JobId, JobRecord, JobStatus};
pub use metrics::{register_metrics, JobMetrics, WorkerMetrics};
pub use queue::Queue;
pub use registry::{ClosureJob, JobHandler, JobRegistry};
pub use worker::{
    ExecutionMode, LoopExit, ShutdownHandle, StopReason, Supervisor, SupervisorConfig,
    SupervisorReport,
};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::connector::Connector;
    pub use crate::dispatch::{Dispatchable, Dispatcher};
    pub use crate::envelope::DelayUnit;
    pub use crate::job::{Job, JobStatus};
    pub use crate::queue::Queue;
    pub use crate::registry::{JobHandler, JobRegistry};
    pub use crate::worker::{Supervisor, SupervisorConfig};
    pub use crate::{JobContext, JobError, JobId, JobResult};
}
