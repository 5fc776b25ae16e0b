//! Job trait and persisted record definitions.

use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Identifier of a persisted job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Creates a job ID from a raw row id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw row id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Job status, stored as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Claimable once `available_at` has passed.
    #[default]
    Waiting,
    /// Claimed by exactly one worker.
    Executing,
    /// Completed successfully.
    Done,
    /// Retries exhausted; waits for an operator reset.
    Failed,
}

impl JobStatus {
    /// Returns the stored code.
    #[must_use]
    pub const fn code(self) -> i8 {
        match self {
            JobStatus::Waiting => 10,
            JobStatus::Executing => 20,
            JobStatus::Done => 30,
            JobStatus::Failed => 40,
        }
    }

    /// Parses a stored code.
    pub fn from_code(code: i8) -> JobResult<Self> {
        match code {
            10 => Ok(JobStatus::Waiting),
            20 => Ok(JobStatus::Executing),
            30 => Ok(JobStatus::Done),
            40 => Ok(JobStatus::Failed),
            other => Err(JobError::Internal(format!("Unknown job status code: {}", other))),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Executing => write!(f, "executing"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A persisted job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Row id.
    pub id: JobId,
    /// Queue name.
    pub queue: String,
    /// Current status.
    pub status: JobStatus,
    /// Priority; lower is served first.
    pub weight: i32,
    /// Housekeeping transitions so far.
    pub attempts: u32,
    /// Earliest claim time.
    pub available_at: DateTime<Utc>,
    /// Encoded envelope.
    pub payload: String,
    /// Last recorded failure.
    pub error: Option<String>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Returns true if a worker may claim the row at `now`.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Waiting && self.available_at <= now
    }
}

/// Execution context handed to a running job.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Row id; `None` when the job runs inline without being persisted.
    pub job_id: Option<JobId>,
    /// Queue the job was claimed from.
    pub queue: String,
    /// Housekeeping retries the row has been through.
    pub attempts: u32,
}

impl JobContext {
    /// Context for a job executed synchronously in the caller.
    #[must_use]
    pub fn inline(queue: impl Into<String>) -> Self {
        Self {
            job_id: None,
            queue: queue.into(),
            attempts: 0,
        }
    }

    /// Context for a claimed record.
    #[must_use]
    pub fn for_record(record: &JobRecord) -> Self {
        Self {
            job_id: Some(record.id),
            queue: record.queue.clone(),
            attempts: record.attempts,
        }
    }

    /// Returns true if the job runs from the queue rather than inline.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.job_id.is_some()
    }
}

/// Trait for defining jobs.
///
/// A job's serialized fields become the envelope's attributes; everything
/// needed to run it must therefore be serializable. The field names
/// `encrypter`, `delay_unit`, `delay`, `queue` and `queued` are reserved for
/// bookkeeping and rejected at dispatch.
///
/// # Example
///
/// ```rust,ignore
/// use spool_jobs::{Job, JobContext, JobError};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct SendInvoice {
///     customer_email: String,
///     lines: Vec<InvoiceLine>,
/// }
///
/// #[async_trait::async_trait]
/// impl Job for SendInvoice {
///     const NAME: &'static str = "send_invoice";
///     const QUEUE: Option<&'static str> = Some("billing");
///     const ENCRYPTED: bool = true;
///
///     async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
///         mailer::send(&self.customer_email, &self.lines)
///             .await
///             .map_err(|e| JobError::failed(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name for this job type.
    const NAME: &'static str;

    /// Queue for this job type; `None` falls back to the configured default.
    const QUEUE: Option<&'static str> = None;

    /// Persist and run on a worker (`true`) or run inline on dispatch.
    const QUEUED: bool = true;

    /// Encrypt attributes before they are persisted.
    const ENCRYPTED: bool = false;

    /// Execute the job.
    async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;

    /// Called when a queued execution fails.
    fn on_failure(&self, _record: &JobRecord, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for status in [
            JobStatus::Waiting,
            JobStatus::Executing,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_code(status.code()).unwrap(), status);
        }
        assert_eq!(JobStatus::Failed.code(), 40);
        assert!(JobStatus::from_code(15).is_err());
    }

    #[test]
    fn test_is_claimable() {
        let now = Utc::now();
        let mut record = JobRecord {
            id: JobId::new(1),
            queue: "default".into(),
            status: JobStatus::Waiting,
            weight: 100,
            attempts: 0,
            available_at: now,
            payload: "{}".into(),
            error: None,
            created_at: now,
            updated_at: now,
        };
        assert!(record.is_claimable(now));

        record.available_at = now + chrono::Duration::seconds(60);
        assert!(!record.is_claimable(now));

        record.available_at = now;
        record.status = JobStatus::Executing;
        assert!(!record.is_claimable(now));
    }

    #[test]
    fn test_job_context() {
        let ctx = JobContext::inline("mail");
        assert!(!ctx.is_queued());
        assert_eq!(ctx.queue, "mail");
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId::from(42).to_string(), "42");
        assert_eq!(serde_json::to_string(&JobId::new(7)).unwrap(), "7");
    }
}
