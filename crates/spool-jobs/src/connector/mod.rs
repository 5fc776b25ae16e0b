//! Connectors persist, claim and maintain job records.
//!
//! Every connector shares the same state machine:
//!
//! ```text
//!   send ──► Waiting ──claim──► Executing ──ok──► Done ──retention──► purged
//!               ▲                   │
//!               │      housekeeping │ (stalled past timeout, attempts + 1)
//!               ├───────────────────┤ attempts <  max_retries
//!               │                   ▼ attempts >= max_retries
//!               └──── reset ─────  Failed
//! ```
//!
//! A worker never moves its own failed job out of `Executing`; it records
//! the error and leaves the row to housekeeping.

mod database;
mod memory;

pub use database::{connect_pool, run_migrations, DatabaseConnector};
pub use memory::MemoryConnector;

use crate::envelope::{JobEnvelope, PayloadCodec};
use crate::error::{JobError, JobResult};
use crate::job::{JobContext, JobId, JobRecord};
use crate::metrics::JobMetrics;
use crate::registry::JobHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spool_config::QueueConfig;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of one claim-and-execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A job was claimed and ran successfully.
    Executed(JobId),
    /// Nothing was claimable.
    Empty,
    /// Another worker claimed the candidate row first.
    Conflict,
}

/// Rows touched by one housekeeping sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Stalled rows moved back to waiting.
    pub requeued: u64,
    /// Stalled rows that exhausted their retries.
    pub failed: u64,
    /// Done rows past retention that were deleted.
    pub purged: u64,
}

impl HousekeepingReport {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.requeued + self.failed + self.purged
    }
}

/// Static connector settings.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// Table holding job records.
    pub table: String,
    /// Queue used when neither caller nor envelope names one.
    pub default_queue: String,
    /// Weight of new jobs without an override.
    pub default_weight: i32,
    /// Executing rows older than this are considered stalled.
    pub timeout: Duration,
    /// Housekeeping retries before a stalled row fails.
    pub max_retries: u32,
    /// Done rows older than this are purged; `None` keeps them.
    pub retention: Option<Duration>,
    /// Pause after an empty poll or a lost claim race.
    pub poll_backoff: Duration,
}

impl ConnectorSettings {
    /// Picks the target queue: explicit argument, then envelope, then default.
    #[must_use]
    pub fn resolve_queue(&self, explicit: Option<&str>, envelope: Option<&str>) -> String {
        explicit
            .filter(|q| !q.is_empty())
            .or(envelope.filter(|q| !q.is_empty()))
            .unwrap_or(&self.default_queue)
            .to_string()
    }
}

impl From<&QueueConfig> for ConnectorSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            table: config.table.clone(),
            default_queue: config.default_queue.clone(),
            default_weight: config.default_weight,
            timeout: config.timeout(),
            max_retries: config.max_retries,
            retention: config.retention(),
            poll_backoff: config.poll_backoff(),
        }
    }
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

/// Hooks fired after a claimed job finishes.
#[cfg_attr(test, mockall::automock)]
pub trait JobEvents: Send + Sync {
    /// The job ran successfully; receives the decoded envelope.
    fn on_success(&self, envelope: &JobEnvelope);

    /// The job failed; receives the decoded envelope, the row with the
    /// recorded error, and the failure message.
    fn on_failure(&self, envelope: &JobEnvelope, record: &JobRecord, message: &str);
}

/// Default hooks: log and move on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEvents;

impl JobEvents for LoggingEvents {
    fn on_success(&self, envelope: &JobEnvelope) {
        debug!(job = %envelope.job, "queue:successful");
    }

    fn on_failure(&self, envelope: &JobEnvelope, record: &JobRecord, message: &str) {
        warn!(
            job = %envelope.job,
            job_id = %record.id,
            queue = %record.queue,
            attempts = record.attempts,
            error = %message,
            "queue:failure"
        );
    }
}

/// A job store.
///
/// `fetch` and `receive` are built on [`Connector::poll`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector settings.
    fn settings(&self) -> &ConnectorSettings;

    /// Persists a new waiting job and returns its id.
    async fn send(&self, envelope: &JobEnvelope, queue: Option<&str>) -> JobResult<JobId>;

    /// Claims at most one job from `queue` and runs it through `handler`.
    ///
    /// A failed execution is recorded on the row, reported to the hooks and
    /// returned as [`JobError::ExecutionFailed`].
    async fn poll(&self, handler: &dyn JobHandler, queue: &str) -> JobResult<FetchOutcome>;

    /// Resets every failed job to waiting; returns the number of rows.
    async fn reset(&self) -> JobResult<u64>;

    /// Reclaims stalled executions and purges old done rows.
    async fn house_keeping(&self) -> JobResult<HousekeepingReport>;

    /// Runs one poll cycle. Returns `true` whether or not a job was found;
    /// an empty poll runs housekeeping, and empty or contested polls back off.
    async fn fetch(&self, handler: &dyn JobHandler, queue: &str) -> JobResult<bool> {
        match self.poll(handler, queue).await? {
            FetchOutcome::Executed(_) => {}
            FetchOutcome::Empty => {
                self.house_keeping().await?;
                tokio::time::sleep(self.settings().poll_backoff).await;
            }
            FetchOutcome::Conflict => {
                tokio::time::sleep(self.settings().poll_backoff).await;
            }
        }
        Ok(true)
    }

    /// Blocks until one job has executed.
    async fn receive(&self, handler: &dyn JobHandler, queue: &str) -> JobResult<bool> {
        loop {
            match self.poll(handler, queue).await? {
                FetchOutcome::Executed(_) => return Ok(true),
                FetchOutcome::Empty => {
                    self.house_keeping().await?;
                }
                FetchOutcome::Conflict => {}
            }
            tokio::time::sleep(self.settings().poll_backoff).await;
        }
    }
}

/// Row updates needed after a claim.
#[async_trait]
pub(crate) trait ClaimStore: Send + Sync {
    async fn mark_done(&self, id: JobId) -> JobResult<()>;

    async fn record_error(&self, id: JobId, error: &str) -> JobResult<()>;
}

/// Decodes and runs a claimed record, then settles it.
pub(crate) async fn execute_claimed(
    store: &dyn ClaimStore,
    codec: &PayloadCodec,
    events: &dyn JobEvents,
    handler: &dyn JobHandler,
    mut record: JobRecord,
) -> JobResult<FetchOutcome> {
    let started = Instant::now();
    JobMetrics::job_claimed(&record.queue);

    let envelope = match codec.decode(&record.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!(job_id = %record.id, error = %e, "Could not decode job payload");
            store.record_error(record.id, &format_error(&e)).await?;
            JobMetrics::job_failed(&record.queue, "unknown", e.kind(), started.elapsed());
            return Err(e);
        }
    };

    let ctx = JobContext::for_record(&record);
    debug!(job_id = %record.id, job = %envelope.job, queue = %record.queue, "Processing job");

    match handler.handle(&envelope, &ctx).await {
        Ok(()) => {
            store.mark_done(record.id).await?;
            JobMetrics::job_completed(&record.queue, &envelope.job, started.elapsed());
            info!(job_id = %record.id, job = %envelope.job, "Job completed");
            events.on_success(&envelope);
            Ok(FetchOutcome::Executed(record.id))
        }
        Err(e) => {
            let message = e.to_string();
            let text = format_error(&e);
            if let Err(store_err) = store.record_error(record.id, &text).await {
                error!(job_id = %record.id, error = %store_err, "Failed to record job error");
            }
            record.error = Some(text);

            JobMetrics::job_failed(&record.queue, &envelope.job, e.kind(), started.elapsed());
            warn!(job_id = %record.id, job = %envelope.job, error = %message, "Job failed");

            handler.failed(&envelope, &record, &message);
            events.on_failure(&envelope, &record, &message);

            Err(match e {
                JobError::ExecutionFailed(_) => e,
                other => JobError::ExecutionFailed(other.to_string()),
            })
        }
    }
}

/// Formats the error text stored on a failed row.
pub(crate) fn format_error(err: &JobError) -> String {
    format!(
        "error: {}\n{} - {}\n\n{}\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        err.kind(),
        err,
        "-".repeat(54)
    )
}

/// `at + duration`, failing when the result leaves chrono's range.
pub(crate) fn time_after(at: DateTime<Utc>, duration: Duration) -> JobResult<DateTime<Utc>> {
    to_chrono(duration).and_then(|d| {
        at.checked_add_signed(d)
            .ok_or_else(|| JobError::Payload(format!("time out of range: {} + {:?}", at, duration)))
    })
}

/// `at - duration`, failing when the result leaves chrono's range.
pub(crate) fn time_before(at: DateTime<Utc>, duration: Duration) -> JobResult<DateTime<Utc>> {
    to_chrono(duration).and_then(|d| {
        at.checked_sub_signed(d)
            .ok_or_else(|| JobError::Payload(format!("time out of range: {} - {:?}", at, duration)))
    })
}

fn to_chrono(duration: Duration) -> JobResult<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|_| JobError::Payload(format!("duration out of range: {:?}", duration)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_queue() {
        let settings = ConnectorSettings::default();
        assert_eq!(settings.resolve_queue(Some("mail"), Some("billing")), "mail");
        assert_eq!(settings.resolve_queue(None, Some("billing")), "billing");
        assert_eq!(settings.resolve_queue(Some(""), None), "default");
        assert_eq!(settings.resolve_queue(None, None), "default");
    }

    #[test]
    fn test_settings_from_config() {
        let config = QueueConfig {
            delete_done_after_secs: None,
            max_retries: 5,
            ..QueueConfig::default()
        };
        let settings = ConnectorSettings::from(&config);
        assert_eq!(settings.max_retries, 5);
        assert!(settings.retention.is_none());
        assert_eq!(settings.default_weight, 100);
    }

    #[test]
    fn test_format_error() {
        let text = format_error(&JobError::failed("smtp down"));
        assert!(text.starts_with("error: "));
        assert!(text.contains("EXECUTION_FAILED - Job execution failed: smtp down"));
    }

    #[test]
    fn test_time_shifts() {
        let at = Utc::now();
        assert_eq!(
            time_after(at, Duration::from_secs(90)).unwrap(),
            at + chrono::Duration::seconds(90)
        );
        assert_eq!(
            time_before(at, Duration::from_secs(90)).unwrap(),
            at - chrono::Duration::seconds(90)
        );
        assert!(time_after(at, Duration::from_secs(u64::MAX)).is_err());
    }

    #[test]
    fn test_time_shift_past_calendar_range_is_an_error() {
        // fits in a chrono::Duration, but not in the calendar
        let far = Duration::from_secs(1_000_000_000 * 86_400);
        assert!(chrono::Duration::from_std(far).is_ok());

        let err = time_after(Utc::now(), far).unwrap_err();
        assert!(matches!(err, JobError::Payload(_)));
        assert!(time_before(Utc::now(), far).is_err());
    }
}
