//! Prometheus metrics for job queue monitoring.
//!
//! Recording is a no-op until the host installs a `metrics` recorder.

use crate::connector::HousekeepingReport;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job queue.
pub mod names {
    /// Total jobs persisted by `send`.
    pub const JOBS_ENQUEUED_TOTAL: &str = "spool_jobs_enqueued_total";
    /// Total jobs executed inline by dispatch.
    pub const JOBS_INLINE_TOTAL: &str = "spool_jobs_inline_total";
    /// Total rows claimed by workers.
    pub const JOBS_CLAIMED_TOTAL: &str = "spool_jobs_claimed_total";
    /// Total claim races lost to another worker.
    pub const CLAIM_CONFLICTS_TOTAL: &str = "spool_claim_conflicts_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "spool_jobs_completed_total";
    /// Total failed executions.
    pub const JOBS_FAILED_TOTAL: &str = "spool_jobs_failed_total";

    /// Stalled jobs moved back to waiting.
    pub const JOBS_REQUEUED_TOTAL: &str = "spool_jobs_requeued_total";
    /// Stalled jobs that exhausted their retries.
    pub const JOBS_EXHAUSTED_TOTAL: &str = "spool_jobs_exhausted_total";
    /// Done jobs purged after retention.
    pub const JOBS_PURGED_TOTAL: &str = "spool_jobs_purged_total";
    /// Failed jobs reset by an operator.
    pub const JOBS_RESET_TOTAL: &str = "spool_jobs_reset_total";

    /// Job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "spool_job_duration_seconds";

    /// Consumer loops currently running.
    pub const WORKER_LOOPS_ACTIVE: &str = "spool_worker_loops_active";
    /// Consumer loops that stopped, by reason.
    pub const WORKER_LOOPS_STOPPED_TOTAL: &str = "spool_worker_loops_stopped_total";
    /// Replacement loops spawned in restart mode.
    pub const WORKER_LOOPS_RESTARTED_TOTAL: &str = "spool_worker_loops_restarted_total";
    /// Errors that escaped a fetch.
    pub const WORKER_FETCH_ERRORS_TOTAL: &str = "spool_worker_fetch_errors_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs persisted");
    describe_counter!(
        names::JOBS_INLINE_TOTAL,
        "Total number of jobs executed synchronously on dispatch"
    );
    describe_counter!(names::JOBS_CLAIMED_TOTAL, "Total number of rows claimed");
    describe_counter!(
        names::CLAIM_CONFLICTS_TOTAL,
        "Total number of claim races lost to another worker"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of failed executions");

    describe_counter!(
        names::JOBS_REQUEUED_TOTAL,
        "Stalled jobs moved back to waiting by housekeeping"
    );
    describe_counter!(
        names::JOBS_EXHAUSTED_TOTAL,
        "Stalled jobs marked failed by housekeeping"
    );
    describe_counter!(names::JOBS_PURGED_TOTAL, "Done jobs purged by housekeeping");
    describe_counter!(names::JOBS_RESET_TOTAL, "Failed jobs reset to waiting");

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Job execution duration in seconds"
    );

    describe_gauge!(names::WORKER_LOOPS_ACTIVE, "Number of running consumer loops");
    describe_counter!(
        names::WORKER_LOOPS_STOPPED_TOTAL,
        "Consumer loops that stopped, by reason"
    );
    describe_counter!(
        names::WORKER_LOOPS_RESTARTED_TOTAL,
        "Replacement loops spawned in restart mode"
    );
    describe_counter!(
        names::WORKER_FETCH_ERRORS_TOTAL,
        "Errors that escaped a fetch"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job persisted.
    pub fn job_enqueued(queue: &str, job_name: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);
    }

    /// Record a job executed inline.
    pub fn job_inline(job_name: &str) {
        counter!(names::JOBS_INLINE_TOTAL, "job_name" => job_name.to_string()).increment(1);
    }

    /// Record a successful claim.
    pub fn job_claimed(queue: &str) {
        counter!(names::JOBS_CLAIMED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a lost claim race.
    pub fn claim_conflict(queue: &str) {
        counter!(names::CLAIM_CONFLICTS_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(queue: &str, job_name: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job failed.
    pub fn job_failed(queue: &str, job_name: &str, error_type: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "error_type" => error_type.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_name" => job_name.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a housekeeping sweep.
    pub fn housekeeping(report: &HousekeepingReport) {
        counter!(names::JOBS_REQUEUED_TOTAL).increment(report.requeued);
        counter!(names::JOBS_EXHAUSTED_TOTAL).increment(report.failed);
        counter!(names::JOBS_PURGED_TOTAL).increment(report.purged);
    }

    /// Record an operator reset.
    pub fn jobs_reset(count: u64) {
        counter!(names::JOBS_RESET_TOTAL).increment(count);
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update the running loop count.
    pub fn update_loops(queue: &str, active: usize) {
        gauge!(
            names::WORKER_LOOPS_ACTIVE,
            "queue" => queue.to_string()
        )
        .set(active as f64);
    }

    /// Record a loop exit.
    pub fn loop_stopped(queue: &str, reason: &str) {
        counter!(
            names::WORKER_LOOPS_STOPPED_TOTAL,
            "queue" => queue.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record a replacement loop.
    pub fn loop_restarted(queue: &str) {
        counter!(names::WORKER_LOOPS_RESTARTED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record an error escaping a fetch.
    pub fn fetch_error(queue: &str, error_type: &str) {
        counter!(
            names::WORKER_FETCH_ERRORS_TOTAL,
            "queue" => queue.to_string(),
            "error_type" => error_type.to_string()
        )
        .increment(1);
    }
}
