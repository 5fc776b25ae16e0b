//! Fluent job dispatch.
//!
//! ```rust,ignore
//! use spool_jobs::prelude::*;
//!
//! let dispatcher = Dispatcher::new(connector);
//! SendInvoice { customer_email, lines }
//!     .dispatch(&dispatcher)
//!     .on_queue("billing")
//!     .delay(5, DelayUnit::Minutes)
//!     .await?;
//! ```
//!
//! Nothing is persisted until the builder is awaited (or
//! [`PendingDispatch::ensure_dispatched`] is called), so every configuration
//! call lands in the stored envelope. Routing happens exactly once.

use crate::connector::Connector;
use crate::envelope::{DelayUnit, JobEnvelope};
use crate::error::JobResult;
use crate::job::{Job, JobContext, JobId};
use crate::metrics::JobMetrics;
use crate::registry::ClosureJob;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::future::IntoFuture;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hands dispatched jobs to a connector.
#[derive(Clone)]
pub struct Dispatcher {
    connector: Arc<dyn Connector>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Returns the underlying connector.
    #[must_use]
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }
}

/// What a dispatch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Persisted as a waiting row.
    Queued(JobId),
    /// Ran inline in the caller.
    Executed,
    /// The routing decision had already been made; nothing happened.
    AlreadyDispatched,
}

/// Adds `dispatch` to every job type.
pub trait Dispatchable: Job + Sized {
    /// Starts configuring a dispatch of this job.
    fn dispatch(self, dispatcher: &Dispatcher) -> PendingDispatch<'_, Self> {
        PendingDispatch::new(dispatcher, self)
    }
}

impl<J: Job> Dispatchable for J {}

/// A job being configured for dispatch.
pub struct PendingDispatch<'a, J: Job> {
    dispatcher: &'a Dispatcher,
    job: J,
    queue: Option<String>,
    delay: u64,
    delay_unit: DelayUnit,
    weight: Option<i32>,
    on_failure: Option<String>,
    dispatched: bool,
}

impl<'a, J: Job> PendingDispatch<'a, J> {
    fn new(dispatcher: &'a Dispatcher, job: J) -> Self {
        Self {
            dispatcher,
            job,
            queue: J::QUEUE.map(str::to_string),
            delay: 0,
            delay_unit: DelayUnit::default(),
            weight: None,
            on_failure: None,
            dispatched: false,
        }
    }

    /// Makes the job claimable only after `amount` of `unit`.
    #[must_use]
    pub fn delay(mut self, amount: u64, unit: DelayUnit) -> Self {
        if self.accepts_config("delay") {
            self.delay = amount;
            self.delay_unit = unit;
        }
        self
    }

    /// Targets a specific queue.
    #[must_use]
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        if self.accepts_config("on_queue") {
            self.queue = Some(queue.into());
        }
        self
    }

    /// Overrides the priority; lower weights are claimed first.
    #[must_use]
    pub fn weight(mut self, weight: i32) -> Self {
        if self.accepts_config("weight") {
            self.weight = Some(weight);
        }
        self
    }

    /// Names a failure callback registered with
    /// [`JobRegistry::register_failure_fn`](crate::JobRegistry::register_failure_fn).
    #[must_use]
    pub fn on_failure(mut self, callback: impl Into<String>) -> Self {
        if self.accepts_config("on_failure") {
            self.on_failure = Some(callback.into());
        }
        self
    }

    /// Returns true once the routing decision has been made.
    #[must_use]
    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    /// Builds the envelope that would be persisted.
    pub fn envelope(&self) -> JobResult<JobEnvelope> {
        let mut envelope = JobEnvelope::for_job(&self.job)?;
        envelope.queue = self.queue.clone();
        envelope.delay = self.delay;
        envelope.delay_unit = self.delay_unit;
        envelope.weight = self.weight;
        envelope.on_failure = self.on_failure.clone();
        Ok(envelope)
    }

    /// Routes the job: persist it when `J::QUEUED`, otherwise run it now.
    ///
    /// Once the job is persisted or has started running inline, later calls
    /// return [`DispatchOutcome::AlreadyDispatched`]. A failed send leaves
    /// the builder undispatched so it can be corrected and retried.
    pub async fn ensure_dispatched(&mut self) -> JobResult<DispatchOutcome> {
        if self.dispatched {
            return Ok(DispatchOutcome::AlreadyDispatched);
        }

        let connector = self.dispatcher.connector.clone();
        if J::QUEUED {
            let envelope = self.envelope()?;
            let id = connector.send(&envelope, None).await?;
            self.dispatched = true;
            return Ok(DispatchOutcome::Queued(id));
        }

        // an inline run has side effects even when it fails
        self.dispatched = true;
        let queue = connector
            .settings()
            .resolve_queue(self.queue.as_deref(), None);
        debug!(job = J::NAME, queue = %queue, "Running job inline");
        JobMetrics::job_inline(J::NAME);
        self.job.run(&JobContext::inline(queue)).await?;
        Ok(DispatchOutcome::Executed)
    }

    fn accepts_config(&self, method: &str) -> bool {
        if self.dispatched {
            warn!(job = J::NAME, method, "Job already dispatched, configuration ignored");
        }
        !self.dispatched
    }
}

impl<'a, J: Job> IntoFuture for PendingDispatch<'a, J> {
    type Output = JobResult<DispatchOutcome>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(mut self) -> Self::IntoFuture {
        async move { self.ensure_dispatched().await }.boxed()
    }
}

impl<J: Job> Drop for PendingDispatch<'_, J> {
    fn drop(&mut self) {
        if !self.dispatched {
            warn!(job = J::NAME, "Job dropped without being dispatched");
        }
    }
}

/// Queues a call to a callable registered with
/// [`JobRegistry::register_fn`](crate::JobRegistry::register_fn).
pub fn to_queue<'a>(
    dispatcher: &'a Dispatcher,
    callable: impl Into<String>,
    data: Value,
) -> PendingDispatch<'a, ClosureJob> {
    ClosureJob::new(callable, data).dispatch(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{ConnectorSettings, MemoryConnector};
    use crate::error::JobError;
    use crate::job::JobStatus;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize)]
    struct Resize {
        image: String,
        width: u32,
    }

    #[async_trait]
    impl Job for Resize {
        const NAME: &'static str = "resize";
        const QUEUE: Option<&'static str> = Some("media");

        async fn run(&self, _ctx: &JobContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    static INLINE_RUNS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping;

    #[async_trait]
    impl Job for Ping {
        const NAME: &'static str = "ping";
        const QUEUED: bool = false;

        async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
            assert!(!ctx.is_queued());
            INLINE_RUNS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup() -> (Arc<MemoryConnector>, Dispatcher) {
        let connector = Arc::new(MemoryConnector::new(ConnectorSettings::default()));
        let dispatcher = Dispatcher::new(connector.clone());
        (connector, dispatcher)
    }

    fn resize() -> Resize {
        Resize {
            image: "cat.png".to_string(),
            width: 640,
        }
    }

    #[tokio::test]
    async fn test_await_persists_configured_envelope() {
        let (connector, dispatcher) = setup();

        let outcome = resize()
            .dispatch(&dispatcher)
            .weight(10)
            .on_failure("notify_ops")
            .await
            .unwrap();
        let DispatchOutcome::Queued(id) = outcome else {
            panic!("expected a queued job, got {:?}", outcome);
        };

        let record = connector.find(id).await.unwrap();
        assert_eq!(record.queue, "media");
        assert_eq!(record.weight, 10);
        assert_eq!(record.status, JobStatus::Waiting);

        let envelope: JobEnvelope = serde_json::from_str(&record.payload).unwrap();
        assert_eq!(envelope.job, "resize");
        assert_eq!(envelope.on_failure.as_deref(), Some("notify_ops"));
        assert_eq!(envelope.attributes.get::<u32>("width").unwrap(), Some(640));
    }

    #[tokio::test]
    async fn test_on_queue_overrides_job_queue() {
        let (connector, dispatcher) = setup();
        resize().dispatch(&dispatcher).on_queue("bulk").await.unwrap();
        assert_eq!(connector.records().await[0].queue, "bulk");
    }

    #[tokio::test]
    async fn test_delay_postpones_availability() {
        let (connector, dispatcher) = setup();
        resize()
            .dispatch(&dispatcher)
            .delay(2, DelayUnit::Hours)
            .await
            .unwrap();

        let record = &connector.records().await[0];
        let delay = record.available_at - record.created_at;
        assert_eq!(delay, chrono::Duration::hours(2));
    }

    #[tokio::test]
    async fn test_dispatch_happens_once() {
        let (connector, dispatcher) = setup();
        let mut pending = resize().dispatch(&dispatcher);

        assert!(matches!(
            pending.ensure_dispatched().await.unwrap(),
            DispatchOutcome::Queued(_)
        ));
        assert_eq!(
            pending.ensure_dispatched().await.unwrap(),
            DispatchOutcome::AlreadyDispatched
        );

        // ignored after the fact
        let pending = pending.weight(1).delay(1, DelayUnit::Days);
        assert!(pending.is_dispatched());
        assert_eq!(pending.await.unwrap(), DispatchOutcome::AlreadyDispatched);

        let records = connector.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].weight, 100);
    }

    #[tokio::test]
    async fn test_failed_send_can_be_retried() {
        let (connector, dispatcher) = setup();
        let mut pending = resize()
            .dispatch(&dispatcher)
            .delay(1_000_000_000, DelayUnit::Days);

        let err = pending.ensure_dispatched().await.unwrap_err();
        assert!(matches!(err, JobError::Payload(_)));
        assert!(!pending.is_dispatched());
        assert!(connector.records().await.is_empty());

        let outcome = pending.delay(0, DelayUnit::Seconds).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Queued(_)));
        assert_eq!(connector.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_job_runs_inline() {
        let (connector, dispatcher) = setup();
        let before = INLINE_RUNS.load(Ordering::SeqCst);

        let outcome = Ping.dispatch(&dispatcher).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Executed);
        assert_eq!(INLINE_RUNS.load(Ordering::SeqCst), before + 1);
        assert!(connector.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_to_queue_builds_closure_envelope() {
        let (connector, dispatcher) = setup();
        to_queue(&dispatcher, "purge_cache", json!({"prefix": "user:"}))
            .await
            .unwrap();

        let envelope: JobEnvelope =
            serde_json::from_str(&connector.records().await[0].payload).unwrap();
        assert_eq!(envelope.job, ClosureJob::NAME);
        let job: ClosureJob = envelope.attributes.to_job().unwrap();
        assert_eq!(job.callable, "purge_cache");
        assert_eq!(job.data["prefix"], "user:");
    }

    #[test]
    fn test_envelope_preview_does_not_dispatch() {
        let (_connector, dispatcher) = setup();
        let mut pending = resize().dispatch(&dispatcher).weight(5);
        let envelope = pending.envelope().unwrap();
        assert_eq!(envelope.weight, Some(5));
        assert_eq!(envelope.queue.as_deref(), Some("media"));
        assert!(!pending.is_dispatched());

        tokio_test::block_on(pending.ensure_dispatched()).unwrap();
    }
}
