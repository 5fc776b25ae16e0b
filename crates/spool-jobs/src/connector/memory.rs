//! In-process connector.
//!
//! Holds records in a map guarded by one async mutex, so claims are trivially
//! exclusive. Jobs are only visible to the current process.

use super::{
    execute_claimed, time_after, time_before, ClaimStore, Connector, ConnectorSettings,
    FetchOutcome, HousekeepingReport, JobEvents, LoggingEvents,
};
use crate::envelope::{JobEnvelope, PayloadCodec};
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord, JobStatus};
use crate::metrics::JobMetrics;
use crate::registry::JobHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spool_crypto::Encrypter;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    rows: BTreeMap<JobId, JobRecord>,
}

/// Connector backed by process memory.
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
    settings: ConnectorSettings,
    codec: PayloadCodec,
    events: Arc<dyn JobEvents>,
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MemoryConnector {
    /// Creates an empty store.
    #[must_use]
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            settings,
            codec: PayloadCodec::default(),
            events: Arc::new(LoggingEvents),
        }
    }

    /// Sets the payload encrypter.
    #[must_use]
    pub fn with_encrypter(mut self, encrypter: Option<Arc<dyn Encrypter>>) -> Self {
        self.codec = PayloadCodec::new(encrypter);
        self
    }

    /// Sets the success/failure hooks.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn JobEvents>) -> Self {
        self.events = events;
        self
    }

    /// Returns a snapshot of every record, ordered by id.
    pub async fn records(&self) -> Vec<JobRecord> {
        self.state.lock().await.rows.values().cloned().collect()
    }

    /// Loads a single record.
    pub async fn find(&self, id: JobId) -> Option<JobRecord> {
        self.state.lock().await.rows.get(&id).cloned()
    }

    /// Counts records in `status`.
    pub async fn count(&self, status: JobStatus) -> usize {
        self.state
            .lock()
            .await
            .rows
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    #[cfg(test)]
    pub(crate) async fn backdate(&self, id: JobId, by: std::time::Duration) {
        let by = chrono::Duration::from_std(by).unwrap();
        if let Some(row) = self.state.lock().await.rows.get_mut(&id) {
            row.updated_at -= by;
        }
    }

    async fn claim(&self, queue: &str) -> Option<JobRecord> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let row = state
            .rows
            .values_mut()
            .filter(|r| r.queue == queue && r.is_claimable(now))
            .min_by_key(|r| (r.weight, r.id))?;

        row.status = JobStatus::Executing;
        row.updated_at = now;
        Some(row.clone())
    }
}

#[async_trait]
impl ClaimStore for MemoryConnector {
    async fn mark_done(&self, id: JobId) -> JobResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .rows
            .get_mut(&id)
            .ok_or_else(|| JobError::Internal(format!("job {} vanished while executing", id)))?;
        row.status = JobStatus::Done;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn record_error(&self, id: JobId, error: &str) -> JobResult<()> {
        if let Some(row) = self.state.lock().await.rows.get_mut(&id) {
            row.error = Some(error.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    async fn send(&self, envelope: &JobEnvelope, queue: Option<&str>) -> JobResult<JobId> {
        let queue = self.settings.resolve_queue(queue, envelope.queue.as_deref());
        let payload = self.codec.encode(envelope)?;
        let now = Utc::now();
        let available_at = time_after(now, envelope.delay_duration())?;

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = JobId::new(state.next_id);
        state.rows.insert(
            id,
            JobRecord {
                id,
                queue: queue.clone(),
                status: JobStatus::Waiting,
                weight: envelope.weight.unwrap_or(self.settings.default_weight),
                attempts: 0,
                available_at,
                payload,
                error: None,
                created_at: now,
                updated_at: now,
            },
        );
        drop(state);

        JobMetrics::job_enqueued(&queue, &envelope.job);
        debug!(job_id = %id, job = %envelope.job, queue = %queue, "Job enqueued");
        Ok(id)
    }

    async fn poll(&self, handler: &dyn JobHandler, queue: &str) -> JobResult<FetchOutcome> {
        let queue = self.settings.resolve_queue(Some(queue), None);
        match self.claim(&queue).await {
            Some(record) => {
                execute_claimed(self, &self.codec, self.events.as_ref(), handler, record).await
            }
            None => Ok(FetchOutcome::Empty),
        }
    }

    async fn reset(&self) -> JobResult<u64> {
        let now = Utc::now();
        let mut reset = 0;
        for row in self.state.lock().await.rows.values_mut() {
            if row.status == JobStatus::Failed {
                row.status = JobStatus::Waiting;
                row.attempts = 0;
                row.updated_at = now;
                reset += 1;
            }
        }

        JobMetrics::jobs_reset(reset);
        info!(count = reset, "Failed jobs reset to waiting");
        Ok(reset)
    }

    async fn house_keeping(&self) -> JobResult<HousekeepingReport> {
        let now = Utc::now();
        let stalled_before = time_before(now, self.settings.timeout)?;
        let purge_before: Option<DateTime<Utc>> = self
            .settings
            .retention
            .map(|retention| time_before(now, retention))
            .transpose()?;

        let mut report = HousekeepingReport::default();
        let mut state = self.state.lock().await;

        for row in state.rows.values_mut() {
            if row.status != JobStatus::Executing || row.updated_at >= stalled_before {
                continue;
            }
            row.status = if row.attempts < self.settings.max_retries {
                report.requeued += 1;
                JobStatus::Waiting
            } else {
                report.failed += 1;
                JobStatus::Failed
            };
            row.attempts += 1;
            row.updated_at = now;
        }

        if let Some(purge_before) = purge_before {
            let before = state.rows.len();
            state
                .rows
                .retain(|_, row| !(row.status == JobStatus::Done && row.updated_at < purge_before));
            report.purged = (before - state.rows.len()) as u64;
        }
        drop(state);

        JobMetrics::housekeeping(&report);
        if report.total() > 0 {
            info!(
                requeued = report.requeued,
                failed = report.failed,
                purged = report.purged,
                "Housekeeping sweep"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MockJobEvents;
    use crate::envelope::{Attributes, DelayUnit};
    use crate::job::JobContext;
    use parking_lot::Mutex as SyncMutex;
    use spool_crypto::AesEncrypter;
    use std::time::Duration;

    /// Handler that records the `name` attribute of every job it runs.
    #[derive(Default)]
    struct Recorder {
        seen: SyncMutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, envelope: &JobEnvelope, _ctx: &JobContext) -> JobResult<()> {
            let name: String = envelope.attributes.get("name")?.unwrap_or_default();
            self.seen.lock().push(name);
            if self.fail {
                Err(JobError::failed("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn settings() -> ConnectorSettings {
        ConnectorSettings {
            poll_backoff: Duration::ZERO,
            ..ConnectorSettings::default()
        }
    }

    fn envelope(name: &str) -> JobEnvelope {
        let mut attributes = Attributes::new();
        attributes.set("name", name).unwrap();
        JobEnvelope::new("named", attributes)
    }

    fn weighted(name: &str, weight: i32) -> JobEnvelope {
        let mut envelope = envelope(name);
        envelope.weight = Some(weight);
        envelope
    }

    #[tokio::test]
    async fn test_send_then_fetch_runs_once() {
        let connector = MemoryConnector::new(settings());
        let id = connector.send(&weighted("a", 100), Some("default")).await.unwrap();

        let record = connector.find(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Waiting);
        assert_eq!(record.weight, 100);
        assert_eq!(record.attempts, 0);

        let handler = Recorder::default();
        assert!(connector.fetch(&handler, "default").await.unwrap());
        assert!(connector.fetch(&handler, "default").await.unwrap());

        assert_eq!(*handler.seen.lock(), vec!["a".to_string()]);
        assert_eq!(connector.find(id).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_concurrent_fetch_single_row() {
        let connector = Arc::new(MemoryConnector::new(settings()));
        connector.send(&envelope("only"), None).await.unwrap();
        let handler = Arc::new(Recorder::default());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let connector = connector.clone();
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                connector.poll(handler.as_ref(), "default").await.unwrap()
            }));
        }

        let mut executed = 0;
        for task in tasks {
            if let FetchOutcome::Executed(_) = task.await.unwrap() {
                executed += 1;
            }
        }
        assert_eq!(executed, 1);
        assert_eq!(handler.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let connector = MemoryConnector::new(settings());
        connector.send(&weighted("w30", 30), None).await.unwrap();
        connector.send(&weighted("w10", 10), None).await.unwrap();
        connector.send(&weighted("w20-first", 20), None).await.unwrap();
        connector.send(&weighted("w20-second", 20), None).await.unwrap();

        let handler = Recorder::default();
        for _ in 0..4 {
            connector.poll(&handler, "default").await.unwrap();
        }
        assert_eq!(
            *handler.seen.lock(),
            vec!["w10", "w20-first", "w20-second", "w30"]
        );
    }

    #[tokio::test]
    async fn test_queue_isolation_and_delay() {
        let connector = MemoryConnector::new(settings());
        connector.send(&envelope("mail"), Some("mail")).await.unwrap();
        let mut later = envelope("later");
        later.delay = 5;
        later.delay_unit = DelayUnit::Minutes;
        connector.send(&later, None).await.unwrap();

        let handler = Recorder::default();
        assert_eq!(connector.poll(&handler, "default").await.unwrap(), FetchOutcome::Empty);
        assert!(matches!(
            connector.poll(&handler, "mail").await.unwrap(),
            FetchOutcome::Executed(_)
        ));
        assert_eq!(*handler.seen.lock(), vec!["mail"]);
    }

    #[tokio::test]
    async fn test_delay_past_calendar_is_rejected() {
        let connector = MemoryConnector::new(settings());
        let mut far = envelope("far");
        far.delay = 1_000_000_000;
        far.delay_unit = DelayUnit::Days;

        let err = connector.send(&far, None).await.unwrap_err();
        assert!(matches!(err, JobError::Payload(_)));
        assert!(connector.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_leaves_row_executing() {
        let mut events = MockJobEvents::new();
        events.expect_on_success().never();
        events
            .expect_on_failure()
            .times(1)
            .withf(|envelope, record, message| {
                envelope.job == "named"
                    && record.error.as_deref().is_some_and(|e| e.contains("boom"))
                    && message.contains("boom")
            })
            .return_const(());

        let connector = MemoryConnector::new(settings()).with_events(Arc::new(events));
        let id = connector.send(&envelope("bad"), None).await.unwrap();

        let handler = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let err = connector.fetch(&handler, "default").await.unwrap_err();
        assert!(matches!(err, JobError::ExecutionFailed(_)));

        let record = connector.find(id).await.unwrap();
        assert_eq!(record.status, JobStatus::Executing);
        assert!(record.error.unwrap().starts_with("error: "));
    }

    #[tokio::test]
    async fn test_success_hook_receives_envelope() {
        let mut events = MockJobEvents::new();
        events
            .expect_on_success()
            .times(1)
            .withf(|envelope| envelope.attributes.get::<String>("name").unwrap().as_deref() == Some("ok"))
            .return_const(());

        let connector = MemoryConnector::new(settings()).with_events(Arc::new(events));
        connector.send(&envelope("ok"), None).await.unwrap();
        connector.poll(&Recorder::default(), "default").await.unwrap();
    }

    #[tokio::test]
    async fn test_house_keeping_retries_then_fails() {
        let connector = MemoryConnector::new(ConnectorSettings {
            max_retries: 1,
            ..settings()
        });
        let id = connector.send(&envelope("stuck"), None).await.unwrap();
        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };

        // first stall: attempts 0 < 1, back to waiting
        connector.poll(&failing, "default").await.unwrap_err();
        connector.backdate(id, Duration::from_secs(60)).await;
        let report = connector.house_keeping().await.unwrap();
        assert_eq!(report.requeued, 1);
        let record = connector.find(id).await.unwrap();
        assert_eq!((record.status, record.attempts), (JobStatus::Waiting, 1));

        // second stall: attempts 1 >= 1, failed
        connector.poll(&failing, "default").await.unwrap_err();
        connector.backdate(id, Duration::from_secs(60)).await;
        let report = connector.house_keeping().await.unwrap();
        assert_eq!(report.failed, 1);
        let record = connector.find(id).await.unwrap();
        assert_eq!((record.status, record.attempts), (JobStatus::Failed, 2));
    }

    #[tokio::test]
    async fn test_house_keeping_ignores_fresh_executions() {
        let connector = MemoryConnector::new(settings());
        connector.send(&envelope("fresh"), None).await.unwrap();
        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };
        connector.poll(&failing, "default").await.unwrap_err();

        let report = connector.house_keeping().await.unwrap();
        assert_eq!(report, HousekeepingReport::default());
        assert_eq!(connector.count(JobStatus::Executing).await, 1);
    }

    #[tokio::test]
    async fn test_house_keeping_purges_old_done_rows() {
        let connector = MemoryConnector::new(ConnectorSettings {
            retention: Some(Duration::from_secs(3600)),
            ..settings()
        });
        let old = connector.send(&envelope("old"), None).await.unwrap();
        let recent = connector.send(&envelope("recent"), None).await.unwrap();
        let handler = Recorder::default();
        connector.poll(&handler, "default").await.unwrap();
        connector.poll(&handler, "default").await.unwrap();
        connector.backdate(old, Duration::from_secs(7200)).await;

        let report = connector.house_keeping().await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(connector.find(old).await.is_none());
        assert!(connector.find(recent).await.is_some());
    }

    #[tokio::test]
    async fn test_retention_disabled_keeps_done_rows() {
        let connector = MemoryConnector::new(ConnectorSettings {
            retention: None,
            ..settings()
        });
        let id = connector.send(&envelope("keep"), None).await.unwrap();
        connector.poll(&Recorder::default(), "default").await.unwrap();
        connector.backdate(id, Duration::from_secs(100 * 86_400)).await;

        assert_eq!(connector.house_keeping().await.unwrap().purged, 0);
        assert!(connector.find(id).await.is_some());
    }

    #[tokio::test]
    async fn test_reset_only_touches_failed_rows() {
        let connector = MemoryConnector::new(ConnectorSettings {
            max_retries: 0,
            ..settings()
        });
        let failed = connector.send(&envelope("failed"), None).await.unwrap();
        let failing = Recorder {
            fail: true,
            ..Recorder::default()
        };
        connector.poll(&failing, "default").await.unwrap_err();
        connector.backdate(failed, Duration::from_secs(60)).await;
        connector.house_keeping().await.unwrap();

        let waiting = connector.send(&envelope("waiting"), Some("other")).await.unwrap();

        assert_eq!(connector.reset().await.unwrap(), 1);
        let record = connector.find(failed).await.unwrap();
        assert_eq!((record.status, record.attempts), (JobStatus::Waiting, 0));
        assert_eq!(connector.find(waiting).await.unwrap().status, JobStatus::Waiting);
        assert_eq!(connector.reset().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_encrypted_payload_at_rest() {
        let connector = MemoryConnector::new(settings())
            .with_encrypter(Some(Arc::new(AesEncrypter::new([3u8; 32]))));
        let mut secret = envelope("card-4111");
        secret.encrypted = true;
        let id = connector.send(&secret, None).await.unwrap();

        let stored = connector.find(id).await.unwrap();
        assert!(!stored.payload.contains("card-4111"));

        let handler = Recorder::default();
        connector.poll(&handler, "default").await.unwrap();
        assert_eq!(*handler.seen.lock(), vec!["card-4111"]);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_recorded() {
        let producer = MemoryConnector::new(settings())
            .with_encrypter(Some(Arc::new(AesEncrypter::new([3u8; 32]))));
        let mut secret = envelope("x");
        secret.encrypted = true;
        producer.send(&secret, None).await.unwrap();

        // same store, consumer without the key
        let consumer = MemoryConnector {
            codec: PayloadCodec::default(),
            ..producer.clone()
        };
        let err = consumer.poll(&Recorder::default(), "default").await.unwrap_err();
        assert!(err.is_fatal());
        let record = &consumer.records().await[0];
        assert!(record.error.as_deref().unwrap().contains("CONFIGURATION_ERROR"));
    }
}
