//! Named job registry.
//!
//! Workers never receive executable code through the store: a payload names
//! its job type (or callable), and the registry resolves that name to a
//! handler registered at startup.

use crate::envelope::{Attributes, JobEnvelope};
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobContext, JobRecord};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Executes decoded envelopes on behalf of a connector.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job described by `envelope`.
    async fn handle(&self, envelope: &JobEnvelope, ctx: &JobContext) -> JobResult<()>;

    /// Called after `handle` failed and the error was recorded.
    fn failed(&self, _envelope: &JobEnvelope, _record: &JobRecord, _message: &str) {}
}

type RunFn = Arc<dyn Fn(Attributes, JobContext) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;
type FailFn = Arc<dyn Fn(&Attributes, &JobRecord, &str) + Send + Sync>;
type CallableFn = Arc<dyn Fn(Value, JobContext) -> BoxFuture<'static, JobResult<()>> + Send + Sync>;
type FailureCallbackFn = Arc<dyn Fn(&JobEnvelope, &JobRecord, &str) + Send + Sync>;

#[derive(Clone)]
struct TypedEntry {
    run: RunFn,
    failed: FailFn,
}

/// Maps job names to typed handlers, named callables and failure callbacks.
#[derive(Default, Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, TypedEntry>>>,
    callables: Arc<RwLock<HashMap<String, CallableFn>>>,
    failure_callbacks: Arc<RwLock<HashMap<String, FailureCallbackFn>>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job type under `J::NAME`.
    pub fn register<J: Job>(&self) -> &Self {
        let run: RunFn = Arc::new(|attributes: Attributes, ctx: JobContext| {
            async move {
                let job: J = attributes.to_job()?;
                job.run(&ctx).await
            }
            .boxed()
        });

        let failed: FailFn = Arc::new(|attributes: &Attributes, record: &JobRecord, message: &str| {
            match attributes.to_job::<J>() {
                Ok(job) => job.on_failure(record, message),
                Err(e) => warn!(job = J::NAME, error = %e, "Could not rebuild job for its failure hook"),
            }
        });

        self.jobs
            .write()
            .insert(J::NAME.to_string(), TypedEntry { run, failed });
        info!(job_type = J::NAME, "Registered job type");
        self
    }

    /// Registers a named callable, the target of [`ClosureJob`]s.
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, callable: F) -> &Self
    where
        F: Fn(Value, JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult<()>> + Send + 'static,
    {
        let name = name.into();
        let callable: CallableFn =
            Arc::new(move |data: Value, ctx: JobContext| callable(data, ctx).boxed());
        info!(callable = %name, "Registered callable");
        self.callables.write().insert(name, callable);
        self
    }

    /// Registers a named failure callback, referenced by
    /// [`JobEnvelope::on_failure`].
    pub fn register_failure_fn<F>(&self, name: impl Into<String>, callback: F) -> &Self
    where
        F: Fn(&JobEnvelope, &JobRecord, &str) + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(callback = %name, "Registered failure callback");
        self.failure_callbacks.write().insert(name, Arc::new(callback));
        self
    }

    /// Returns true if a job type or callable is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.read().contains_key(name) || self.callables.read().contains_key(name)
    }

    /// Returns true if nothing at all is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty() && self.callables.read().is_empty()
    }

    /// Returns the registered job type names, sorted.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().keys().cloned().collect();
        names.sort();
        names
    }

    async fn run_closure(&self, envelope: &JobEnvelope, ctx: &JobContext) -> JobResult<()> {
        let closure: ClosureJob = envelope.attributes.to_job()?;
        let callable = self
            .callables
            .read()
            .get(&closure.callable)
            .cloned()
            .ok_or_else(|| JobError::UnknownJob(format!("callable '{}'", closure.callable)))?;

        callable(closure.data, ctx.clone()).await
    }
}

#[async_trait]
impl JobHandler for JobRegistry {
    async fn handle(&self, envelope: &JobEnvelope, ctx: &JobContext) -> JobResult<()> {
        if envelope.job == ClosureJob::NAME {
            return self.run_closure(envelope, ctx).await;
        }

        let entry = self
            .jobs
            .read()
            .get(&envelope.job)
            .cloned()
            .ok_or_else(|| JobError::UnknownJob(envelope.job.clone()))?;

        (entry.run)(envelope.attributes.clone(), ctx.clone()).await
    }

    fn failed(&self, envelope: &JobEnvelope, record: &JobRecord, message: &str) {
        let entry = self.jobs.read().get(&envelope.job).cloned();
        if let Some(entry) = entry {
            (entry.failed)(&envelope.attributes, record, message);
        }

        if let Some(name) = &envelope.on_failure {
            let callback = self.failure_callbacks.read().get(name).cloned();
            match callback {
                Some(callback) => callback(envelope, record, message),
                None => warn!(callback = %name, job_id = %record.id, "Failure callback is not registered"),
            }
        }
    }
}

/// Ad-hoc job naming a callable registered with
/// [`JobRegistry::register_fn`], plus the data to call it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureJob {
    /// Registered callable name.
    pub callable: String,
    /// Argument bundle.
    #[serde(default)]
    pub data: Value,
}

impl ClosureJob {
    #[must_use]
    pub fn new(callable: impl Into<String>, data: Value) -> Self {
        Self {
            callable: callable.into(),
            data,
        }
    }
}

#[async_trait]
impl Job for ClosureJob {
    const NAME: &'static str = "closure";

    async fn run(&self, _ctx: &JobContext) -> Result<(), JobError> {
        // resolved by JobRegistry::handle before reaching here
        Err(JobError::UnknownJob(format!(
            "callable '{}' can only run through a job registry",
            self.callable
        )))
    }
}
