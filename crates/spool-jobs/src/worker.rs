//! Worker supervisor.
//!
//! Runs consumer loops against one queue. Each loop claims and executes jobs
//! until a self-limit trips (time, memory or batch ceiling) or shutdown is
//! requested; with restart enabled a loop stopped by the time or batch limit
//! is replaced by a fresh one. Memory is per process, so a loop stopped by the
//! memory limit is never replaced in-process; the caller decides whether to
//! start a new process. A job that is already running is never interrupted.

use crate::connector::Connector;
use crate::error::{JobError, JobResult};
use crate::metrics::WorkerMetrics;
use crate::registry::JobHandler;
use spool_config::{parse_memory_limit, WorkerConfig};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Instrument};

/// Grace subtracted from the configured execution time.
const TIME_MARGIN: Duration = Duration::from_secs(5);

/// Headroom subtracted from the configured memory ceiling.
const MEMORY_MARGIN: u64 = 10 * 1024 * 1024;

/// How loops are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One tokio task per loop.
    #[default]
    Tasks,
    /// A single loop in the caller's task.
    Inline,
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Queue every loop consumes.
    pub queue: String,
    /// Number of concurrent loops (`Tasks` mode).
    pub workers: usize,
    /// Replace loops that stop on a self-limit.
    pub restart: bool,
    pub mode: ExecutionMode,
    /// Configured wall-clock budget of a loop.
    pub max_execution_time: Option<Duration>,
    /// Configured resident memory ceiling in bytes.
    pub memory_limit: Option<u64>,
    /// Successful iterations after which a loop stops.
    pub max_batch: u32,
    /// Pause after every iteration.
    pub throttle: Duration,
    /// Pause after a failed iteration.
    pub error_backoff: Duration,
}

impl SupervisorConfig {
    /// Builds settings from the worker configuration section.
    ///
    /// Fails with a configuration error when the memory limit cannot be
    /// parsed.
    pub fn from_config(config: &WorkerConfig, queue: impl Into<String>) -> JobResult<Self> {
        let memory_limit = config
            .memory_limit
            .as_deref()
            .map(|raw| {
                parse_memory_limit(raw)
                    .ok_or_else(|| JobError::Configuration(format!("Unknown Memory Limit: {}", raw)))
            })
            .transpose()?;

        Ok(Self {
            queue: queue.into(),
            workers: config.workers.max(1),
            restart: config.restart,
            mode: if config.inline {
                ExecutionMode::Inline
            } else {
                ExecutionMode::Tasks
            },
            max_execution_time: config.max_execution_time(),
            memory_limit,
            max_batch: config.max_batch,
            throttle: config.throttle(),
            error_backoff: config.error_backoff(),
        })
    }

    /// Effective budgets. A limit that leaves nothing after its margin is
    /// not enforced.
    fn limits(&self) -> LoopLimits {
        LoopLimits {
            time: self
                .max_execution_time
                .map(|limit| limit.saturating_sub(TIME_MARGIN))
                .filter(|budget| !budget.is_zero()),
            memory: self
                .memory_limit
                .map(|limit| limit.saturating_sub(MEMORY_MARGIN))
                .filter(|ceiling| *ceiling > 0),
            batch: self.max_batch,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            queue: "default".to_string(),
            workers: 1,
            restart: false,
            mode: ExecutionMode::default(),
            max_execution_time: None,
            memory_limit: None,
            max_batch: 50,
            throttle: Duration::from_secs(5),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    TimeLimit,
    MemoryLimit,
    BatchCeiling,
    Shutdown,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TimeLimit => "time_limit",
            Self::MemoryLimit => "memory_limit",
            Self::BatchCeiling => "batch_ceiling",
            Self::Shutdown => "shutdown",
        }
    }

    /// Returns true for limits a fresh in-process loop can recover from.
    #[must_use]
    pub const fn is_restartable(&self) -> bool {
        matches!(self, Self::TimeLimit | Self::BatchCeiling)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one finished loop.
#[derive(Debug, Clone)]
pub struct LoopExit {
    pub loop_id: usize,
    pub reason: StopReason,
    /// Successful fetch calls.
    pub iterations: u32,
    /// Failed fetch calls.
    pub errors: u32,
    pub elapsed: Duration,
}

/// Summary of a supervisor run.
#[derive(Debug, Clone, Default)]
pub struct SupervisorReport {
    pub exits: Vec<LoopExit>,
    /// Replacement loops spawned.
    pub restarts: u32,
    /// Loops that panicked.
    pub panicked: u32,
}

impl SupervisorReport {
    /// Successful iterations across every loop.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.exits.iter().map(|e| u64::from(e.iterations)).sum()
    }

    /// Failed iterations across every loop.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.exits.iter().map(|e| u64::from(e.errors)).sum()
    }

    /// Returns true if any loop stopped on the memory limit.
    #[must_use]
    pub fn memory_exhausted(&self) -> bool {
        self.exits.iter().any(|e| e.reason == StopReason::MemoryLimit)
    }
}

#[derive(Debug, Clone, Copy)]
struct LoopLimits {
    time: Option<Duration>,
    memory: Option<u64>,
    batch: u32,
}

impl LoopLimits {
    fn exceeded(&self, started: Instant, iterations: u32) -> Option<StopReason> {
        if let Some(budget) = self.time {
            if started.elapsed() > budget {
                return Some(StopReason::TimeLimit);
            }
        }

        if let Some(ceiling) = self.memory {
            if let Some(usage) = memory_stats::memory_stats() {
                if usage.physical_mem as u64 > ceiling {
                    return Some(StopReason::MemoryLimit);
                }
            }
        }

        (iterations >= self.batch).then_some(StopReason::BatchCeiling)
    }
}

/// Requests a supervisor to stop between iterations.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
    stopping: Arc<AtomicBool>,
}

impl ShutdownHandle {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals every loop to stop; interrupts their sleeps.
    pub fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("Stopping workers...");
        }
        let _ = self.tx.send(());
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
            stopping: self.stopping.clone(),
        }
    }
}

struct ShutdownListener {
    rx: broadcast::Receiver<()>,
    stopping: Arc<AtomicBool>,
}

impl ShutdownListener {
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`; returns true if shutdown was requested.
    async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopping() {
            return true;
        }
        if duration.is_zero() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_stopping(),
            _ = self.rx.recv() => true,
        }
    }
}

struct LoopShared {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn JobHandler>,
    config: SupervisorConfig,
    limits: LoopLimits,
}

/// Runs and restarts consumer loops.
pub struct Supervisor {
    shared: Arc<LoopShared>,
    shutdown: ShutdownHandle,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        handler: Arc<dyn JobHandler>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            shared: Arc::new(LoopShared {
                connector,
                handler,
                limits: config.limits(),
                config,
            }),
            shutdown: ShutdownHandle::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    /// Returns a handle that can stop this supervisor from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Stops every loop between iterations.
    pub fn stop(&self) {
        self.shutdown.stop();
    }

    /// Runs until every loop has exited.
    pub async fn run(&self) -> SupervisorReport {
        let config = &self.shared.config;
        info!(
            queue = %config.queue,
            workers = config.workers,
            restart = config.restart,
            mode = ?config.mode,
            "Starting workers"
        );

        let report = match config.mode {
            ExecutionMode::Inline => self.run_inline().await,
            ExecutionMode::Tasks => self.run_tasks().await,
        };

        WorkerMetrics::update_loops(&config.queue, 0);
        info!(
            queue = %config.queue,
            loops = report.exits.len(),
            iterations = report.iterations(),
            errors = report.errors(),
            restarts = report.restarts,
            "Workers stopped"
        );
        report
    }

    async fn run_inline(&self) -> SupervisorReport {
        let queue = &self.shared.config.queue;
        if self.shared.config.workers > 1 {
            warn!(
                workers = self.shared.config.workers,
                "Inline mode runs a single worker loop"
            );
        }

        let mut report = SupervisorReport::default();
        let mut loop_id = 0;
        WorkerMetrics::update_loops(queue, 1);

        loop {
            let pause = if loop_id == 0 {
                Duration::ZERO
            } else {
                self.shared.config.throttle
            };
            let exit = run_loop(self.shared.clone(), self.shutdown.listener(), loop_id, pause).await;
            let replace = self.should_replace(&exit);
            report.exits.push(exit);
            if !replace {
                break;
            }
            loop_id += 1;
            report.restarts += 1;
            WorkerMetrics::loop_restarted(queue);
            info!(loop_id, queue = %queue, "Restarting worker loop");
        }

        report
    }

    async fn run_tasks(&self) -> SupervisorReport {
        let queue = self.shared.config.queue.clone();
        let mut report = SupervisorReport::default();
        let mut loops = JoinSet::new();
        let mut next_id = 0;

        for _ in 0..self.shared.config.workers {
            self.spawn_loop(&mut loops, next_id, Duration::ZERO);
            next_id += 1;
        }
        WorkerMetrics::update_loops(&queue, loops.len());

        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(exit) => {
                    if self.should_replace(&exit) {
                        info!(
                            loop_id = next_id,
                            replaces = exit.loop_id,
                            queue = %queue,
                            "Restarting worker loop"
                        );
                        self.spawn_loop(&mut loops, next_id, self.shared.config.throttle);
                        next_id += 1;
                        report.restarts += 1;
                        WorkerMetrics::loop_restarted(&queue);
                    }
                    report.exits.push(exit);
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Worker loop panicked");
                    report.panicked += 1;
                }
            }
            WorkerMetrics::update_loops(&queue, loops.len());
        }

        report
    }

    fn spawn_loop(&self, loops: &mut JoinSet<LoopExit>, loop_id: usize, pause: Duration) {
        let shared = self.shared.clone();
        let listener = self.shutdown.listener();
        loops.spawn(
            run_loop(shared, listener, loop_id, pause)
                .instrument(tracing::info_span!("worker", loop_id)),
        );
    }

    fn should_replace(&self, exit: &LoopExit) -> bool {
        if !self.shared.config.restart || self.shutdown.is_stopping() {
            return false;
        }
        if exit.reason == StopReason::MemoryLimit {
            warn!(
                loop_id = exit.loop_id,
                queue = %self.shared.config.queue,
                "Memory limit reached; loop not restarted in this process"
            );
        }
        exit.reason.is_restartable()
    }
}

/// Runs one loop. `pause` delays the first iteration.
async fn run_loop(
    shared: Arc<LoopShared>,
    mut shutdown: ShutdownListener,
    loop_id: usize,
    pause: Duration,
) -> LoopExit {
    let config = &shared.config;
    tokio::task::yield_now().await;
    let interrupted = shutdown.sleep(pause).await;

    let started = Instant::now();
    let mut iterations = 0u32;
    let mut errors = 0u32;

    info!(loop_id, queue = %config.queue, "Worker loop started");

    let reason = loop {
        if interrupted || shutdown.is_stopping() {
            break StopReason::Shutdown;
        }
        if let Some(reason) = shared.limits.exceeded(started, iterations) {
            break reason;
        }

        match shared.connector.fetch(shared.handler.as_ref(), &config.queue).await {
            Ok(_) => iterations += 1,
            Err(e) => {
                errors += 1;
                WorkerMetrics::fetch_error(&config.queue, e.kind());
                error!(loop_id, queue = %config.queue, error = %e, "Worker iteration failed");
                if shutdown.sleep(config.error_backoff).await {
                    break StopReason::Shutdown;
                }
            }
        }

        if shutdown.sleep(config.throttle).await {
            break StopReason::Shutdown;
        }
    };

    let exit = LoopExit {
        loop_id,
        reason,
        iterations,
        errors,
        elapsed: started.elapsed(),
    };

    WorkerMetrics::loop_stopped(&config.queue, reason.as_str());
    info!(
        loop_id,
        queue = %config.queue,
        reason = %reason,
        iterations,
        errors,
        elapsed_ms = exit.elapsed.as_millis() as u64,
        "Worker loop stopped"
    );
    exit
}
