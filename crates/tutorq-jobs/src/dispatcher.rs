//! Dispatcher: claims eligible jobs, runs their handlers and records the outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use tutorq_core::{
    defaults, BackoffPolicy, ClaimOptions, Clock, Error, Job, JobStore, JobType, Result,
};

use crate::handler::{JobContext, JobResult};
use crate::registry::HandlerRegistry;

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Jobs claimed per pass in continuous mode.
    pub limit: usize,
    /// A `processing` row whose lease is older than this is swept.
    pub lease_timeout: Duration,
    /// Upper bound on one handler execution.
    pub job_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Cap on rows one tenant may have claimed per pass.
    pub per_tenant_limit: Option<u32>,
    /// Sleep between empty passes in continuous mode.
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            limit: defaults::JOB_DISPATCH_LIMIT,
            lease_timeout: Duration::from_secs(defaults::JOB_LEASE_TIMEOUT_SECS),
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            backoff: BackoffPolicy::default(),
            per_tenant_limit: None,
            poll_interval: Duration::from_millis(defaults::JOB_POLL_INTERVAL_MS),
        }
    }
}

impl DispatcherConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_DISPATCH_LIMIT` | `10` | Jobs claimed per pass (clamped to [`Self::max_jobs_per_pass`]) |
    /// | `JOB_LEASE_TIMEOUT_SECS` | `900` | Lease age before the sweep reclaims a job |
    /// | `JOB_TIMEOUT_SECS` | `60` | Handler execution timeout |
    /// | `JOB_BACKOFF_BASE_SECS` | `30` | First retry delay |
    /// | `JOB_BACKOFF_MAX_SECS` | `3600` | Retry delay cap |
    /// | `JOB_PER_TENANT_LIMIT` | unset | Per-tenant claim cap |
    /// | `JOB_POLL_INTERVAL_MS` | `5000` | Sleep when a pass found nothing |
    pub fn from_env() -> Self {
        let limit = env_parse::<usize>("JOB_DISPATCH_LIMIT")
            .unwrap_or(defaults::JOB_DISPATCH_LIMIT)
            .max(1);
        let lease_timeout = env_parse::<u64>("JOB_LEASE_TIMEOUT_SECS")
            .unwrap_or(defaults::JOB_LEASE_TIMEOUT_SECS);
        let job_timeout =
            env_parse::<u64>("JOB_TIMEOUT_SECS").unwrap_or(defaults::JOB_TIMEOUT_SECS);
        let backoff_base = env_parse::<u64>("JOB_BACKOFF_BASE_SECS")
            .unwrap_or(defaults::JOB_BACKOFF_BASE_SECS);
        let backoff_max = env_parse::<u64>("JOB_BACKOFF_MAX_SECS")
            .unwrap_or(defaults::JOB_BACKOFF_MAX_SECS)
            .max(backoff_base);
        let per_tenant_limit = env_parse::<u32>("JOB_PER_TENANT_LIMIT").filter(|n| *n > 0);
        let poll_interval = env_parse::<u64>("JOB_POLL_INTERVAL_MS")
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        let config = Self {
            limit,
            lease_timeout: Duration::from_secs(lease_timeout),
            job_timeout: Duration::from_secs(job_timeout),
            backoff: BackoffPolicy::new(
                Duration::from_secs(backoff_base),
                Duration::from_secs(backoff_max),
            ),
            per_tenant_limit,
            poll_interval: Duration::from_millis(poll_interval),
        };

        if config.job_timeout >= config.lease_timeout {
            warn!(
                job_timeout_secs = job_timeout,
                lease_timeout_secs = lease_timeout,
                "JOB_TIMEOUT_SECS is not below JOB_LEASE_TIMEOUT_SECS; a slow job can be swept while running"
            );
        }
        let max = config.max_jobs_per_pass();
        if config.limit > max {
            warn!(
                requested = config.limit,
                max, "JOB_DISPATCH_LIMIT does not fit in one lease; clamped"
            );
            return config.with_limit(max);
        }
        config
    }

    /// Largest `n` with `n * job_timeout < lease_timeout`, at least 1.
    ///
    /// Every row of a pass is leased at claim time, so the last one must start
    /// before the lease taken at claim can expire.
    pub fn max_jobs_per_pass(&self) -> usize {
        let per_job = self.job_timeout.as_nanos();
        if per_job == 0 {
            return usize::MAX;
        }
        let fit = self.lease_timeout.as_nanos().saturating_sub(1) / per_job;
        usize::try_from(fit).unwrap_or(usize::MAX).max(1)
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_per_tenant_limit(mut self, limit: Option<u32>) -> Self {
        self.per_tenant_limit = limit;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Event emitted by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    JobStarted {
        job_id: Uuid,
        job_type: JobType,
        attempt: i32,
    },
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
    },
    /// Transient failure; the job is pending again from `run_after`.
    JobRetrying {
        job_id: Uuid,
        job_type: JobType,
        error: String,
        run_after: DateTime<Utc>,
    },
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    LeasesSwept {
        count: usize,
    },
}

/// What a handler execution amounted to.
enum Outcome {
    Success(JsonValue),
    Transient(String),
    Permanent(String),
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn new_worker_id() -> String {
    format!("worker-{}", Uuid::now_v7())
}

/// Runs claimed jobs against the handler registry.
///
/// Each `process_jobs` call is one invocation with its own worker id; several
/// invocations (in one process or many) may overlap safely because every
/// post-claim write is guarded by the lease.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    event_tx: broadcast::Sender<DispatchEvent>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            store,
            registry,
            clock,
            config: DispatcherConfig::default(),
            event_tx,
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Get a receiver for dispatcher events.
    pub fn events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: DispatchEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Sweep expired leases, then claim and run up to `limit` jobs (never more
    /// than [`DispatcherConfig::max_jobs_per_pass`]).
    ///
    /// Returns the number of claimed jobs that were run, whatever their
    /// outcome. Store failures during the sweep or claim propagate; handler
    /// failures never do.
    #[instrument(skip(self), fields(worker_id))]
    pub async fn process_jobs(&self, limit: usize) -> Result<usize> {
        let worker_id = new_worker_id();
        tracing::Span::current().record("worker_id", worker_id.as_str());
        let start = Instant::now();

        self.sweep_stale_leases().await?;
        if limit == 0 {
            return Ok(0);
        }
        let max = self.config.max_jobs_per_pass();
        if limit > max {
            debug!(requested = limit, max, "Pass limit clamped to lease budget");
        }
        let limit = limit.min(max);

        let options = ClaimOptions {
            per_tenant_limit: self.config.per_tenant_limit,
        };
        let claimed = self
            .store
            .claim(&worker_id, limit, self.clock.now(), options)
            .await?;
        debug!(claimed = claimed.len(), limit, "Claimed jobs");

        let mut processed = 0;
        for job in claimed {
            if self.execute_job(&worker_id, job).await {
                processed += 1;
            }
        }

        if processed > 0 {
            info!(
                subsystem = "jobs",
                component = "dispatcher",
                op = "process_jobs",
                processed,
                duration_ms = start.elapsed().as_millis() as u64,
                "Dispatch pass finished"
            );
        }
        Ok(processed)
    }

    /// Return expired leases to the queue (or fail them when attempts are spent).
    #[instrument(skip(self))]
    pub async fn sweep_stale_leases(&self) -> Result<usize> {
        let now = self.clock.now();
        let lease = chrono::Duration::from_std(self.config.lease_timeout)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        let swept = self.store.sweep_expired_leases(now - lease, now).await?;

        if swept.is_empty() {
            return Ok(0);
        }
        for job in &swept {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                status = %job.status,
                attempts = job.attempts,
                "Expired lease swept"
            );
        }
        info!(
            subsystem = "jobs",
            component = "dispatcher",
            op = "sweep",
            swept = swept.len(),
            "Swept expired leases"
        );
        self.emit(DispatchEvent::LeasesSwept { count: swept.len() });
        Ok(swept.len())
    }

    async fn run_handler(&self, worker_id: &str, job: &Job) -> Outcome {
        let Some(handler) = self.registry.get(job.job_type) else {
            warn!(job_type = %job.job_type, "No handler registered for job type");
            return Outcome::Permanent(format!(
                "no handler registered for job type {}",
                job.job_type
            ));
        };

        let ctx = JobContext::new(job.clone(), worker_id, self.clock.now());
        let execution = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();

        match tokio::time::timeout(self.config.job_timeout, execution).await {
            Err(_) => Outcome::Transient(format!(
                "job exceeded timeout of {}s",
                self.config.job_timeout.as_secs()
            )),
            Ok(Err(panic)) => {
                Outcome::Transient(format!("handler panicked: {}", panic_message(&*panic)))
            }
            Ok(Ok(JobResult::Success(data))) => Outcome::Success(data.unwrap_or_else(|| json!({}))),
            Ok(Ok(JobResult::Retry(error))) => Outcome::Transient(error),
            Ok(Ok(JobResult::Failed(error))) => Outcome::Permanent(error),
        }
    }

    /// Run one claimed job and record the outcome under its lease.
    ///
    /// Returns false when the job was not started because its lease is gone.
    async fn execute_job(&self, worker_id: &str, job: Job) -> bool {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;
        let attempt = job.attempts + 1;

        match self.store.renew_lease(job_id, worker_id, self.clock.now()).await {
            Ok(_) => {}
            Err(Error::LeaseLost { .. }) => {
                warn!(%job_id, %job_type, worker_id, "Lease lost before job started; skipping");
                return false;
            }
            Err(e) => {
                error!(
                    error = %e,
                    %job_id,
                    %job_type,
                    "Failed to renew lease; leaving job to the lease sweep"
                );
                return false;
            }
        }

        info!(%job_id, %job_type, attempt, "Processing job");
        self.emit(DispatchEvent::JobStarted {
            job_id,
            job_type,
            attempt,
        });

        let outcome = self.run_handler(worker_id, &job).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let now = self.clock.now();

        let recorded = match outcome {
            Outcome::Success(data) => self
                .store
                .complete(job_id, worker_id, data, now)
                .await
                .map(|_| {
                    info!(%job_id, %job_type, duration_ms, "Job completed");
                    DispatchEvent::JobCompleted { job_id, job_type }
                }),
            Outcome::Transient(error) if attempt < job.max_attempts => {
                let run_after = now + self.config.backoff.delay_chrono(attempt);
                self.store
                    .retry(job_id, worker_id, &error, run_after, now)
                    .await
                    .map(|_| {
                        warn!(
                            %job_id,
                            %job_type,
                            attempt,
                            %error,
                            %run_after,
                            duration_ms,
                            "Job failed, retry scheduled"
                        );
                        DispatchEvent::JobRetrying {
                            job_id,
                            job_type,
                            error,
                            run_after,
                        }
                    })
            }
            Outcome::Transient(error) | Outcome::Permanent(error) => self
                .store
                .fail(job_id, worker_id, &error, now)
                .await
                .map(|_| {
                    warn!(%job_id, %job_type, attempt, %error, duration_ms, "Job failed");
                    DispatchEvent::JobFailed {
                        job_id,
                        job_type,
                        error,
                    }
                }),
        };

        match recorded {
            Ok(event) => self.emit(event),
            Err(Error::LeaseLost { .. }) => {
                warn!(%job_id, %job_type, worker_id, "Lease lost before outcome was recorded");
            }
            Err(e) => {
                error!(
                    error = %e,
                    %job_id,
                    %job_type,
                    "Failed to record job outcome; leaving it to the lease sweep"
                );
            }
        }
        true
    }

    /// Start continuous mode and return a handle for control.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(self.run(shutdown_rx));

        DispatcherHandle {
            shutdown_tx,
            event_tx,
            task,
        }
    }

    /// Only sleeps when a pass processed nothing.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            limit = self.config.limit,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            per_tenant_limit = ?self.config.per_tenant_limit,
            "Dispatcher started"
        );

        loop {
            if !matches!(
                shutdown_rx.try_recv(),
                Err(mpsc::error::TryRecvError::Empty)
            ) {
                break;
            }

            let processed = match self.process_jobs(self.config.limit).await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "Dispatch pass failed");
                    0
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!("Dispatcher stopped");
    }
}

/// Handle for a dispatcher running in continuous mode.
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_tx: broadcast::Sender<DispatchEvent>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.event_tx.subscribe()
    }

    /// Signal shutdown and wait for the current pass to finish.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already be gone; joining below reports that.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("dispatcher task failed: {}", e)))
    }
}
