//! Enqueuer: the only way jobs enter the queue.

use std::sync::Arc;

use chrono::Duration;
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use tutorq_core::{
    defaults, BatchApi, Clock, Error, Job, JobFilter, JobStore, JobType, NewJob, QueueStats,
    Result,
};

use crate::batch::BatchSubmitter;
use crate::registry::HandlerRegistry;

/// Configuration for the enqueuer.
#[derive(Debug, Clone)]
pub struct EnqueueConfig {
    /// `max_attempts` for jobs that don't set their own.
    pub max_attempts: i32,
    /// Upper bound on items per batched job.
    pub batch_max_items: usize,
}

impl Default for EnqueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            batch_max_items: defaults::BATCH_MAX_ITEMS,
        }
    }
}

impl EnqueueConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `JOB_MAX_ATTEMPTS` | `3` |
    /// | `BATCH_MAX_ITEMS` | `1000` |
    pub fn from_env() -> Self {
        let max_attempts = std::env::var("JOB_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults::JOB_MAX_ATTEMPTS)
            .max(1);

        let batch_max_items = std::env::var("BATCH_MAX_ITEMS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::BATCH_MAX_ITEMS)
            .max(1);

        Self {
            max_attempts,
            batch_max_items,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_batch_max_items(mut self, max_items: usize) -> Self {
        self.batch_max_items = max_items;
        self
    }
}

/// Per-call overrides for [`Enqueuer::enqueue`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Defaults to the job type's priority.
    pub priority: Option<i32>,
    /// Earliest execution is `now + delay`.
    pub delay: Option<Duration>,
    pub max_attempts: Option<i32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Strip the variant prefix so nested validation messages read cleanly.
fn validation_message(error: Error) -> String {
    match error {
        Error::Validation(message) => message,
        other => other.to_string(),
    }
}

/// Creates job records for immediate or batched execution.
#[derive(Clone)]
pub struct Enqueuer {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    submitter: BatchSubmitter,
    clock: Arc<dyn Clock>,
    config: EnqueueConfig,
}

impl Enqueuer {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        batch_api: Arc<dyn BatchApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            submitter: BatchSubmitter::new(store.clone(), batch_api),
            store,
            registry,
            clock,
            config: EnqueueConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EnqueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EnqueueConfig {
        &self.config
    }

    /// Enqueue a job for immediate (or delayed) execution.
    ///
    /// Fails with `Validation` when the type has no handler, is a batched type,
    /// the payload fails the type's schema, or the options are out of range.
    /// Nothing is written on failure.
    pub async fn enqueue(
        &self,
        tenant_id: Uuid,
        creator_id: Uuid,
        job_type: JobType,
        payload: JsonValue,
        options: EnqueueOptions,
    ) -> Result<Job> {
        if job_type.is_batched() || self.registry.batch_handler(job_type).is_some() {
            return Err(Error::Validation(format!(
                "job type {} is batched; use enqueue_batch",
                job_type
            )));
        }
        self.registry.validate(job_type, &payload)?;

        let delay = options.delay.unwrap_or_else(Duration::zero);
        if delay < Duration::zero() {
            return Err(Error::validation("delay must not be negative"));
        }
        let max_attempts = options.max_attempts.unwrap_or(self.config.max_attempts);
        if max_attempts < 1 {
            return Err(Error::Validation(format!(
                "max_attempts must be at least 1, got {}",
                max_attempts
            )));
        }

        let now = self.clock.now();
        let new_job = NewJob::pending(tenant_id, creator_id, job_type, payload, now)
            .with_priority(options.priority.unwrap_or_else(|| job_type.default_priority()))
            .with_max_attempts(max_attempts)
            .with_run_after(now + delay);

        let job = self.store.insert(new_job).await?;
        info!(
            subsystem = "jobs",
            component = "enqueue",
            op = "enqueue",
            job_id = %job.id,
            job_type = %job.job_type,
            tenant_id = %job.tenant_id,
            priority = job.priority,
            run_after = %job.run_after,
            "Job enqueued"
        );
        Ok(job)
    }

    /// Enqueue many logical sub-requests as one externally batched job.
    ///
    /// The batch is submitted before any row exists; if submission fails the
    /// caller gets the error and the queue is unchanged.
    pub async fn enqueue_batch(
        &self,
        tenant_id: Uuid,
        creator_id: Uuid,
        job_type: JobType,
        items: Vec<JsonValue>,
    ) -> Result<Job> {
        let handler = self.registry.batch_handler(job_type).ok_or_else(|| {
            Error::Validation(format!("no batch handler registered for job type {}", job_type))
        })?;

        if items.is_empty() {
            return Err(Error::validation("batch must contain at least one item"));
        }
        if items.len() > self.config.batch_max_items {
            return Err(Error::Validation(format!(
                "batch has {} items, maximum is {}",
                items.len(),
                self.config.batch_max_items
            )));
        }
        for (index, item) in items.iter().enumerate() {
            handler.validate_item(item).map_err(|e| {
                Error::Validation(format!("item {}: {}", index, validation_message(e)))
            })?;
        }

        self.submitter
            .submit(
                handler.as_ref(),
                tenant_id,
                creator_id,
                items,
                self.config.max_attempts,
                self.clock.now(),
            )
            .await
    }

    /// Read-only snapshot for status polling.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.store
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.store.list(filter).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.store.stats().await
    }

    /// Cancel a job that has not started. Leased and terminal jobs are a `Conflict`.
    pub async fn cancel(&self, job_id: Uuid, reason: &str) -> Result<Job> {
        let job = self.store.cancel(job_id, reason, self.clock.now()).await?;
        info!(
            subsystem = "jobs",
            component = "enqueue",
            op = "cancel",
            job_id = %job.id,
            job_type = %job.job_type,
            reason,
            "Job cancelled"
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_config_defaults() {
        let config = EnqueueConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.batch_max_items, 1000);
    }

    #[test]
    fn test_enqueue_options_builder() {
        let options = EnqueueOptions::new()
            .with_priority(9)
            .with_delay(Duration::minutes(5))
            .with_max_attempts(1);
        assert_eq!(options.priority, Some(9));
        assert_eq!(options.delay, Some(Duration::minutes(5)));
        assert_eq!(options.max_attempts, Some(1));
    }

    #[test]
    fn test_validation_message_unwraps() {
        assert_eq!(validation_message(Error::validation("bad count")), "bad count");
        assert!(validation_message(Error::Internal("x".into())).contains("Internal"));
    }
}
