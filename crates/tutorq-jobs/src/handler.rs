//! Job handler traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tutorq_core::{parse_payload, Job, JobType, MaterializedEntity, PayloadSchema, Result};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed, as claimed.
    pub job: Job,
    /// Lease holder for this execution.
    pub worker_id: String,
    /// Dispatcher clock reading at claim time.
    pub now: DateTime<Utc>,
}

impl JobContext {
    pub fn new(job: Job, worker_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            job,
            worker_id: worker_id.into(),
            now,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn tenant_id(&self) -> Uuid {
        self.job.tenant_id
    }

    /// Get the job payload.
    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// 1-based number of this attempt.
    pub fn attempt(&self) -> i32 {
        self.job.attempts + 1
    }

    /// Parse the payload into the type's schema.
    pub fn parse_payload<T: PayloadSchema>(&self) -> Result<T> {
        parse_payload(&self.job.payload)
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed permanently; no further attempts.
    Failed(String),
    /// Transient failure; retried with backoff while attempts remain.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Schema check run by the enqueuer before anything is persisted.
    fn validate(&self, _payload: &JsonValue) -> Result<()> {
        Ok(())
    }

    /// Execute the job. Handlers must be idempotent: delivery is at-least-once.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// Handler for a job type whose work runs on the external batch API.
///
/// The enqueuer uses it to validate items and shape sub-requests; the
/// reconciliation handler uses it to turn each successful output into a
/// domain entity.
#[async_trait]
pub trait BatchJobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Schema check for one item of the batch payload.
    fn validate_item(&self, item: &JsonValue) -> Result<()>;

    /// Provider request parameters for the item at `index`.
    fn build_request(&self, index: usize, item: &JsonValue) -> Result<JsonValue>;

    /// Persist the entity for one successful item. Must be idempotent per
    /// `(job, index)`.
    async fn materialize(
        &self,
        job: &Job,
        index: usize,
        item: &JsonValue,
        output: &JsonValue,
    ) -> Result<MaterializedEntity>;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tutorq_core::payloads::RegenVariantPayload;
    use tutorq_core::NewJob;

    fn job(job_type: JobType, payload: JsonValue) -> Job {
        NewJob::pending(Uuid::new_v4(), Uuid::new_v4(), job_type, payload, Utc::now()).into_job()
    }

    #[test]
    fn test_job_context_accessors() {
        let job = job(JobType::RegenVariant, json!({"question_id": Uuid::nil()}));
        let ctx = JobContext::new(job.clone(), "worker-1", Utc::now());

        assert_eq!(ctx.job_id(), job.id);
        assert_eq!(ctx.tenant_id(), job.tenant_id);
        assert_eq!(ctx.attempt(), 1);
        assert_eq!(ctx.worker_id, "worker-1");

        let payload: RegenVariantPayload = ctx.parse_payload().unwrap();
        assert_eq!(payload.question_id, Uuid::nil());
    }

    #[test]
    fn test_job_context_parse_payload_rejects_wrong_shape() {
        let ctx = JobContext::new(
            job(JobType::RegenVariant, json!({"questionId": 1})),
            "worker-1",
            Utc::now(),
        );
        assert!(ctx.parse_payload::<RegenVariantPayload>().is_err());
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new(JobType::ReconcileStats);
        assert_eq!(handler.job_type(), JobType::ReconcileStats);
        assert!(handler.can_handle(JobType::ReconcileStats));
        assert!(!handler.can_handle(JobType::GeneratePdf));
        assert!(handler.validate(&json!({"anything": true})).is_ok());

        let ctx = JobContext::new(job(JobType::ReconcileStats, json!({})), "w", Utc::now());
        assert_eq!(handler.execute(ctx).await, JobResult::Success(None));
    }
}
