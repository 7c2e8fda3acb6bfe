//! Core trait definitions for tutorq.
//!
//! These traits define the seams between the queue engine and its
//! collaborators: the durable job store, the external batch API, and the
//! domain tables reconciliation writes into.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{
    BatchPoll, BatchRequest, ClaimOptions, Job, JobFilter, MaterializedEntity, NewEntity, NewJob,
    QueueStats, Result,
};

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable job table. The table is the queue.
///
/// Every post-claim mutation (`complete`, `retry`, `fail`) is conditional on
/// the caller still holding the lease (`status = processing AND locked_by =
/// worker_id`) and returns [`crate::Error::LeaseLost`] otherwise.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new row exactly as described.
    async fn insert(&self, job: NewJob) -> Result<Job>;

    /// Get job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    /// List jobs with filtering, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Counts per status.
    async fn stats(&self) -> Result<QueueStats>;

    /// Atomically lease up to `limit` eligible pending rows
    /// (`run_after <= now`), ordered by priority DESC, created_at ASC.
    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        now: DateTime<Utc>,
        options: ClaimOptions,
    ) -> Result<Vec<Job>>;

    /// Refresh `locked_at` on a row this worker still leases.
    ///
    /// Fails with `LeaseLost` once the row was swept or re-claimed.
    async fn renew_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job>;

    /// Leased job succeeded: completed, result set, error and lease cleared.
    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Job>;

    /// Leased job failed transiently: attempts + 1, back to pending at `run_after`.
    async fn retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        run_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Job>;

    /// Leased job failed for good: attempts + 1, failed, error set, lease cleared.
    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Job>;

    /// Reclaim rows whose lease was taken before `expired_before`.
    ///
    /// Each swept row counts as one failed attempt: it returns to pending, or
    /// to failed when that attempt exhausts `max_attempts`.
    async fn sweep_expired_leases(
        &self,
        expired_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>>;

    /// batch_pending rows with an external handle, oldest first.
    async fn list_batch_pending(&self, limit: i64) -> Result<Vec<Job>>;

    /// batch_pending → completed. `None` when the row is no longer batch_pending.
    async fn complete_batch(
        &self,
        job_id: Uuid,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// batch_pending → failed. `None` when the row is no longer batch_pending.
    async fn fail_batch(
        &self,
        job_id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// pending/batch_pending → cancelled.
    ///
    /// Fails with `JobNotFound` for unknown ids and `Conflict` for leased or
    /// terminal jobs.
    async fn cancel(&self, job_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Job>;
}

// =============================================================================
// EXTERNAL BATCH API
// =============================================================================

/// External asynchronous batch API. A black box to the engine.
#[async_trait]
pub trait BatchApi: Send + Sync {
    /// Submit sub-requests; returns the provider's batch handle.
    async fn submit(&self, requests: &[BatchRequest]) -> Result<String>;

    /// Current state of a previously submitted batch.
    async fn poll(&self, batch_id: &str) -> Result<BatchPoll>;
}

// =============================================================================
// DOMAIN ENTITIES
// =============================================================================

/// Domain table written by reconciliation.
#[async_trait]
pub trait EntitySink: Send + Sync {
    /// Insert unless an entity with the same `(job_id, item_index)` exists.
    async fn materialize(&self, entity: NewEntity) -> Result<MaterializedEntity>;

    /// Entities produced by a job.
    async fn count_for_job(&self, job_id: Uuid) -> Result<i64>;
}
