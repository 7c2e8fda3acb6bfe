//! In-memory job store and entity sink.
//!
//! Same transition rules as the PostgreSQL store, with a single mutex standing
//! in for row locks: every operation, including the multi-row claim, runs
//! under one lock acquisition and is therefore atomic. Used by the test suites
//! and for running the worker without a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use uuid::Uuid;

use tutorq_core::{
    defaults, ClaimOptions, EntitySink, Error, Job, JobFilter, JobStatus, JobStore,
    MaterializedEntity, NewEntity, NewJob, QueueStats, Result,
};

use crate::jobs::LEASE_EXPIRED_ERROR;

/// Ordering used by the claim: priority DESC, created_at ASC, id ASC.
fn claim_order(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Job store backed by a `HashMap` behind a mutex.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Apply `update` to a leased row, or report the lease as lost.
    async fn update_leased<F>(&self, job_id: Uuid, worker_id: &str, update: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.is_leased_by(worker_id) => {
                update(job);
                job.locked_by = None;
                job.locked_at = None;
                Ok(job.clone())
            }
            _ => Err(Error::LeaseLost {
                job_id,
                worker_id: worker_id.to_string(),
            }),
        }
    }

    /// Apply `update` to a batch_pending row; `None` if the row moved on.
    async fn update_batch_pending<F>(&self, job_id: Uuid, update: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id)?;
        if job.status != JobStatus::BatchPending {
            return None;
        }
        update(job);
        Some(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewJob) -> Result<Job> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(Error::Conflict(format!("job {} already exists", job.id)));
        }
        let job = job.into_job();
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|j| filter.tenant_id.map_or(true, |t| j.tenant_id == t))
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| filter.job_type.map_or(true, |t| j.job_type == t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(defaults::PAGE_LIMIT).max(0) as usize;
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let jobs = self.jobs.lock().await;
        let mut stats = QueueStats::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::BatchPending => stats.batch_pending += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        now: DateTime<Utc>,
        options: ClaimOptions,
    ) -> Result<Vec<Job>> {
        let mut jobs = self.jobs.lock().await;

        let mut eligible: Vec<&Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.run_after <= now)
            .collect();
        eligible.sort_by(|a, b| claim_order(a, b));

        let mut per_tenant: HashMap<Uuid, u32> = HashMap::new();
        let mut picked = Vec::new();
        for job in eligible {
            if picked.len() >= limit {
                break;
            }
            if let Some(cap) = options.per_tenant_limit {
                let taken = per_tenant.entry(job.tenant_id).or_insert(0);
                if *taken >= cap {
                    continue;
                }
                *taken += 1;
            }
            picked.push(job.id);
        }

        let mut claimed = Vec::with_capacity(picked.len());
        for id in picked {
            if let Some(job) = jobs.get_mut(&id) {
                job.status = JobStatus::Processing;
                job.locked_by = Some(worker_id.to_string());
                job.locked_at = Some(now);
                job.updated_at = now;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.is_leased_by(worker_id) => {
                job.locked_at = Some(now);
                Ok(job.clone())
            }
            _ => Err(Error::LeaseLost {
                job_id,
                worker_id: worker_id.to_string(),
            }),
        }
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        self.update_leased(job_id, worker_id, |job| {
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.error = None;
            job.updated_at = now;
        })
        .await
    }

    async fn retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        run_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        self.update_leased(job_id, worker_id, |job| {
            job.status = JobStatus::Pending;
            job.attempts += 1;
            job.error = Some(error.to_string());
            job.run_after = run_after;
            job.updated_at = now;
        })
        .await
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        self.update_leased(job_id, worker_id, |job| {
            job.status = JobStatus::Failed;
            job.attempts += 1;
            job.error = Some(error.to_string());
            job.result = None;
            job.updated_at = now;
        })
        .await
    }

    async fn sweep_expired_leases(
        &self,
        expired_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>> {
        let mut jobs = self.jobs.lock().await;
        let mut swept = Vec::new();
        for job in jobs.values_mut() {
            let expired = job.status == JobStatus::Processing
                && job.locked_at.map_or(false, |at| at < expired_before);
            if !expired {
                continue;
            }
            job.attempts += 1;
            job.status = if job.attempts >= job.max_attempts {
                JobStatus::Failed
            } else {
                JobStatus::Pending
            };
            job.error = Some(LEASE_EXPIRED_ERROR.to_string());
            job.locked_by = None;
            job.locked_at = None;
            job.updated_at = now;
            swept.push(job.clone());
        }
        Ok(swept)
    }

    async fn list_batch_pending(&self, limit: i64) -> Result<Vec<Job>> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::BatchPending && j.external_batch_id.is_some())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn complete_batch(
        &self,
        job_id: Uuid,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        Ok(self
            .update_batch_pending(job_id, |job| {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.error = None;
                job.updated_at = now;
            })
            .await)
    }

    async fn fail_batch(
        &self,
        job_id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        Ok(self
            .update_batch_pending(job_id, |job| {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
                job.result = None;
                job.updated_at = now;
            })
            .await)
    }

    async fn cancel(&self, job_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&job_id).ok_or(Error::JobNotFound(job_id))?;
        match job.status {
            JobStatus::Pending | JobStatus::BatchPending => {
                job.status = JobStatus::Cancelled;
                job.error = Some(reason.to_string());
                job.updated_at = now;
                Ok(job.clone())
            }
            other => Err(Error::Conflict(format!(
                "job {} is {} and cannot be cancelled",
                job_id, other
            ))),
        }
    }
}

/// Entity sink keyed on `(job_id, item_index)`.
#[derive(Clone, Default)]
pub struct MemoryEntitySink {
    entities: Arc<Mutex<HashMap<(Uuid, i32), StoredEntity>>>,
}

/// An entity as held by [`MemoryEntitySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub id: Uuid,
    pub entity: NewEntity,
}

impl MemoryEntitySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entities of one job ordered by item index.
    pub async fn entities_for_job(&self, job_id: Uuid) -> Vec<StoredEntity> {
        let entities = self.entities.lock().await;
        let mut found: Vec<StoredEntity> = entities
            .iter()
            .filter(|((owner, _), _)| *owner == job_id)
            .map(|(_, stored)| stored.clone())
            .collect();
        found.sort_by_key(|stored| stored.entity.item_index);
        found
    }

    pub async fn total(&self) -> usize {
        self.entities.lock().await.len()
    }
}

#[async_trait]
impl EntitySink for MemoryEntitySink {
    async fn materialize(&self, entity: NewEntity) -> Result<MaterializedEntity> {
        let mut entities = self.entities.lock().await;
        let key = (entity.job_id, entity.item_index);
        if let Some(existing) = entities.get(&key) {
            return Ok(MaterializedEntity {
                id: existing.id,
                created: false,
            });
        }
        let id = Uuid::now_v7();
        entities.insert(key, StoredEntity { id, entity });
        Ok(MaterializedEntity { id, created: true })
    }

    async fn count_for_job(&self, job_id: Uuid) -> Result<i64> {
        let entities = self.entities.lock().await;
        Ok(entities.keys().filter(|(owner, _)| *owner == job_id).count() as i64)
    }
}
