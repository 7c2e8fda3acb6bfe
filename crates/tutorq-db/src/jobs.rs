//! PostgreSQL job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use tutorq_core::{
    defaults, ClaimOptions, Error, Job, JobFilter, JobStatus, JobStore, JobType, NewJob,
    QueueStats, Result,
};

/// Columns returned by every job query, in `parse_job_row` order.
const JOB_COLUMNS: &str = "id, tenant_id, creator_id, job_type, status, priority, payload, result, \
     error, attempts, max_attempts, run_after, locked_by, locked_at, external_batch_id, \
     created_at, updated_at";

/// Candidate rows locked per claimed slot when a per-tenant cap is active.
const TENANT_CAP_SCAN_FACTOR: usize = 4;

/// Error recorded on rows reclaimed by the lease sweep.
pub const LEASE_EXPIRED_ERROR: &str = "lease expired";

/// PostgreSQL implementation of [`JobStore`] over the `job_queue` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: &PgRow) -> Result<Job> {
        let job_type: String = row.try_get("job_type")?;
        let status: String = row.try_get("status")?;
        Ok(Job {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            creator_id: row.try_get("creator_id")?,
            job_type: job_type.parse::<JobType>()?,
            status: status.parse::<JobStatus>()?,
            priority: row.try_get("priority")?,
            payload: row.try_get("payload")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            run_after: row.try_get("run_after")?,
            locked_by: row.try_get("locked_by")?,
            locked_at: row.try_get("locked_at")?,
            external_batch_id: row.try_get("external_batch_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn parse_job_rows(rows: &[PgRow]) -> Result<Vec<Job>> {
        rows.iter().map(Self::parse_job_row).collect()
    }

    fn lease_lost(job_id: Uuid, worker_id: &str) -> Error {
        Error::LeaseLost {
            job_id,
            worker_id: worker_id.to_string(),
        }
    }
}

/// How many pending rows the claim locks before applying the tenant cap.
fn claim_scan_size(limit: usize, options: ClaimOptions) -> usize {
    match options.per_tenant_limit {
        Some(_) => limit.saturating_mul(TENANT_CAP_SCAN_FACTOR),
        None => limit,
    }
}

/// `RETURNING` order is unspecified; restore claim order.
fn sort_claimed(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: NewJob) -> Result<Job> {
        let query = format!(
            "INSERT INTO job_queue (id, tenant_id, creator_id, job_type, status, priority, payload,
                                    max_attempts, run_after, external_batch_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(job.id)
            .bind(job.tenant_id)
            .bind(job.creator_id)
            .bind(job.job_type.as_str())
            .bind(job.status.as_str())
            .bind(job.priority)
            .bind(&job.payload)
            .bind(job.max_attempts)
            .bind(job.run_after)
            .bind(&job.external_batch_id)
            .bind(job.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_job_row(&row)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut conditions = Vec::new();
        let mut param_idx = 1;

        if filter.tenant_id.is_some() {
            conditions.push(format!("tenant_id = ${}", param_idx));
            param_idx += 1;
        }
        if filter.status.is_some() {
            conditions.push(format!("status = ${}", param_idx));
            param_idx += 1;
        }
        if filter.job_type.is_some() {
            conditions.push(format!("job_type = ${}", param_idx));
            param_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {JOB_COLUMNS}
             FROM job_queue
             {}
             ORDER BY created_at DESC, id DESC
             LIMIT ${} OFFSET ${}",
            where_clause,
            param_idx,
            param_idx + 1
        );

        let mut q = sqlx::query(&query);
        if let Some(tenant_id) = filter.tenant_id {
            q = q.bind(tenant_id);
        }
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(job_type) = filter.job_type {
            q = q.bind(job_type.as_str());
        }
        q = q
            .bind(filter.limit.unwrap_or(defaults::PAGE_LIMIT))
            .bind(filter.offset.unwrap_or(0));

        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;
        Self::parse_job_rows(&rows)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'batch_pending') AS batch_pending,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
                COUNT(*) AS total
             FROM job_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
            batch_pending: row.try_get("batch_pending")?,
            completed: row.try_get("completed")?,
            failed: row.try_get("failed")?,
            cancelled: row.try_get("cancelled")?,
            total: row.try_get("total")?,
        })
    }

    async fn claim(
        &self,
        worker_id: &str,
        limit: usize,
        now: DateTime<Utc>,
        options: ClaimOptions,
    ) -> Result<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // One statement: lock candidates with SKIP LOCKED so concurrent
        // dispatchers never see the same row, apply the optional tenant cap,
        // then flip the survivors to processing under this worker's lease.
        let query = format!(
            "WITH locked AS (
                 SELECT id, tenant_id, priority, created_at
                 FROM job_queue
                 WHERE status = 'pending' AND run_after <= $1
                 ORDER BY priority DESC, created_at ASC
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             ),
             ranked AS (
                 SELECT id, priority, created_at,
                        row_number() OVER (
                            PARTITION BY tenant_id ORDER BY priority DESC, created_at ASC
                        ) AS tenant_rank
                 FROM locked
             ),
             picked AS (
                 SELECT id FROM ranked
                 WHERE $3::int IS NULL OR tenant_rank <= $3::int
                 ORDER BY priority DESC, created_at ASC
                 LIMIT $4
             )
             UPDATE job_queue
             SET status = 'processing', locked_by = $5, locked_at = $1, updated_at = $1
             FROM picked
             WHERE job_queue.id = picked.id AND job_queue.status = 'pending'
             RETURNING {}",
            JOB_COLUMNS
                .split(", ")
                .map(|c| format!("job_queue.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let per_tenant = options
            .per_tenant_limit
            .map(|n| i32::try_from(n).unwrap_or(i32::MAX));

        let rows = sqlx::query(&query)
            .bind(now)
            .bind(claim_scan_size(limit, options) as i64)
            .bind(per_tenant)
            .bind(limit as i64)
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut jobs = Self::parse_job_rows(&rows)?;
        sort_claimed(&mut jobs);

        debug!(
            subsystem = "database",
            component = "jobs",
            op = "claim",
            worker_id,
            claimed = jobs.len(),
            "Claimed jobs"
        );
        Ok(jobs)
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let query = format!(
            "UPDATE job_queue
             SET locked_at = $3
             WHERE id = $1 AND locked_by = $2 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(worker_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(&row),
            None => Err(Self::lease_lost(job_id, worker_id)),
        }
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let query = format!(
            "UPDATE job_queue
             SET status = 'completed', result = $3, error = NULL,
                 locked_by = NULL, locked_at = NULL, updated_at = $4
             WHERE id = $1 AND locked_by = $2 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(worker_id)
            .bind(&result)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(&row),
            None => Err(Self::lease_lost(job_id, worker_id)),
        }
    }

    async fn retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        run_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let query = format!(
            "UPDATE job_queue
             SET status = 'pending', attempts = attempts + 1, error = $3, run_after = $4,
                 locked_by = NULL, locked_at = NULL, updated_at = $5
             WHERE id = $1 AND locked_by = $2 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(worker_id)
            .bind(error)
            .bind(run_after)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(&row),
            None => Err(Self::lease_lost(job_id, worker_id)),
        }
    }

    async fn fail(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let query = format!(
            "UPDATE job_queue
             SET status = 'failed', attempts = attempts + 1, error = $3, result = NULL,
                 locked_by = NULL, locked_at = NULL, updated_at = $4
             WHERE id = $1 AND locked_by = $2 AND status = 'processing'
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(worker_id)
            .bind(error)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Self::parse_job_row(&row),
            None => Err(Self::lease_lost(job_id, worker_id)),
        }
    }

    async fn sweep_expired_leases(
        &self,
        expired_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Job>> {
        // SET expressions see the pre-update row, so `attempts + 1` is the
        // same value in every branch.
        let query = format!(
            "UPDATE job_queue
             SET attempts = attempts + 1,
                 status = CASE WHEN attempts + 1 >= max_attempts THEN 'failed' ELSE 'pending' END,
                 error = $3,
                 locked_by = NULL, locked_at = NULL, updated_at = $2
             WHERE id IN (
                 SELECT id FROM job_queue
                 WHERE status = 'processing' AND locked_at < $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        let rows = sqlx::query(&query)
            .bind(expired_before)
            .bind(now)
            .bind(LEASE_EXPIRED_ERROR)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let jobs = Self::parse_job_rows(&rows)?;
        if !jobs.is_empty() {
            warn!(
                subsystem = "database",
                component = "jobs",
                op = "sweep",
                swept = jobs.len(),
                "Reclaimed expired job leases"
            );
        }
        Ok(jobs)
    }

    async fn list_batch_pending(&self, limit: i64) -> Result<Vec<Job>> {
        let query = format!(
            "SELECT {JOB_COLUMNS}
             FROM job_queue
             WHERE status = 'batch_pending' AND external_batch_id IS NOT NULL
             ORDER BY created_at ASC
             LIMIT $1"
        );

        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_job_rows(&rows)
    }

    async fn complete_batch(
        &self,
        job_id: Uuid,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let query = format!(
            "UPDATE job_queue
             SET status = 'completed', result = $2, error = NULL, updated_at = $3
             WHERE id = $1 AND status = 'batch_pending'
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(&result)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn fail_batch(
        &self,
        job_id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let query = format!(
            "UPDATE job_queue
             SET status = 'failed', error = $2, result = NULL, updated_at = $3
             WHERE id = $1 AND status = 'batch_pending'
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(error)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn cancel(&self, job_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Job> {
        let query = format!(
            "UPDATE job_queue
             SET status = 'cancelled', error = $2, updated_at = $3
             WHERE id = $1 AND status IN ('pending', 'batch_pending')
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(job_id)
            .bind(reason)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        if let Some(row) = row {
            return Self::parse_job_row(&row);
        }

        match self.get(job_id).await? {
            Some(job) => Err(Error::Conflict(format!(
                "job {} is {} and cannot be cancelled",
                job_id, job.status
            ))),
            None => Err(Error::JobNotFound(job_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_claim_scan_size_without_cap() {
        assert_eq!(claim_scan_size(10, ClaimOptions::default()), 10);
    }

    #[test]
    fn test_claim_scan_size_with_cap_widens_scan() {
        let options = ClaimOptions {
            per_tenant_limit: Some(1),
        };
        assert_eq!(claim_scan_size(10, options), 10 * TENANT_CAP_SCAN_FACTOR);
        assert_eq!(claim_scan_size(usize::MAX, options), usize::MAX);
    }

    #[test]
    fn test_sort_claimed_orders_by_priority_then_age() {
        let now = Utc::now();
        let tenant = Uuid::new_v4();
        let make = |priority: i32, age_secs: i64| {
            NewJob::pending(
                tenant,
                tenant,
                JobType::GeneratePdf,
                json!({}),
                now - Duration::seconds(age_secs),
            )
            .with_priority(priority)
            .into_job()
        };

        let mut jobs = vec![make(1, 100), make(5, 10), make(5, 50), make(3, 0)];
        sort_claimed(&mut jobs);

        let order: Vec<(i32, DateTime<Utc>)> =
            jobs.iter().map(|j| (j.priority, j.created_at)).collect();
        assert_eq!(order[0], (5, now - Duration::seconds(50)));
        assert_eq!(order[1], (5, now - Duration::seconds(10)));
        assert_eq!(order[2].0, 3);
        assert_eq!(order[3].0, 1);
    }

    #[test]
    fn test_job_columns_cover_every_field() {
        let columns: Vec<&str> = JOB_COLUMNS.split(", ").map(str::trim).collect();
        assert_eq!(columns.len(), 17);
        assert!(columns.contains(&"external_batch_id"));
        assert!(columns.contains(&"locked_at"));
    }
}
