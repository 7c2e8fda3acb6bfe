//! PROCESS_BATCH_RESULT: reconcile outstanding external batches.
//!
//! Each pass lists batch_pending jobs oldest first, polls the provider, and
//! for finished batches materializes one entity per successful item before
//! flipping the job to completed. Re-running a pass is safe: completed jobs are
//! no longer listed, the entity sink deduplicates on `(job_id, item_index)`,
//! and the completed transition only applies to rows still batch_pending.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tutorq_core::payloads::ProcessBatchResultPayload;
use tutorq_core::{
    item_custom_id, parse_payload, BatchApi, BatchItemOutcome, BatchPoll, Clock, Error, Job,
    JobStatus, JobStore, JobType, Result,
};

use crate::handler::{BatchJobHandler, JobContext, JobHandler, JobResult};

/// Summary returned as the reconciliation job's own result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub checked: u32,
    pub still_running: u32,
    pub reconciled: u32,
    pub failed_batches: u32,
    pub poll_errors: u32,
}

/// Per-item line of a batch report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub index: usize,
    pub custom_id: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result stored on a reconciled batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub succeeded: u32,
    pub failed: u32,
    pub items: Vec<ItemReport>,
}

/// What happened to one batch during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    StillRunning,
    Reconciled,
    FailedBatch,
    /// The row left batch_pending while we were working on it.
    AlreadySettled,
}

/// Handler for [`JobType::ProcessBatchResult`].
pub struct ReconciliationHandler {
    batch_handlers: HashMap<JobType, Arc<dyn BatchJobHandler>>,
    store: Arc<dyn JobStore>,
    batch_api: Arc<dyn BatchApi>,
    clock: Arc<dyn Clock>,
}

impl ReconciliationHandler {
    pub fn new(
        batch_handlers: HashMap<JobType, Arc<dyn BatchJobHandler>>,
        store: Arc<dyn JobStore>,
        batch_api: Arc<dyn BatchApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            batch_handlers,
            store,
            batch_api,
            clock,
        }
    }

    async fn candidates(&self, payload: &ProcessBatchResultPayload) -> Result<Vec<Job>> {
        match payload.job_id {
            Some(job_id) => {
                let job = self.store.get(job_id).await?;
                Ok(job
                    .filter(|j| j.status == JobStatus::BatchPending && j.external_batch_id.is_some())
                    .into_iter()
                    .collect())
            }
            None => self.store.list_batch_pending(payload.effective_limit()).await,
        }
    }

    async fn reconcile_batch(&self, job: &Job) -> Result<BatchOutcome> {
        let batch_id = job
            .external_batch_id
            .as_deref()
            .ok_or_else(|| Error::Internal(format!("job {} has no external batch id", job.id)))?;

        let results = match self.batch_api.poll(batch_id).await? {
            BatchPoll::Running => {
                debug!(job_id = %job.id, batch_id, "Batch still running");
                return Ok(BatchOutcome::StillRunning);
            }
            BatchPoll::Failed(reason) => {
                warn!(job_id = %job.id, batch_id, %reason, "External batch failed");
                let updated = self
                    .store
                    .fail_batch(job.id, &reason, self.clock.now())
                    .await?;
                return Ok(match updated {
                    Some(_) => BatchOutcome::FailedBatch,
                    None => BatchOutcome::AlreadySettled,
                });
            }
            BatchPoll::Complete(results) => results,
        };

        let handler = match self.batch_handlers.get(&job.job_type) {
            Some(handler) => handler,
            None => {
                let reason = format!("no batch handler registered for job type {}", job.job_type);
                let updated = self.store.fail_batch(job.id, &reason, self.clock.now()).await?;
                return Ok(match updated {
                    Some(_) => BatchOutcome::FailedBatch,
                    None => BatchOutcome::AlreadySettled,
                });
            }
        };

        let items = job.payload.as_array().cloned().unwrap_or_default();
        let mut outcomes: HashMap<String, BatchItemOutcome> = results
            .into_iter()
            .map(|r| (r.custom_id, r.outcome))
            .collect();

        let mut report = BatchReport {
            batch_id: batch_id.to_string(),
            succeeded: 0,
            failed: 0,
            items: Vec::with_capacity(items.len()),
        };

        for (index, item) in items.iter().enumerate() {
            let custom_id = item_custom_id(index);
            let line = match outcomes.remove(&custom_id) {
                Some(BatchItemOutcome::Succeeded { output }) => {
                    match handler.materialize(job, index, item, &output).await {
                        Ok(entity) => ItemReport {
                            index,
                            custom_id,
                            succeeded: true,
                            entity_id: Some(entity.id),
                            error: None,
                        },
                        Err(e) => ItemReport {
                            index,
                            custom_id,
                            succeeded: false,
                            entity_id: None,
                            error: Some(e.to_string()),
                        },
                    }
                }
                Some(BatchItemOutcome::Errored { message }) => ItemReport {
                    index,
                    custom_id,
                    succeeded: false,
                    entity_id: None,
                    error: Some(message),
                },
                None => ItemReport {
                    index,
                    custom_id,
                    succeeded: false,
                    entity_id: None,
                    error: Some("no result returned for item".to_string()),
                },
            };

            if line.succeeded {
                report.succeeded += 1;
            } else {
                debug!(job_id = %job.id, index, error = ?line.error, "Batch item failed");
                report.failed += 1;
            }
            report.items.push(line);
        }

        let succeeded = report.succeeded;
        let failed = report.failed;
        let updated = self
            .store
            .complete_batch(job.id, serde_json::to_value(&report)?, self.clock.now())
            .await?;

        match updated {
            Some(_) => {
                info!(
                    job_id = %job.id,
                    batch_id,
                    succeeded,
                    failed,
                    "Batch reconciled"
                );
                Ok(BatchOutcome::Reconciled)
            }
            None => Ok(BatchOutcome::AlreadySettled),
        }
    }
}

#[async_trait]
impl JobHandler for ReconciliationHandler {
    fn job_type(&self) -> JobType {
        JobType::ProcessBatchResult
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        parse_payload::<ProcessBatchResultPayload>(payload).map(|_| ())
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: ProcessBatchResultPayload = match ctx.parse_payload() {
            Ok(payload) => payload,
            Err(e) => return JobResult::Failed(e.to_string()),
        };

        let jobs = match self.candidates(&payload).await {
            Ok(jobs) => jobs,
            Err(e) => return JobResult::Retry(format!("failed to list batch jobs: {}", e)),
        };

        let mut summary = ReconcileSummary::default();
        for job in &jobs {
            summary.checked += 1;
            match self.reconcile_batch(job).await {
                Ok(BatchOutcome::StillRunning) => summary.still_running += 1,
                Ok(BatchOutcome::Reconciled) => summary.reconciled += 1,
                Ok(BatchOutcome::FailedBatch) => summary.failed_batches += 1,
                Ok(BatchOutcome::AlreadySettled) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Batch reconciliation error");
                    summary.poll_errors += 1;
                }
            }
        }

        if summary.checked > 0 && summary.poll_errors == summary.checked {
            return JobResult::Retry(format!(
                "all {} batch polls failed",
                summary.poll_errors
            ));
        }

        info!(
            job_id = %ctx.job_id(),
            checked = summary.checked,
            reconciled = summary.reconciled,
            still_running = summary.still_running,
            failed_batches = summary.failed_batches,
            poll_errors = summary.poll_errors,
            "Reconciliation pass finished"
        );

        match serde_json::to_value(&summary) {
            Ok(value) => JobResult::Success(Some(value)),
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}
