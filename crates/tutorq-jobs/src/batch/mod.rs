//! Batch submission adapter.
//!
//! Work for batched job types is handed to an external asynchronous batch API
//! first; the job row is written only once the provider has accepted the
//! batch, as `batch_pending` with the provider's handle.

pub mod http;
pub mod mock;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};
use uuid::Uuid;

use tutorq_core::{BatchApi, BatchRequest, Job, JobStore, NewJob, Result};

use crate::handler::BatchJobHandler;

pub use http::{HttpBatchApi, HttpBatchConfig};
pub use mock::{MockBatchApi, MockBatchCall};

/// Submits item arrays to the batch API and records the resulting job.
#[derive(Clone)]
pub struct BatchSubmitter {
    store: Arc<dyn JobStore>,
    api: Arc<dyn BatchApi>,
}

impl BatchSubmitter {
    pub fn new(store: Arc<dyn JobStore>, api: Arc<dyn BatchApi>) -> Self {
        Self { store, api }
    }

    /// Sub-requests for `items`, one per item, `custom_id = item-<index>`.
    pub fn build_requests(
        handler: &dyn BatchJobHandler,
        items: &[JsonValue],
    ) -> Result<Vec<BatchRequest>> {
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                handler
                    .build_request(index, item)
                    .map(|params| BatchRequest::for_item(index, params))
            })
            .collect()
    }

    /// Submit and persist. On submission failure nothing is written.
    pub async fn submit(
        &self,
        handler: &dyn BatchJobHandler,
        tenant_id: Uuid,
        creator_id: Uuid,
        items: Vec<JsonValue>,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let job_type = handler.job_type();
        let requests = Self::build_requests(handler, &items)?;

        let batch_id = match self.api.submit(&requests).await {
            Ok(batch_id) => batch_id,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "batch",
                    op = "submit",
                    job_type = %job_type,
                    tenant_id = %tenant_id,
                    error = %e,
                    "Batch submission failed"
                );
                return Err(e);
            }
        };

        let new_job = NewJob::batch_pending(
            tenant_id,
            creator_id,
            job_type,
            items,
            batch_id.clone(),
            now,
        )
        .with_max_attempts(max_attempts);
        match self.store.insert(new_job).await {
            Ok(job) => {
                info!(
                    subsystem = "jobs",
                    component = "batch",
                    op = "submit",
                    job_id = %job.id,
                    job_type = %job_type,
                    batch_id = %batch_id,
                    items = requests.len(),
                    "Batch submitted"
                );
                Ok(job)
            }
            Err(e) => {
                // The provider holds a batch nobody will reconcile.
                error!(
                    subsystem = "jobs",
                    component = "batch",
                    op = "submit",
                    job_type = %job_type,
                    batch_id = %batch_id,
                    error = %e,
                    "Batch accepted by provider but job row could not be written"
                );
                Err(e)
            }
        }
    }
}
