//! Job queue domain models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::Error;

// =============================================================================
// JOB TYPE
// =============================================================================

/// Type of job to process. Selects the handler in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Extract text and structure from an uploaded study material
    ExtractMaterial,
    /// Generate practice questions for one material, synchronously
    GenerateQuestions,
    /// Generate questions for many materials through the external batch API
    GenerateQuestionsBatch,
    /// Render a worksheet to PDF
    GeneratePdf,
    /// Regenerate a variant of an existing question
    RegenVariant,
    /// Nightly spaced-repetition schedule refresh
    DailySpacedRepRefresh,
    /// Reconcile outstanding external batches
    ProcessBatchResult,
    /// Compute embeddings for domain entities
    GenerateEmbeddings,
    /// Recompute aggregate statistics
    ReconcileStats,
    /// Refresh reporting materialized views
    RefreshMaterializedViews,
}

impl JobType {
    /// Every job type, in declaration order.
    pub const ALL: [JobType; 10] = [
        JobType::ExtractMaterial,
        JobType::GenerateQuestions,
        JobType::GenerateQuestionsBatch,
        JobType::GeneratePdf,
        JobType::RegenVariant,
        JobType::DailySpacedRepRefresh,
        JobType::ProcessBatchResult,
        JobType::GenerateEmbeddings,
        JobType::ReconcileStats,
        JobType::RefreshMaterializedViews,
    ];

    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ExtractMaterial => "extract_material",
            JobType::GenerateQuestions => "generate_questions",
            JobType::GenerateQuestionsBatch => "generate_questions_batch",
            JobType::GeneratePdf => "generate_pdf",
            JobType::RegenVariant => "regen_variant",
            JobType::DailySpacedRepRefresh => "daily_spaced_rep_refresh",
            JobType::ProcessBatchResult => "process_batch_result",
            JobType::GenerateEmbeddings => "generate_embeddings",
            JobType::ReconcileStats => "reconcile_stats",
            JobType::RefreshMaterializedViews => "refresh_materialized_views",
        }
    }

    /// Default priority for this job type (higher = more urgent).
    pub fn default_priority(&self) -> i32 {
        match self {
            // A user is usually waiting on these
            JobType::GeneratePdf => 8,
            JobType::RegenVariant => 7,
            JobType::GenerateQuestions => 6,
            JobType::ExtractMaterial => 5,
            JobType::ProcessBatchResult => 4,
            JobType::GenerateEmbeddings => 3,
            JobType::GenerateQuestionsBatch => 2,
            // Nightly maintenance
            JobType::DailySpacedRepRefresh => 1,
            JobType::ReconcileStats => 0,
            JobType::RefreshMaterializedViews => 0,
        }
    }

    /// Whether work of this type is delegated to the external batch API.
    pub fn is_batched(&self) -> bool {
        matches!(self, JobType::GenerateQuestionsBatch)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    /// Accepts the snake_case form and the upper-case form (`GENERATE_PDF`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        JobType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| Error::Validation(format!("unknown job type: {}", s)))
    }
}

// =============================================================================
// JOB STATUS
// =============================================================================

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `run_after` and a dispatcher.
    Pending,
    /// Leased by a dispatcher invocation.
    Processing,
    /// Submitted to the external batch API, waiting for reconciliation.
    BatchPending,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Database / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::BatchPending => "batch_pending",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "batch_pending" => Ok(JobStatus::BatchPending),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(Error::Validation(format!("unknown job status: {}", other))),
        }
    }
}

// =============================================================================
// JOB
// =============================================================================

/// A row of the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub creator_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: JsonValue,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_after: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub external_batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether `worker_id` currently holds the lease on this job.
    pub fn is_leased_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Processing && self.locked_by.as_deref() == Some(worker_id)
    }

    /// Attempts left before the job fails permanently.
    pub fn remaining_attempts(&self) -> i32 {
        (self.max_attempts - self.attempts).max(0)
    }
}

/// Insert request for a new job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub creator_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: JsonValue,
    pub max_attempts: i32,
    pub run_after: DateTime<Utc>,
    pub external_batch_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    /// A pending job eligible at `run_after`.
    pub fn pending(
        tenant_id: Uuid,
        creator_id: Uuid,
        job_type: JobType,
        payload: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            creator_id,
            job_type,
            status: JobStatus::Pending,
            priority: job_type.default_priority(),
            payload,
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            run_after: now,
            external_batch_id: None,
            created_at: now,
        }
    }

    /// A placeholder for work already submitted to the external batch API.
    pub fn batch_pending(
        tenant_id: Uuid,
        creator_id: Uuid,
        job_type: JobType,
        items: Vec<JsonValue>,
        external_batch_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            status: JobStatus::BatchPending,
            external_batch_id: Some(external_batch_id),
            ..Self::pending(tenant_id, creator_id, job_type, JsonValue::Array(items), now)
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_run_after(mut self, run_after: DateTime<Utc>) -> Self {
        self.run_after = run_after;
        self
    }

    /// Materialize the row as the store would return it right after insert.
    pub fn into_job(self) -> Job {
        Job {
            id: self.id,
            tenant_id: self.tenant_id,
            creator_id: self.creator_id,
            job_type: self.job_type,
            status: self.status,
            priority: self.priority,
            payload: self.payload,
            result: None,
            error: None,
            attempts: 0,
            max_attempts: self.max_attempts,
            run_after: self.run_after,
            locked_by: None,
            locked_at: None,
            external_batch_id: self.external_batch_id,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Options for the atomic claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimOptions {
    /// Maximum rows one tenant may have claimed in a single pass. `None` = no cap.
    pub per_tenant_limit: Option<u32>,
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub tenant_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub batch_pending: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

// =============================================================================
// EXTERNAL BATCH API
// =============================================================================

/// One sub-request of an external batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Correlates the request with its result; `item-<index>`.
    pub custom_id: String,
    /// Provider-specific request body.
    pub params: JsonValue,
}

impl BatchRequest {
    pub fn for_item(index: usize, params: JsonValue) -> Self {
        Self {
            custom_id: item_custom_id(index),
            params,
        }
    }
}

/// `custom_id` used for the item at `index`.
pub fn item_custom_id(index: usize) -> String {
    format!("item-{}", index)
}

/// Inverse of [`item_custom_id`].
pub fn parse_item_custom_id(custom_id: &str) -> Option<usize> {
    custom_id.strip_prefix("item-")?.parse().ok()
}

/// Outcome of one sub-request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Succeeded { output: JsonValue },
    Errored { message: String },
}

/// Result for one sub-request of a finished batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub custom_id: String,
    pub outcome: BatchItemOutcome,
}

/// Status of an external batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchPoll {
    /// Still processing on the provider side.
    Running,
    /// Finished; one entry per sub-request the provider reported.
    Complete(Vec<BatchItemResult>),
    /// The batch as a whole is gone (expired, cancelled by the provider).
    Failed(String),
}

// =============================================================================
// MATERIALIZED ENTITIES
// =============================================================================

/// Domain entity produced by reconciling one batch item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub job_id: Uuid,
    pub item_index: i32,
    pub tenant_id: Uuid,
    pub creator_id: Uuid,
    pub kind: String,
    pub content: JsonValue,
}

/// Stored entity reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedEntity {
    pub id: Uuid,
    /// False when an entity for the same `(job_id, item_index)` already existed.
    pub created: bool,
}
