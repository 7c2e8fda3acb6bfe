//! Typed payload schemas, one per job type.
//!
//! The enqueuer validates JSON payloads against these before anything is
//! written, and handlers parse them again at execution time.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

/// Upper bound for questions requested per material.
pub const MAX_QUESTIONS_PER_REQUEST: u32 = 50;

/// A payload type with field-level checks beyond what serde enforces.
pub trait PayloadSchema: DeserializeOwned {
    /// Field-level checks; the message becomes a validation error.
    fn check(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

/// Deserialize and check a payload, mapping any failure to `Error::Validation`.
pub fn parse_payload<T: PayloadSchema>(payload: &JsonValue) -> Result<T> {
    let parsed: T = serde_json::from_value(payload.clone())
        .map_err(|e| Error::Validation(format!("malformed payload: {}", e)))?;
    parsed.check().map_err(Error::Validation)?;
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractMaterialPayload {
    pub material_id: Uuid,
    pub storage_path: String,
}

impl PayloadSchema for ExtractMaterialPayload {
    fn check(&self) -> std::result::Result<(), String> {
        if self.storage_path.trim().is_empty() {
            return Err("storage_path must not be empty".to_string());
        }
        Ok(())
    }
}

/// Also the item schema of GENERATE_QUESTIONS_BATCH.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateQuestionsPayload {
    pub material_id: Uuid,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
}

impl PayloadSchema for GenerateQuestionsPayload {
    fn check(&self) -> std::result::Result<(), String> {
        if self.count == 0 || self.count > MAX_QUESTIONS_PER_REQUEST {
            return Err(format!(
                "count must be between 1 and {}, got {}",
                MAX_QUESTIONS_PER_REQUEST, self.count
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratePdfPayload {
    pub worksheet_id: Uuid,
    #[serde(default)]
    pub include_answers: bool,
}

impl PayloadSchema for GeneratePdfPayload {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegenVariantPayload {
    pub question_id: Uuid,
}

impl PayloadSchema for RegenVariantPayload {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DailySpacedRepRefreshPayload {
    /// Day to refresh; defaults to the current UTC day.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl PayloadSchema for DailySpacedRepRefreshPayload {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessBatchResultPayload {
    /// Reconcile only this batch job.
    #[serde(default)]
    pub job_id: Option<Uuid>,
    /// Batches inspected per pass.
    #[serde(default)]
    pub limit: Option<i64>,
}

impl ProcessBatchResultPayload {
    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(defaults::RECONCILE_BATCH_LIMIT)
    }
}

impl PayloadSchema for ProcessBatchResultPayload {
    fn check(&self) -> std::result::Result<(), String> {
        match self.limit {
            Some(limit) if !(1..=defaults::RECONCILE_BATCH_LIMIT_MAX).contains(&limit) => Err(
                format!(
                    "limit must be between 1 and {}, got {}",
                    defaults::RECONCILE_BATCH_LIMIT_MAX,
                    limit
                ),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateEmbeddingsPayload {
    pub entity_ids: Vec<Uuid>,
}

impl PayloadSchema for GenerateEmbeddingsPayload {
    fn check(&self) -> std::result::Result<(), String> {
        if self.entity_ids.is_empty() {
            return Err("entity_ids must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileStatsPayload {}

impl PayloadSchema for ReconcileStatsPayload {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshMaterializedViewsPayload {
    /// Views to refresh; all known views when absent.
    #[serde(default)]
    pub views: Option<Vec<String>>,
}

impl PayloadSchema for RefreshMaterializedViewsPayload {
    fn check(&self) -> std::result::Result<(), String> {
        if let Some(views) = &self.views {
            if views.iter().any(|v| v.trim().is_empty()) {
                return Err("view names must not be empty".to_string());
            }
        }
        Ok(())
    }
}
