//! Scheduled maintenance handlers.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::info;

use tutorq_core::payloads::{
    DailySpacedRepRefreshPayload, ReconcileStatsPayload, RefreshMaterializedViewsPayload,
};
use tutorq_core::{JobType, Result};

use super::{parse_or_fail, validate_as};
use crate::handler::{JobContext, JobHandler, JobResult};

/// Views refreshed when the payload names none.
pub const DEFAULT_VIEWS: &[&str] = &["tenant_usage_daily", "student_progress_summary"];

pub struct DailySpacedRepRefreshHandler;

#[async_trait]
impl JobHandler for DailySpacedRepRefreshHandler {
    fn job_type(&self) -> JobType {
        JobType::DailySpacedRepRefresh
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        validate_as::<DailySpacedRepRefreshPayload>(payload)
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: DailySpacedRepRefreshPayload = match parse_or_fail(&ctx) {
            Ok(p) => p,
            Err(failed) => return failed,
        };
        let date = payload.date.unwrap_or_else(|| ctx.now.date_naive());
        info!(job_id = %ctx.job_id(), %date, "Spaced repetition refresh");
        JobResult::Success(Some(json!({ "date": date })))
    }
}

pub struct ReconcileStatsHandler;

#[async_trait]
impl JobHandler for ReconcileStatsHandler {
    fn job_type(&self) -> JobType {
        JobType::ReconcileStats
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        validate_as::<ReconcileStatsPayload>(payload)
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        if let Err(failed) = parse_or_fail::<ReconcileStatsPayload>(&ctx) {
            return failed;
        }
        JobResult::Success(Some(json!({ "as_of": ctx.now })))
    }
}

pub struct RefreshMaterializedViewsHandler;

#[async_trait]
impl JobHandler for RefreshMaterializedViewsHandler {
    fn job_type(&self) -> JobType {
        JobType::RefreshMaterializedViews
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        validate_as::<RefreshMaterializedViewsPayload>(payload)
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: RefreshMaterializedViewsPayload = match parse_or_fail(&ctx) {
            Ok(p) => p,
            Err(failed) => return failed,
        };
        let views = payload
            .views
            .unwrap_or_else(|| DEFAULT_VIEWS.iter().map(|v| v.to_string()).collect());
        info!(job_id = %ctx.job_id(), views = views.len(), "Refreshing materialized views");
        JobResult::Success(Some(json!({ "refreshed": views })))
    }
}
