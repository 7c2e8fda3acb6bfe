//! Content pipeline handlers.
//!
//! Rendering, extraction and AI generation live outside this engine. These
//! handlers check their payload and report the artifact the downstream
//! service would produce, deterministically, so re-delivery is harmless.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use tutorq_core::payloads::{
    ExtractMaterialPayload, GenerateEmbeddingsPayload, GeneratePdfPayload,
    GenerateQuestionsPayload, RegenVariantPayload,
};
use tutorq_core::{JobType, Result};

use super::{parse_or_fail, validate_as};
use crate::handler::{JobContext, JobHandler, JobResult};

pub struct ExtractMaterialHandler;

#[async_trait]
impl JobHandler for ExtractMaterialHandler {
    fn job_type(&self) -> JobType {
        JobType::ExtractMaterial
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        validate_as::<ExtractMaterialPayload>(payload)
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: ExtractMaterialPayload = match parse_or_fail(&ctx) {
            Ok(p) => p,
            Err(failed) => return failed,
        };
        debug!(job_id = %ctx.job_id(), material_id = %payload.material_id, "Extracting material");
        JobResult::Success(Some(json!({
            "material_id": payload.material_id,
            "source": payload.storage_path,
            "artifact": format!("materials/{}/extracted.json", payload.material_id),
        })))
    }
}

pub struct GenerateQuestionsHandler;

#[async_trait]
impl JobHandler for GenerateQuestionsHandler {
    fn job_type(&self) -> JobType {
        JobType::GenerateQuestions
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        validate_as::<GenerateQuestionsPayload>(payload)
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: GenerateQuestionsPayload = match parse_or_fail(&ctx) {
            Ok(p) => p,
            Err(failed) => return failed,
        };
        debug!(
            job_id = %ctx.job_id(),
            material_id = %payload.material_id,
            count = payload.count,
            "Generating questions"
        );
        JobResult::Success(Some(json!({
            "material_id": payload.material_id,
            "count": payload.count,
            "artifact": format!("materials/{}/questions.json", payload.material_id),
        })))
    }
}

pub struct GeneratePdfHandler;

#[async_trait]
impl JobHandler for GeneratePdfHandler {
    fn job_type(&self) -> JobType {
        JobType::GeneratePdf
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        validate_as::<GeneratePdfPayload>(payload)
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: GeneratePdfPayload = match parse_or_fail(&ctx) {
            Ok(p) => p,
            Err(failed) => return failed,
        };
        let artifact = if payload.include_answers {
            format!("worksheets/{}-answers.pdf", payload.worksheet_id)
        } else {
            format!("worksheets/{}.pdf", payload.worksheet_id)
        };
        JobResult::Success(Some(json!({ "artifact": artifact })))
    }
}

pub struct RegenVariantHandler;

#[async_trait]
impl JobHandler for RegenVariantHandler {
    fn job_type(&self) -> JobType {
        JobType::RegenVariant
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        validate_as::<RegenVariantPayload>(payload)
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: RegenVariantPayload = match parse_or_fail(&ctx) {
            Ok(p) => p,
            Err(failed) => return failed,
        };
        JobResult::Success(Some(json!({
            "question_id": payload.question_id,
            "artifact": format!("questions/{}/variant-{}.json", payload.question_id, ctx.job_id()),
        })))
    }
}

pub struct GenerateEmbeddingsHandler;

#[async_trait]
impl JobHandler for GenerateEmbeddingsHandler {
    fn job_type(&self) -> JobType {
        JobType::GenerateEmbeddings
    }

    fn validate(&self, payload: &JsonValue) -> Result<()> {
        validate_as::<GenerateEmbeddingsPayload>(payload)
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: GenerateEmbeddingsPayload = match parse_or_fail(&ctx) {
            Ok(p) => p,
            Err(failed) => return failed,
        };
        JobResult::Success(Some(json!({ "embedded": payload.entity_ids.len() })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tutorq_core::NewJob;
    use uuid::Uuid;

    fn ctx(job_type: JobType, payload: JsonValue) -> JobContext {
        let job =
            NewJob::pending(Uuid::new_v4(), Uuid::new_v4(), job_type, payload, Utc::now()).into_job();
        JobContext::new(job, "worker-test", Utc::now())
    }

    #[tokio::test]
    async fn test_generate_pdf_artifact() {
        let worksheet = Uuid::new_v4();
        let result = GeneratePdfHandler
            .execute(ctx(
                JobType::GeneratePdf,
                json!({"worksheet_id": worksheet}),
            ))
            .await;
        assert_eq!(
            result,
            JobResult::Success(Some(json!({
                "artifact": format!("worksheets/{}.pdf", worksheet)
            })))
        );
    }

    #[tokio::test]
    async fn test_bad_payload_is_permanent_failure() {
        let result = GenerateQuestionsHandler
            .execute(ctx(
                JobType::GenerateQuestions,
                json!({"material_id": Uuid::new_v4(), "count": 0}),
            ))
            .await;
        assert!(matches!(result, JobResult::Failed(_)));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        assert!(ExtractMaterialHandler.validate(&json!({})).is_err());
        assert!(GenerateEmbeddingsHandler
            .validate(&json!({"entity_ids": [Uuid::new_v4()]}))
            .is_ok());
    }
}
