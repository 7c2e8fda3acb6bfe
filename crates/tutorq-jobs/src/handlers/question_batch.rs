//! GENERATE_QUESTIONS_BATCH: question generation through the external batch API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use tutorq_core::payloads::GenerateQuestionsPayload;
use tutorq_core::{
    parse_payload, EntitySink, Error, Job, JobType, MaterializedEntity, NewEntity, Result,
};

use crate::handler::BatchJobHandler;

/// Default model named in each sub-request.
pub const DEFAULT_QUESTION_MODEL: &str = "claude-3-5-haiku-latest";

/// Entity kind written for each reconciled item.
pub const QUESTION_SET_KIND: &str = "question_set";

const MAX_TOKENS: u32 = 4096;

/// Batch handler that turns each item into one question set.
pub struct QuestionBatchHandler {
    sink: Arc<dyn EntitySink>,
    model: String,
}

impl QuestionBatchHandler {
    pub fn new(sink: Arc<dyn EntitySink>) -> Self {
        Self {
            sink,
            model: DEFAULT_QUESTION_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn prompt(item: &GenerateQuestionsPayload) -> String {
        match &item.difficulty {
            Some(difficulty) => format!(
                "Generate {} {} practice questions for material {}.",
                item.count, difficulty, item.material_id
            ),
            None => format!(
                "Generate {} practice questions for material {}.",
                item.count, item.material_id
            ),
        }
    }
}

#[async_trait]
impl BatchJobHandler for QuestionBatchHandler {
    fn job_type(&self) -> JobType {
        JobType::GenerateQuestionsBatch
    }

    fn validate_item(&self, item: &JsonValue) -> Result<()> {
        parse_payload::<GenerateQuestionsPayload>(item).map(|_| ())
    }

    fn build_request(&self, _index: usize, item: &JsonValue) -> Result<JsonValue> {
        let item: GenerateQuestionsPayload = parse_payload(item)?;
        Ok(json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": Self::prompt(&item) }],
        }))
    }

    async fn materialize(
        &self,
        job: &Job,
        index: usize,
        item: &JsonValue,
        output: &JsonValue,
    ) -> Result<MaterializedEntity> {
        let item: GenerateQuestionsPayload = parse_payload(item)?;
        let item_index = i32::try_from(index)
            .map_err(|_| Error::Internal(format!("item index {} out of range", index)))?;

        self.sink
            .materialize(NewEntity {
                job_id: job.id,
                item_index,
                tenant_id: job.tenant_id,
                creator_id: job.creator_id,
                kind: QUESTION_SET_KIND.to_string(),
                content: json!({
                    "material_id": item.material_id,
                    "requested": item.count,
                    "difficulty": item.difficulty,
                    "output": output,
                }),
            })
            .await
    }
}
