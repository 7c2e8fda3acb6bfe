//! Handlers for every job type, and the registry wiring them together.

pub mod content;
pub mod maintenance;
pub mod question_batch;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use tutorq_core::{parse_payload, BatchApi, Clock, EntitySink, JobStore, PayloadSchema, Result};

use crate::handler::{JobContext, JobResult};
use crate::registry::HandlerRegistry;

pub use content::{
    ExtractMaterialHandler, GenerateEmbeddingsHandler, GeneratePdfHandler,
    GenerateQuestionsHandler, RegenVariantHandler,
};
pub use maintenance::{
    DailySpacedRepRefreshHandler, ReconcileStatsHandler, RefreshMaterializedViewsHandler,
};
pub use question_batch::QuestionBatchHandler;

/// Enqueue-time schema check for payload type `P`.
pub(crate) fn validate_as<P: PayloadSchema>(payload: &JsonValue) -> Result<()> {
    parse_payload::<P>(payload).map(|_| ())
}

/// Payload parsed at execution time; a bad payload never gets better on
/// retry, so it fails the job permanently.
pub(crate) fn parse_or_fail<P: PayloadSchema>(
    ctx: &JobContext,
) -> std::result::Result<P, JobResult> {
    ctx.parse_payload::<P>()
        .map_err(|e| JobResult::Failed(e.to_string()))
}

/// Registry with a handler for every job type.
pub fn default_registry(
    store: Arc<dyn JobStore>,
    batch_api: Arc<dyn BatchApi>,
    sink: Arc<dyn EntitySink>,
    clock: Arc<dyn Clock>,
) -> HandlerRegistry {
    HandlerRegistry::builder()
        .with_handler(ExtractMaterialHandler)
        .with_handler(GenerateQuestionsHandler)
        .with_handler(GeneratePdfHandler)
        .with_handler(RegenVariantHandler)
        .with_handler(GenerateEmbeddingsHandler)
        .with_handler(DailySpacedRepRefreshHandler)
        .with_handler(ReconcileStatsHandler)
        .with_handler(RefreshMaterializedViewsHandler)
        .with_batch_handler(QuestionBatchHandler::new(sink))
        .with_reconciliation(store, batch_api)
        .with_clock(clock)
        .build()
}
