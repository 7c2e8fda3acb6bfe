//! Handler registry keyed by job type.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use tutorq_core::{BatchApi, Clock, Error, JobStore, JobType, Result, SystemClock};

use crate::handler::{BatchJobHandler, JobHandler};
use crate::reconcile::ReconciliationHandler;

/// Maps a job's type to the code that runs it.
///
/// Immutable once built. Adding a job type means registering a handler here;
/// the queue engine never changes.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    batch_handlers: HashMap<JobType, Arc<dyn BatchJobHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Handler executed by the dispatcher for `job_type`.
    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    /// Batch handler for a type delegated to the external batch API.
    pub fn batch_handler(&self, job_type: JobType) -> Option<Arc<dyn BatchJobHandler>> {
        self.batch_handlers.get(&job_type).cloned()
    }

    /// Whether `job_type` can be enqueued for immediate execution.
    pub fn has_handler(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Registered immediate-execution types, sorted for stable output.
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Enqueue-time check: the type has a handler and the payload passes its schema.
    pub fn validate(&self, job_type: JobType, payload: &JsonValue) -> Result<()> {
        let handler = self.handlers.get(&job_type).ok_or_else(|| {
            Error::Validation(format!("no handler registered for job type {}", job_type))
        })?;
        handler.validate(payload)
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: Vec<Arc<dyn JobHandler>>,
    batch_handlers: Vec<Arc<dyn BatchJobHandler>>,
    reconciliation: Option<ReconciliationDeps>,
    clock: Option<Arc<dyn Clock>>,
}

struct ReconciliationDeps {
    store: Arc<dyn JobStore>,
    batch_api: Arc<dyn BatchApi>,
}

impl HandlerRegistryBuilder {
    /// Add a handler. A later handler for the same type replaces an earlier one.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn with_batch_handler<H: BatchJobHandler + 'static>(mut self, handler: H) -> Self {
        self.batch_handlers.push(Arc::new(handler));
        self
    }

    /// Register PROCESS_BATCH_RESULT, wired to every batch handler added to
    /// this builder.
    pub fn with_reconciliation(
        mut self,
        store: Arc<dyn JobStore>,
        batch_api: Arc<dyn BatchApi>,
    ) -> Self {
        self.reconciliation = Some(ReconciliationDeps { store, batch_api });
        self
    }

    /// Clock used by the reconciliation handler for its state transitions
    /// (default: [`SystemClock`]).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        let mut registry = HandlerRegistry::default();

        for handler in self.batch_handlers {
            let job_type = handler.job_type();
            debug!(job_type = %job_type, "Registered batch handler");
            registry.batch_handlers.insert(job_type, handler);
        }

        for handler in self.handlers {
            let job_type = handler.job_type();
            debug!(job_type = %job_type, "Registered job handler");
            registry.handlers.insert(job_type, handler);
        }

        if let Some(deps) = self.reconciliation {
            let handler = ReconciliationHandler::new(
                registry.batch_handlers.clone(),
                deps.store,
                deps.batch_api,
                self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            );
            registry
                .handlers
                .insert(JobType::ProcessBatchResult, Arc::new(handler));
        }

        registry
    }
}
