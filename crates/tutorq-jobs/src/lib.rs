//! # tutorq-jobs
//!
//! Job engine for tutorq.
//!
//! This crate provides:
//! - Handler registry keyed by the closed `JobType` enum
//! - Enqueuer with payload validation at the door
//! - Dispatcher with atomic claim, retry with backoff and stale-lease sweep
//! - Batch submission adapter and reconciliation for the external batch API
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tutorq_db::Database;
//! use tutorq_jobs::{default_registry, Dispatcher, DispatcherConfig, HttpBatchApi, SystemClock};
//!
//! let db = Database::connect("postgres://...").await?;
//! let store = Arc::new(db.jobs.clone());
//! let batch_api = Arc::new(HttpBatchApi::from_env()?);
//! let clock = Arc::new(SystemClock);
//! let registry = Arc::new(default_registry(
//!     store.clone(),
//!     batch_api,
//!     Arc::new(db.entities.clone()),
//!     clock.clone(),
//! ));
//!
//! let dispatcher = Dispatcher::new(store, registry, clock)
//!     .with_config(DispatcherConfig::from_env());
//! let processed = dispatcher.process_jobs(10).await?;
//! ```

pub mod batch;
pub mod dispatcher;
pub mod enqueue;
pub mod handler;
pub mod handlers;
pub mod reconcile;
pub mod registry;

// Re-export core types
pub use tutorq_core::*;

pub use batch::{BatchSubmitter, HttpBatchApi, HttpBatchConfig, MockBatchApi, MockBatchCall};
pub use dispatcher::{DispatchEvent, Dispatcher, DispatcherConfig, DispatcherHandle};
pub use enqueue::{EnqueueConfig, EnqueueOptions, Enqueuer};
pub use handler::{BatchJobHandler, JobContext, JobHandler, JobResult, NoOpHandler};
pub use handlers::{default_registry, QuestionBatchHandler};
pub use reconcile::{BatchReport, ItemReport, ReconcileSummary, ReconciliationHandler};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
