//! # tutorq-core
//!
//! Core types, traits, and abstractions for the tutorq job queue.
//!
//! This crate provides the job model, the error type, payload schemas, and the
//! trait seams (`JobStore`, `BatchApi`, `EntitySink`) that the storage and
//! execution crates implement and consume.

pub mod backoff;
pub mod clock;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod payloads;
pub mod traits;

// Re-export commonly used types at crate root
pub use backoff::{backoff_delay, BackoffPolicy};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use models::*;
pub use payloads::{parse_payload, PayloadSchema};
pub use traits::*;
