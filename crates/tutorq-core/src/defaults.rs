//! Centralized default constants for the tutorq job queue.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in the other crates read their fallbacks from here.

// =============================================================================
// ENQUEUE
// =============================================================================

/// Default maximum attempts (first run plus retries) for a job.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Maximum number of items accepted in one batched job.
pub const BATCH_MAX_ITEMS: usize = 1000;

// =============================================================================
// DISPATCH
// =============================================================================

/// Default number of jobs claimed per `process_jobs` call.
pub const JOB_DISPATCH_LIMIT: usize = 10;

/// Lease timeout in seconds. A `processing` row older than this is swept (15 minutes).
pub const JOB_LEASE_TIMEOUT_SECS: u64 = 900;

/// Default handler execution timeout in seconds. `JOB_DISPATCH_LIMIT` of these
/// must fit inside one lease.
pub const JOB_TIMEOUT_SECS: u64 = 60;

/// Base retry delay in seconds; doubled for every further attempt.
pub const JOB_BACKOFF_BASE_SECS: u64 = 30;

/// Upper bound for the retry delay in seconds (1 hour).
pub const JOB_BACKOFF_MAX_SECS: u64 = 3600;

/// Sleep between empty passes in continuous mode.
pub const JOB_POLL_INTERVAL_MS: u64 = 5_000;

/// Capacity of the dispatcher's event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Outstanding batches inspected per reconciliation pass.
pub const RECONCILE_BATCH_LIMIT: i64 = 25;

/// Upper bound for the `limit` field of a PROCESS_BATCH_RESULT payload.
pub const RECONCILE_BATCH_LIMIT_MAX: i64 = 100;

// =============================================================================
// EXTERNAL BATCH API
// =============================================================================

/// Default batch API base URL.
pub const BATCH_API_URL: &str = "https://api.anthropic.com";

/// Default API version header value.
pub const BATCH_API_VERSION: &str = "2023-06-01";

/// Timeout for batch API requests in seconds.
pub const BATCH_API_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for job listings.
pub const PAGE_LIMIT: i64 = 50;
