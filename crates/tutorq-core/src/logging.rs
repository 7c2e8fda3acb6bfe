//! Structured logging field names shared by all tutorq crates.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue (retry scheduled, lease lost, poll failed) |
//! | INFO  | Lifecycle events, job completions, sweep results |
//! | DEBUG | Decision points, claim sizes, config choices |
//! | TRACE | Per-item iteration (batch items, claimed rows) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "jobs", "batch", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "dispatcher", "enqueuer", "reconcile"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim", "sweep", "submit", "poll"
pub const OPERATION: &str = "op";

/// Identifier of the dispatcher invocation holding a lease.
pub const WORKER_ID: &str = "worker_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Tenant (workspace) that owns the job.
pub const TENANT_ID: &str = "tenant_id";

/// External batch handle.
pub const BATCH_ID: &str = "batch_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows claimed in one pass.
pub const CLAIMED: &str = "claimed";

/// Number of rows processed in one pass.
pub const PROCESSED: &str = "processed";

/// Current attempt number.
pub const ATTEMPTS: &str = "attempts";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
