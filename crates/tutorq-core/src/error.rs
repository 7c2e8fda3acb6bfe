//! Error types for tutorq.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using tutorq's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for job queue operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Unknown job type or malformed payload, rejected before anything is persisted
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested state transition is not allowed from the job's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A post-claim update found the lease held by someone else (or no one)
    #[error("Lease lost for job {job_id} (worker {worker_id})")]
    LeaseLost { job_id: Uuid, worker_id: String },

    /// External batch API submission or polling failed
    #[error("External batch error: {0}")]
    ExternalBatch(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a validation failure.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Whether this error was raised by input checks rather than infrastructure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::ExternalBatch(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_validation() {
        let err = Error::validation("unknown job type: foo");
        assert_eq!(err.to_string(), "Validation error: unknown job type: foo");
        assert!(err.is_validation());
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_error_display_lease_lost() {
        let id = Uuid::nil();
        let err = Error::LeaseLost {
            job_id: id,
            worker_id: "worker-a".to_string(),
        };
        assert!(err.to_string().contains("worker-a"));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_error_display_external_batch() {
        let err = Error::ExternalBatch("503 Service Unavailable".to_string());
        assert_eq!(
            err.to_string(),
            "External batch error: 503 Service Unavailable"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
