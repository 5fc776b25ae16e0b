//! Job error types.

use spool_core::SpoolError;
use spool_crypto::CryptoError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job's own logic failed.
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store error.
    #[error("Database error: {0}")]
    Database(String),

    /// Payload encryption or decryption failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// No handler is registered under this name.
    #[error("Unknown job type: {0}")]
    UnknownJob(String),

    /// Stored payload does not have the expected shape.
    #[error("Invalid payload: {0}")]
    Payload(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Creates an execution failure, the error a job's `run` returns.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::ExecutionFailed(message.into())
    }

    /// Returns true if this error is retryable.
    ///
    /// Failed executions are retried by housekeeping; store errors by the
    /// next loop iteration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::ExecutionFailed(_) | JobError::Database(_))
    }

    /// Returns true if the error is an unrecoverable setup problem.
    pub fn is_fatal(&self) -> bool {
        matches!(self, JobError::Configuration(_))
    }

    /// Machine-readable kind, recorded on the row with the message.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::ExecutionFailed(_) => "EXECUTION_FAILED",
            JobError::Serialization(_) => "SERIALIZATION_ERROR",
            JobError::Database(_) => "DATABASE_ERROR",
            JobError::Encryption(_) => "ENCRYPTION_ERROR",
            JobError::UnknownJob(_) => "UNKNOWN_JOB",
            JobError::Payload(_) => "INVALID_PAYLOAD",
            JobError::Configuration(_) => "CONFIGURATION_ERROR",
            JobError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<SpoolError> for JobError {
    fn from(err: SpoolError) -> Self {
        match err {
            SpoolError::Configuration(msg) | SpoolError::Validation(msg) => {
                JobError::Configuration(msg)
            }
            SpoolError::Database(msg) | SpoolError::Timeout(msg) => JobError::Database(msg),
            SpoolError::Encryption(msg) => JobError::Encryption(msg),
            SpoolError::Serialization(msg) => JobError::Payload(msg),
            SpoolError::Internal(msg) => JobError::Internal(msg),
        }
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        SpoolError::from(err).into()
    }
}

impl From<CryptoError> for JobError {
    fn from(err: CryptoError) -> Self {
        SpoolError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_execution_failed() {
        let err = JobError::failed("oops");
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_is_not_retryable_unknown_job() {
        let err = JobError::UnknownJob("send_email".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_configuration_is_fatal() {
        let err = JobError::Configuration("Unknown Memory Limit".into());
        assert!(err.is_fatal());
        assert_eq!(err.kind(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_from_spool_error() {
        let job_err = JobError::from(SpoolError::Database("connection reset".into()));
        match job_err {
            JobError::Database(msg) => assert!(msg.contains("connection reset")),
            _ => panic!("Expected Database error"),
        }

        let job_err = JobError::from(SpoolError::configuration("missing table"));
        assert!(job_err.is_fatal());

        let job_err = JobError::from(SpoolError::Validation("workers must be positive".into()));
        assert!(job_err.is_fatal());
    }

    #[test]
    fn test_from_crypto_error() {
        let job_err = JobError::from(CryptoError::Decrypt("bad padding".into()));
        assert!(matches!(job_err, JobError::Encryption(_)));

        let job_err = JobError::from(CryptoError::InvalidKey("short".into()));
        assert!(job_err.is_fatal());
    }

    #[test]
    fn test_from_sqlx_pool_timeout() {
        let job_err = JobError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(job_err, JobError::Database(_)));
    }

    #[test]
    fn test_error_display() {
        let err = JobError::failed("smtp unreachable");
        assert_eq!(err.to_string(), "Job execution failed: smtp unreachable");
    }
}
