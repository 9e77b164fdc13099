//! Error types for the queue subsystem.
//!
//! One unified `thiserror` hierarchy with a retryability classification:
//! validation failures are surfaced immediately and never retried, while
//! generation and stall failures are retried up to the configured attempt
//! budget before a task becomes permanently failed.

use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;
use crate::sequence::{SequenceError, Stage};

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Unified error type for the queue subsystem.
#[derive(Debug, Error)]
pub enum QueueError {
    // ========== Request Errors ==========
    /// Bad job parameters. Surfaced immediately, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// No artifact recorded for the requested document and stage.
    #[error("no {stage} artifact for document {document_index}")]
    ArtifactNotFound { document_index: u32, stage: Stage },

    /// Operation requires a live job (queued or processing).
    #[error("job {job_id} is {status}, operation not allowed")]
    JobNotActive { job_id: Uuid, status: JobStatus },

    // ========== Execution Errors ==========
    /// A generation backend call failed. Retried up to `max_attempts`.
    #[error("{stage} generation failed: {message}")]
    Generation { stage: Stage, message: String },

    /// A claimed task went silent past the stall threshold. Same retry
    /// accounting as generation failures.
    #[error("task stalled: no heartbeat for {silent_secs}s")]
    Stall { silent_secs: i64 },

    /// The worker's lease on a task was lost (reclaimed or cancelled).
    #[error("lease lost for task {0}")]
    LeaseLost(Uuid),

    // ========== Data Errors ==========
    /// Sequence codec rejection.
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File mirror I/O failed (in-memory backend).
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========== Configuration ==========
    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl QueueError {
    /// Whether the failure is worth another attempt under the retry budget.
    ///
    /// Validation and not-found errors are terminal no matter the budget;
    /// backend, stall, and infrastructure failures are retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Generation { .. } | Self::Stall { .. } | Self::Database(_) | Self::Io(_)
        )
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a generation error for a stage.
    pub fn generation(stage: Stage, message: impl Into<String>) -> Self {
        Self::Generation {
            stage,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(QueueError::generation(Stage::Audio, "tts unavailable").is_retryable());
        assert!(QueueError::Stall { silent_secs: 61 }.is_retryable());

        assert!(!QueueError::validation("missing partner").is_retryable());
        assert!(!QueueError::JobNotFound(Uuid::nil()).is_retryable());
        assert!(!QueueError::LeaseLost(Uuid::nil()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = QueueError::generation(Stage::Song, "no vocals model");
        assert_eq!(err.to_string(), "song generation failed: no vocals model");

        let err = QueueError::ArtifactNotFound {
            document_index: 3,
            stage: Stage::Render,
        };
        assert_eq!(err.to_string(), "no render artifact for document 3");
    }
}
