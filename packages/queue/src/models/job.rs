//! Job records: one per requested reading package.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The kind of reading package a job produces.
///
/// Each type has a declared manifest of stages and document indexes (see
/// [`crate::manifest`]); the type is fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// One reading system for one person.
    SingleReading,
    /// All five reading systems for one person.
    CompleteReading,
    /// Two people: one reading each plus a compatibility overlay.
    CompatibilityReading,
    /// Everything: five systems per person plus a final verdict.
    FullPackage,
}

impl JobType {
    /// Stable snake_case name, matching the database enum and wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SingleReading => "single_reading",
            JobType::CompleteReading => "complete_reading",
            JobType::CompatibilityReading => "compatibility_reading",
            JobType::FullPackage => "full_package",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate job status, recomputed from task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Error,
    Cancelled,
}

impl JobStatus {
    /// Whether the job can still accept claims and mutations.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }

    /// Whether the job has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Cached progress snapshot, derived by scanning the job's tasks.
///
/// Purely a cache: `recompute_progress` may overwrite it at any time and
/// produces the same value for the same task states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobProgress {
    /// Total number of tasks in the job.
    pub total: u32,
    /// Tasks that finished successfully.
    pub complete: u32,
    /// Tasks sitting in the failed state (permanent or cancelled).
    pub failed: u32,
    /// Completion percentage, 0-100.
    pub percent: u8,
}

impl JobProgress {
    /// Build a snapshot from task counts.
    pub fn from_counts(total: u32, complete: u32, failed: u32) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((complete as u64 * 100) / total as u64) as u8
        };
        Self {
            total,
            complete,
            failed,
            percent,
        }
    }
}

/// One content generation request: a multi-document reading package.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,

    /// Kind of package; determines the task manifest.
    pub job_type: JobType,

    /// Request parameters (participants, system choice). Immutable after
    /// creation; validated against the job type before any insert.
    #[sqlx(json)]
    pub params: serde_json::Value,

    /// Aggregate status derived from task states.
    pub status: JobStatus,

    /// Cached progress snapshot.
    #[sqlx(json)]
    pub progress: JobProgress,

    /// Human-readable status detail, set by recovery and failure paths.
    pub status_message: Option<String>,

    /// Times this job was re-queued by restart recovery.
    pub attempts: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh queued job. `total_tasks` seeds the progress snapshot.
    pub fn new(job_type: JobType, params: serde_json::Value, total_tasks: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type,
            params,
            status: JobStatus::Queued,
            progress: JobProgress::from_counts(total_tasks, 0, 0),
            status_message: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
