//! Task records: one unit of work for one document at one stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::sequence::{self, SequenceError, Stage};

/// Lifecycle state of a task.
///
/// Transitions: pending → claimed → processing → {complete | failed};
/// a failed task with retry budget left is reset straight back to pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Processing,
    Complete,
    Failed,
}

impl TaskStatus {
    /// Whether a worker currently holds (or held) a lease on the task.
    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Claimed | TaskStatus::Processing)
    }

    /// Whether the task has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::Processing => "processing",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One claimable unit of work.
///
/// `sequence` is the authoritative identity of the work: stage and document
/// index are always re-derivable from it through the codec, even when the
/// redundant `stage` column or any input metadata disagrees.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,

    /// Owning job.
    pub job_id: Uuid,

    /// Codec-encoded (stage, document index); unique per job.
    pub sequence: i32,

    /// Stage copy for SQL filtering. Redundant with `sequence`, which wins
    /// on any disagreement.
    pub stage: Stage,

    /// Lifecycle state.
    pub status: TaskStatus,

    /// Identifier of the worker holding the lease, while claimed/processing.
    pub worker_id: Option<String>,

    /// When the current lease was acquired.
    pub claimed_at: Option<DateTime<Utc>>,

    /// Last lease refresh. Freshness, not status, is the liveness signal the
    /// recovery supervisor watches.
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Execution attempts so far.
    pub attempts: i32,

    /// Stage input prepared at job creation (title, document index hint).
    #[sqlx(json)]
    pub input: serde_json::Value,

    /// Last recorded failure message.
    pub error: Option<String>,

    /// Sequence of the prerequisite text task, precomputed through the codec
    /// at creation so the durable backend can gate claims in one conditional
    /// update. Derived convenience only; never authoritative.
    pub depends_on: Option<i32>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a pending task from its sequence number, deriving the stage and
    /// the prerequisite text sequence through the codec.
    ///
    /// Rejects sequences outside every stage band: this is where out-of-band
    /// values are caught, at creation time rather than at decode time.
    pub fn from_sequence(
        job_id: Uuid,
        sequence: i32,
        input: serde_json::Value,
    ) -> Result<Self, SequenceError> {
        let (stage, document_index) = sequence::decode(sequence)?;
        let depends_on = match stage {
            Stage::Text => None,
            _ => Some(sequence::encode(Stage::Text, document_index)?),
        };
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            job_id,
            sequence,
            stage,
            status: TaskStatus::Pending,
            worker_id: None,
            claimed_at: None,
            last_heartbeat: None,
            attempts: 0,
            input,
            error: None,
            depends_on,
            created_at: now,
            updated_at: now,
        })
    }

    /// 1-based document index, decoded from the authoritative sequence.
    pub fn document_index(&self) -> Result<u32, SequenceError> {
        sequence::decode(self.sequence).map(|(_, index)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_sequence_derives_stage_and_dependency() {
        let job_id = Uuid::new_v4();

        let text = Task::from_sequence(job_id, 1, json!({})).unwrap();
        assert_eq!(text.stage, Stage::Text);
        assert_eq!(text.depends_on, None);
        assert_eq!(text.document_index().unwrap(), 2);

        let audio = Task::from_sequence(job_id, 201, json!({})).unwrap();
        assert_eq!(audio.stage, Stage::Audio);
        assert_eq!(audio.depends_on, Some(1));
        assert_eq!(audio.document_index().unwrap(), 2);
    }

    #[test]
    fn test_from_sequence_rejects_out_of_band() {
        assert!(Task::from_sequence(Uuid::new_v4(), 400, json!({})).is_err());
        assert!(Task::from_sequence(Uuid::new_v4(), -7, json!({})).is_err());
    }

    #[test]
    fn test_status_classification() {
        assert!(TaskStatus::Claimed.is_running());
        assert!(TaskStatus::Processing.is_running());
        assert!(!TaskStatus::Pending.is_running());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Claimed.is_terminal());
    }
}
