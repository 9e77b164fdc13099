//! Artifact records: durable outputs of completed tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::sequence::Stage;

/// Durable output of one completed task.
///
/// Artifacts are immutable: regeneration inserts a new row rather than
/// mutating an old one, and the assembler treats the most recently created
/// row as current for a given (document index, stage).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique artifact identifier.
    pub id: Uuid,

    /// Owning job.
    pub job_id: Uuid,

    /// Producing task. Nullable so artifacts survive task cleanup.
    pub task_id: Option<Uuid>,

    /// Stage that produced this output.
    pub stage: Stage,

    /// Opaque reference into external storage (object key, URL).
    pub storage_reference: String,

    /// Backend-supplied metadata. May carry a `document_index` hint, which
    /// the assembler checks against the task's sequence.
    #[sqlx(json)]
    pub metadata: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Create an artifact row for a task's output.
    pub fn new(
        job_id: Uuid,
        task_id: Uuid,
        stage: Stage,
        storage_reference: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            task_id: Some(task_id),
            stage,
            storage_reference,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// The `document_index` hint from metadata, when present and positive.
    pub fn metadata_document_index(&self) -> Option<u32> {
        self.metadata
            .get("document_index")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
    }
}
