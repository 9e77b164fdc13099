//! The seam to the generation engines.
//!
//! Backends are opaque to the queue: one call per task, producing a storage
//! reference. Implementations live with the worker (HTTP services for text,
//! rendering, narration, and song generation); tests plug in mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::QueueResult;
use crate::models::JobType;
use crate::sequence::Stage;

/// Everything a backend needs to generate one document stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub stage: Stage,
    /// 1-based document index, decoded from the task's sequence.
    pub document_index: u32,
    /// Immutable job parameters (participants, system choice).
    pub params: serde_json::Value,
    /// Per-task input prepared at job creation (title and friends).
    pub input: serde_json::Value,
}

/// A backend's output: where the content landed, plus optional metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// Opaque reference into external storage.
    pub storage_reference: String,
    /// Backend-supplied metadata, merged into the artifact row.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A pluggable generation engine.
///
/// Calls may take seconds to many minutes and are expected to block the
/// worker for that duration; the worker heartbeats around them. The queue
/// enforces no per-call deadline: stalls are caught by heartbeat silence.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> QueueResult<GeneratedArtifact>;
}
