//! Per-document media fetch
//!
//! `GET /jobs/{id}/documents/{index}/{stage}` resolves the current artifact
//! for one document and stage, using the assembler's metadata-then-sequence
//! rules: the lookup works even when only sequence numbers survive.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use attune_queue::{ArtifactRef, Stage};

use crate::error::{ApiError, ApiResult};
use crate::routes::JobsState;

/// Response body for a media fetch
#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub job_id: Uuid,
    pub document_index: u32,
    pub stage: Stage,
    /// Opaque reference to the stored content
    pub artifact: ArtifactRef,
}

/// Create the media router, sharing the jobs state
pub fn media_router(state: JobsState) -> Router {
    Router::new()
        .route("/{job_id}/documents/{document_index}/{stage}", get(get_media))
        .with_state(state)
}

/// Resolve the current artifact for (job, document index, stage).
///
/// # Response
/// - 200 OK with the artifact reference
/// - 400 Bad Request for an unknown stage name
/// - 404 Not Found when the document/stage has no artifact yet
async fn get_media(
    State(state): State<JobsState>,
    Path((job_id, document_index, stage)): Path<(Uuid, u32, String)>,
) -> ApiResult<Json<MediaResponse>> {
    let stage: Stage = stage.parse().map_err(|e| ApiError::InvalidPathParam {
        name: "stage",
        reason: format!("{e}"),
    })?;

    let artifact = state
        .queue
        .get_document_artifact(job_id, document_index, stage)
        .await?;

    Ok(Json(MediaResponse {
        job_id,
        document_index,
        stage,
        artifact,
    }))
}
