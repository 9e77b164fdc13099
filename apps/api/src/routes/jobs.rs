//! Job HTTP route handlers
//!
//! The upward interface of the queue:
//! - `POST /jobs` - create a job (validation errors surface immediately)
//! - `GET /jobs/{id}` - job plus its assembled documents
//! - `GET /jobs/{id}/tasks` - raw task rows, for diagnostics
//! - `POST /jobs/{id}/cancel` - cooperative cancellation
//! - `POST /jobs/{id}/reset` - force-reset stuck tasks (manual recovery)
//! - `DELETE /jobs/{id}` - delete with cascade

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use attune_queue::{Document, Job, JobQueue, JobType, Task};

use crate::error::ApiResult;

/// Shared state for job handlers
#[derive(Clone)]
pub struct JobsState {
    /// Queue service over the configured store backend
    pub queue: JobQueue,
}

impl JobsState {
    pub fn new(queue: JobQueue) -> Self {
        Self { queue }
    }
}

/// Request body for job creation
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Kind of reading package to produce
    pub job_type: JobType,
    /// Type-specific parameters (participants, system choice)
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Job plus its per-document view
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job: Job,
    pub documents: Vec<Document>,
}

/// Response for a stuck-task reset
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    /// Number of tasks the reset touched
    pub reset_count: usize,
    /// The affected tasks as they are after the reset
    pub tasks: Vec<Task>,
}

/// Create the jobs router
pub fn jobs_router(state: JobsState) -> Router {
    Router::new()
        .route("/", post(create_job))
        .route("/{job_id}", get(get_job).delete(delete_job))
        .route("/{job_id}/tasks", get(get_job_tasks))
        .route("/{job_id}/cancel", post(cancel_job))
        .route("/{job_id}/reset", post(reset_stuck_tasks))
        .with_state(state)
}

/// Create a job and its tasks from the job type's manifest.
///
/// # Response
/// - 201 Created with the queued job
/// - 400 Bad Request when parameters fail validation for the type
async fn create_job(
    State(state): State<JobsState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state
        .queue
        .create_job(request.job_type, request.params)
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// Fetch a job with its assembled documents. Partial documents are
/// included as-is: completed stages stay servable even when siblings are
/// still pending or permanently failed.
async fn get_job(
    State(state): State<JobsState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobView>> {
    let (job, documents) = state.queue.get_job_view(job_id).await?;
    Ok(Json(JobView { job, documents }))
}

/// Raw task rows for a job, for diagnostics.
async fn get_job_tasks(
    State(state): State<JobsState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Task>>> {
    let tasks = state.queue.get_job_tasks(job_id).await?;
    Ok(Json(tasks))
}

/// Cancel a queued or processing job.
///
/// # Response
/// - 200 OK with the cancelled job
/// - 409 Conflict when the job is already terminal
async fn cancel_job(
    State(state): State<JobsState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Job>> {
    let job = state.queue.cancel_job(job_id).await?;
    Ok(Json(job))
}

/// Force-reset every stuck task of a job, independent of the watchdog
/// timer.
async fn reset_stuck_tasks(
    State(state): State<JobsState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<ResetResponse>> {
    let tasks = state.queue.reset_stuck_tasks(job_id).await?;
    Ok(Json(ResetResponse {
        reset_count: tasks.len(),
        tasks,
    }))
}

/// Delete a job, cascading to tasks and artifacts.
async fn delete_job(
    State(state): State<JobsState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.queue.delete_job(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
