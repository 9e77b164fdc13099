//! Attune API server library
//!
//! Exposes the router builder so integration tests can drive the HTTP
//! surface against any queue store backend.

pub mod config;
pub mod error;
pub mod routes;

pub use error::{ApiError, ApiResult, ErrorResponse};

use axum::Router;

use attune_queue::JobQueue;
use routes::{jobs_router, media_router, JobsState};

/// Build the job and media routes over a queue service.
///
/// Health routes are attached separately in `main` because they need the
/// database pool.
pub fn api_router(queue: JobQueue) -> Router {
    let state = JobsState::new(queue);
    Router::new()
        .nest("/jobs", jobs_router(state.clone()).merge(media_router(state)))
}
