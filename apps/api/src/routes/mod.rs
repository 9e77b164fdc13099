//! HTTP route handlers

mod health;
mod jobs;
mod media;

pub use health::{health_router, HealthState};
pub use jobs::{jobs_router, JobsState};
pub use media::media_router;
