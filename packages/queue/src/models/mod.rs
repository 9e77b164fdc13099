//! Durable records for the queue: jobs, tasks, artifacts, and the computed
//! per-document view assembled at read time.

mod artifact;
mod document;
mod job;
mod task;

pub use artifact::Artifact;
pub use document::{ArtifactRef, Document};
pub use job::{Job, JobProgress, JobStatus, JobType};
pub use task::{Task, TaskStatus};
