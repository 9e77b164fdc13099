//! Storage abstraction for jobs, tasks, and artifacts.
//!
//! The queue is written once against this trait. Two interchangeable
//! backends exist:
//!
//! - [`MemoryQueueStore`]: an in-process map with an optional JSON file
//!   mirror, for single-node deployments and tests.
//! - [`PostgresQueueStore`]: the durable multi-worker backend, where the
//!   claim is one atomic conditional update.
//!
//! The atomic conditional claim is the sole concurrency-correctness
//! mechanism in the system; there is no external lock manager.

mod memory;
mod postgres;

pub use memory::MemoryQueueStore;
pub use postgres::PostgresQueueStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::QueueResult;
use crate::models::{Artifact, Job, JobProgress, JobStatus, Task, TaskStatus};
use crate::sequence::Stage;

/// Which running tasks a recovery pass applies to.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryFilter {
    /// Restrict to one job (administrative reset).
    pub job_id: Option<Uuid>,
    /// Only tasks whose last heartbeat is older than this (stall watchdog).
    /// `None` recovers every claimed/processing task (restart recovery).
    pub stalled_before: Option<DateTime<Utc>>,
}

/// Durable storage operations for the queue.
///
/// Mutating methods that represent lease transitions are conditional: they
/// return `false` (or `None`) instead of erroring when the precondition no
/// longer holds, because losing a race is an expected outcome for workers.
#[async_trait]
pub trait QueueStore: Send + Sync {
    // ========== Jobs ==========

    /// Insert a job and all of its tasks in one transaction.
    async fn insert_job(&self, job: &Job, tasks: &[Task]) -> QueueResult<()>;

    /// Fetch a job by id.
    async fn get_job(&self, job_id: Uuid) -> QueueResult<Option<Job>>;

    /// All jobs currently in `status`.
    async fn list_jobs_by_status(&self, status: JobStatus) -> QueueResult<Vec<Job>>;

    /// Overwrite a job's status, cached progress, and status message.
    /// Returns `false` when the job does not exist.
    async fn update_job_state(
        &self,
        job_id: Uuid,
        status: JobStatus,
        progress: &JobProgress,
        message: Option<&str>,
    ) -> QueueResult<bool>;

    /// Increment a job's attempt counter, returning the new value.
    async fn bump_job_attempts(&self, job_id: Uuid) -> QueueResult<Option<i32>>;

    /// Delete a job and cascade to its tasks and artifacts.
    /// Returns `false` when the job does not exist.
    async fn delete_job(&self, job_id: Uuid) -> QueueResult<bool>;

    // ========== Tasks ==========

    /// Fetch a task by id.
    async fn get_task(&self, task_id: Uuid) -> QueueResult<Option<Task>>;

    /// All tasks of a job, ordered by sequence.
    async fn list_tasks(&self, job_id: Uuid) -> QueueResult<Vec<Task>>;

    /// Atomically claim the next pending, dependency-satisfied task of a
    /// stage: set it claimed, assign the worker, stamp the lease timestamps.
    /// Returns `None` when nothing is claimable, which is the signal for the
    /// worker to back off and poll again.
    async fn claim_next_task(&self, stage: Stage, worker_id: &str) -> QueueResult<Option<Task>>;

    /// Move a claimed task to processing. Conditional on the caller still
    /// holding the lease.
    async fn start_task(&self, task_id: Uuid, worker_id: &str) -> QueueResult<bool>;

    /// Refresh the lease heartbeat. Returns `false` when the lease is gone,
    /// telling the worker to abandon the task.
    async fn heartbeat_task(&self, task_id: Uuid, worker_id: &str) -> QueueResult<bool>;

    /// Record the task's artifact and mark it complete, atomically.
    /// Conditional on the lease: a reclaimed or cancelled task returns
    /// `false` and the result is discarded.
    async fn complete_task(
        &self,
        task_id: Uuid,
        worker_id: &str,
        artifact: &Artifact,
    ) -> QueueResult<bool>;

    /// Record a failure: increment attempts, store the error, release the
    /// lease. The task goes back to pending while attempts remain under
    /// `max_attempts`, otherwise it is permanently failed. Returns the
    /// resulting status, or `None` when the lease was already lost.
    async fn fail_task(
        &self,
        task_id: Uuid,
        worker_id: &str,
        error: &str,
        max_attempts: i32,
    ) -> QueueResult<Option<TaskStatus>>;

    /// Mark every non-terminal task of a job failed with a cancellation
    /// reason. Returns the number of tasks stopped.
    async fn cancel_tasks(&self, job_id: Uuid, reason: &str) -> QueueResult<u64>;

    /// Apply the bounded-retry policy to running tasks matching `filter`,
    /// atomically per task: increment attempts, then reset to pending or
    /// permanently fail depending on `max_attempts` (a budget of zero fails
    /// everything). Returns the tasks as they are after the update, so a
    /// stalled task is recovered exactly once however many sweeps race.
    async fn recover_tasks(
        &self,
        filter: RecoveryFilter,
        max_attempts: i32,
        error: &str,
    ) -> QueueResult<Vec<Task>>;

    // ========== Artifacts ==========

    /// Insert an artifact row outside the complete-task path. This is the
    /// regeneration write: artifacts are immutable, so regenerating a
    /// document stage adds a row and the assembler serves the newest.
    async fn insert_artifact(&self, artifact: &Artifact) -> QueueResult<()>;

    /// All artifacts of a job, oldest first.
    async fn list_artifacts(&self, job_id: Uuid) -> QueueResult<Vec<Artifact>>;
}
