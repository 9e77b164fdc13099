//! The job queue service: creation, claiming, completion, cancellation, and
//! progress accounting, written once against the [`QueueStore`] trait.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::assembler;
use crate::backend::GeneratedArtifact;
use crate::error::{QueueError, QueueResult};
use crate::manifest;
use crate::models::{
    Artifact, Document, Job, JobProgress, JobStatus, JobType, Task, TaskStatus,
};
use crate::sequence::{self, Stage};
use crate::store::{QueueStore, RecoveryFilter};

/// Reason recorded on tasks stopped by job cancellation.
pub const CANCELLED_TASK_MESSAGE: &str = "job cancelled before this task finished";

/// Reason recorded on tasks force-reset by an operator.
pub const MANUAL_RESET_MESSAGE: &str = "task reset by operator request";

/// High-level queue operations over any [`QueueStore`] backend.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn QueueStore>,
    max_attempts: i32,
}

impl JobQueue {
    pub fn new(store: Arc<dyn QueueStore>, max_attempts: i32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// The configured per-task retry budget.
    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    // ========== Job lifecycle ==========

    /// Validate parameters against the job type, then insert the job plus
    /// every task from the type's manifest, sequences encoded through the
    /// codec, in one transaction.
    #[tracing::instrument(skip(self, params))]
    pub async fn create_job(
        &self,
        job_type: JobType,
        params: serde_json::Value,
    ) -> QueueResult<Job> {
        let validated = manifest::validate_params(job_type, &params)?;

        let sequences = job_type.manifest().task_sequences()?;
        let job = Job::new(job_type, params, sequences.len() as u32);

        let mut tasks = Vec::with_capacity(sequences.len());
        for seq in sequences {
            let (stage, document_index) = sequence::decode(seq)?;
            let title = manifest::document_title(job_type, &validated, document_index);
            let input = json!({
                "document_index": document_index,
                "stage": stage.as_str(),
                "title": title,
            });
            tasks.push(Task::from_sequence(job.id, seq, input)?);
        }

        self.store.insert_job(&job, &tasks).await?;
        tracing::info!(
            job_id = %job.id,
            job_type = %job_type,
            task_count = tasks.len(),
            "job created"
        );
        Ok(job)
    }

    /// Fetch a job or fail with `JobNotFound`.
    pub async fn get_job(&self, job_id: Uuid) -> QueueResult<Job> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))
    }

    /// All tasks of a job, for diagnostics.
    pub async fn get_job_tasks(&self, job_id: Uuid) -> QueueResult<Vec<Task>> {
        self.get_job(job_id).await?;
        self.store.list_tasks(job_id).await
    }

    /// Job plus its assembled per-document view.
    pub async fn get_job_view(&self, job_id: Uuid) -> QueueResult<(Job, Vec<Document>)> {
        let job = self.get_job(job_id).await?;
        let documents = assembler::build_documents(self.store.as_ref(), &job).await?;
        Ok((job, documents))
    }

    /// The current artifact for one (document index, stage) of a job,
    /// resolved per the assembler's metadata-then-sequence rules. Works even
    /// when only sequence numbers are available.
    pub async fn get_document_artifact(
        &self,
        job_id: Uuid,
        document_index: u32,
        stage: Stage,
    ) -> QueueResult<crate::models::ArtifactRef> {
        let job = self.get_job(job_id).await?;
        assembler::find_document_artifact(self.store.as_ref(), &job, document_index, stage).await
    }

    /// Delete a job, cascading to its tasks and artifacts.
    #[tracing::instrument(skip(self))]
    pub async fn delete_job(&self, job_id: Uuid) -> QueueResult<()> {
        if !self.store.delete_job(job_id).await? {
            return Err(QueueError::JobNotFound(job_id));
        }
        tracing::info!(job_id = %job_id, "job deleted");
        Ok(())
    }

    /// Cancel a queued or processing job. Non-terminal tasks are marked
    /// failed with a cancellation reason; artifacts already produced stay
    /// servable. Cancellation is cooperative: in-flight generation is not
    /// interrupted, its late result is discarded by the conditional complete.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: Uuid) -> QueueResult<Job> {
        let job = self.get_job(job_id).await?;
        if !job.status.is_active() {
            return Err(QueueError::JobNotActive {
                job_id,
                status: job.status,
            });
        }

        let stopped = self
            .store
            .cancel_tasks(job_id, CANCELLED_TASK_MESSAGE)
            .await?;

        let tasks = self.store.list_tasks(job_id).await?;
        let progress = progress_of(&tasks);
        let message = format!("cancelled; {stopped} task(s) stopped");
        self.store
            .update_job_state(job_id, JobStatus::Cancelled, &progress, Some(&message))
            .await?;

        tracing::info!(job_id = %job_id, stopped, "job cancelled");
        self.get_job(job_id).await
    }

    // ========== Progress ==========

    /// Re-derive the job's cached progress snapshot and aggregate status
    /// from its tasks. Idempotent: with no intervening task change, a second
    /// call writes the same state.
    pub async fn recompute_progress(&self, job_id: Uuid) -> QueueResult<Job> {
        self.recompute_with_note(job_id, None).await
    }

    /// Like [`recompute_progress`](Self::recompute_progress), with a status
    /// note attached when the derived status has no message of its own
    /// (used by recovery so forced resets are never silent).
    #[tracing::instrument(skip(self, note))]
    pub async fn recompute_with_note(
        &self,
        job_id: Uuid,
        note: Option<&str>,
    ) -> QueueResult<Job> {
        let job = self.get_job(job_id).await?;
        let tasks = self.store.list_tasks(job_id).await?;
        let progress = progress_of(&tasks);

        // A cancelled job keeps its status and message; only the snapshot
        // is refreshed.
        if job.status == JobStatus::Cancelled {
            self.store
                .update_job_state(
                    job_id,
                    JobStatus::Cancelled,
                    &progress,
                    job.status_message.as_deref(),
                )
                .await?;
            return self.get_job(job_id).await;
        }

        let status = derive_status(&tasks);
        let message = match status {
            JobStatus::Error => Some(failure_summary(&tasks)),
            JobStatus::Complete => Some("all documents generated".to_string()),
            _ => note.map(|n| n.to_string()),
        };

        self.store
            .update_job_state(job_id, status, &progress, message.as_deref())
            .await?;
        self.get_job(job_id).await
    }

    // ========== Claim protocol (worker-facing) ==========

    /// Claim the next pending, dependency-satisfied task of a stage.
    /// `None` means nothing is claimable right now: back off and poll again.
    pub async fn claim_next_task(
        &self,
        stage: Stage,
        worker_id: &str,
    ) -> QueueResult<Option<Task>> {
        let claimed = self.store.claim_next_task(stage, worker_id).await?;
        if let Some(task) = &claimed {
            tracing::debug!(
                task_id = %task.id,
                job_id = %task.job_id,
                sequence = task.sequence,
                worker_id,
                "task claimed"
            );
        }
        Ok(claimed)
    }

    /// Move a claimed task to processing.
    pub async fn start_task(&self, task: &Task, worker_id: &str) -> QueueResult<bool> {
        self.store.start_task(task.id, worker_id).await
    }

    /// Refresh the lease. `false` means the lease is gone and the worker
    /// should abandon the task.
    pub async fn heartbeat_task(&self, task: &Task, worker_id: &str) -> QueueResult<bool> {
        self.store.heartbeat_task(task.id, worker_id).await
    }

    /// Record a successful generation: write the artifact, mark the task
    /// complete, refresh job progress. Returns `false` when the result was
    /// discarded because the lease was lost or the job was cancelled.
    #[tracing::instrument(skip(self, task, output), fields(task_id = %task.id))]
    pub async fn complete_task(
        &self,
        task: &Task,
        worker_id: &str,
        output: GeneratedArtifact,
    ) -> QueueResult<bool> {
        // The sequence is authoritative for stage and document index.
        let (stage, document_index) = sequence::decode(task.sequence)?;
        if stage != task.stage {
            tracing::warn!(
                task_id = %task.id,
                sequence = task.sequence,
                stage_column = %task.stage,
                decoded_stage = %stage,
                "task stage column disagrees with sequence; sequence wins"
            );
        }

        let mut metadata = output.metadata;
        match metadata.as_object_mut() {
            Some(map) => {
                map.entry("document_index")
                    .or_insert_with(|| json!(document_index));
            }
            None => metadata = json!({ "document_index": document_index }),
        }

        let artifact = Artifact::new(
            task.job_id,
            task.id,
            stage,
            output.storage_reference,
            metadata,
        );

        let accepted = self
            .store
            .complete_task(task.id, worker_id, &artifact)
            .await?;
        if accepted {
            self.recompute_progress(task.job_id).await?;
            tracing::info!(
                task_id = %task.id,
                job_id = %task.job_id,
                stage = %stage,
                document_index,
                "task complete"
            );
        } else {
            tracing::info!(
                task_id = %task.id,
                job_id = %task.job_id,
                "result discarded: lease lost or job cancelled"
            );
        }
        Ok(accepted)
    }

    /// Record a failed generation under the bounded-retry policy. Returns
    /// the task's resulting status, or `None` when the lease was already
    /// lost and the failure was ignored.
    #[tracing::instrument(skip(self, task, error), fields(task_id = %task.id))]
    pub async fn fail_task(
        &self,
        task: &Task,
        worker_id: &str,
        error: &str,
    ) -> QueueResult<Option<TaskStatus>> {
        let outcome = self
            .store
            .fail_task(task.id, worker_id, error, self.max_attempts)
            .await?;

        match outcome {
            Some(status) => {
                tracing::warn!(
                    task_id = %task.id,
                    job_id = %task.job_id,
                    status = %status,
                    error,
                    "task failed"
                );
                self.recompute_progress(task.job_id).await?;
            }
            None => {
                tracing::info!(task_id = %task.id, "failure ignored: lease lost");
            }
        }
        Ok(outcome)
    }

    // ========== Manual recovery ==========

    /// Force-reset every claimed/processing task of a job, applying the same
    /// bounded-retry accounting as the stall watchdog. Operator override,
    /// independent of the timer.
    #[tracing::instrument(skip(self))]
    pub async fn reset_stuck_tasks(&self, job_id: Uuid) -> QueueResult<Vec<Task>> {
        self.get_job(job_id).await?;

        let recovered = self
            .store
            .recover_tasks(
                RecoveryFilter {
                    job_id: Some(job_id),
                    stalled_before: None,
                },
                self.max_attempts,
                MANUAL_RESET_MESSAGE,
            )
            .await?;

        for task in &recovered {
            tracing::warn!(
                task_id = %task.id,
                status = %task.status,
                attempts = task.attempts,
                "task force-reset by operator"
            );
        }

        let note = format!("{} task(s) reset by operator", recovered.len());
        self.recompute_with_note(job_id, Some(&note)).await?;
        Ok(recovered)
    }
}

/// Progress snapshot from task states.
fn progress_of(tasks: &[Task]) -> JobProgress {
    let total = tasks.len() as u32;
    let complete = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Complete)
        .count() as u32;
    let failed = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count() as u32;
    JobProgress::from_counts(total, complete, failed)
}

/// Aggregate status from task states.
///
/// Complete iff every task is complete. Error once a task has permanently
/// failed and nothing else can make progress: running tasks may still
/// finish, and pending tasks count as progress unless their text
/// prerequisite is itself permanently failed. Otherwise queued (nothing
/// started) or processing.
fn derive_status(tasks: &[Task]) -> JobStatus {
    if tasks.is_empty() {
        return JobStatus::Complete;
    }
    if tasks.iter().all(|t| t.status == TaskStatus::Complete) {
        return JobStatus::Complete;
    }

    let any_failed = tasks.iter().any(|t| t.status == TaskStatus::Failed);
    let any_running = tasks.iter().any(|t| t.status.is_running());

    if any_failed && !any_running {
        let any_pending_can_progress = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .any(|t| can_still_progress(t, tasks));
        if !any_pending_can_progress {
            return JobStatus::Error;
        }
    }

    if tasks.iter().all(|t| t.status == TaskStatus::Pending) {
        return JobStatus::Queued;
    }
    JobStatus::Processing
}

/// Whether a pending task could still be claimed eventually: text always
/// can; other stages can unless their text sibling is permanently failed.
fn can_still_progress(task: &Task, tasks: &[Task]) -> bool {
    let Ok((stage, document_index)) = sequence::decode(task.sequence) else {
        return false;
    };
    if stage == Stage::Text {
        return true;
    }
    for sibling in tasks {
        if sequence::decode(sibling.sequence) == Ok((Stage::Text, document_index)) {
            return sibling.status != TaskStatus::Failed;
        }
    }
    false
}

/// Human-readable failure summary: which documents are incomplete, plus the
/// most recent task error. Never a bare boolean.
fn failure_summary(tasks: &[Task]) -> String {
    let incomplete: BTreeSet<u32> = tasks
        .iter()
        .filter(|t| t.status != TaskStatus::Complete)
        .filter_map(|t| sequence::decode(t.sequence).ok().map(|(_, index)| index))
        .collect();
    let indexes = incomplete
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let last_error = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .filter_map(|t| t.error.as_deref())
        .next_back()
        .unwrap_or("unknown error");

    format!("documents {indexes} incomplete: {last_error}")
}
