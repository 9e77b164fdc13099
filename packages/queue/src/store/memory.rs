//! In-process queue store: a mutex-guarded map with an optional JSON file
//! mirror.
//!
//! Serves the single-node deployment mode and the test suite. Atomicity of
//! the claim and of every lease transition comes from holding the one state
//! mutex across the whole read-check-write; the file mirror is written
//! through after each mutation so a restart can pick up where it left off.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dependency;
use crate::error::QueueResult;
use crate::models::{Artifact, Job, JobProgress, JobStatus, Task, TaskStatus};
use crate::sequence::Stage;
use crate::store::{QueueStore, RecoveryFilter};

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    tasks: HashMap<Uuid, Task>,
    artifacts: Vec<Artifact>,
}

/// Map-backed [`QueueStore`] with write-through JSON mirroring.
pub struct MemoryQueueStore {
    state: Mutex<MemoryState>,
    mirror_path: Option<PathBuf>,
}

impl MemoryQueueStore {
    /// Purely in-memory store (tests, ephemeral runs).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            mirror_path: None,
        }
    }

    /// Store mirrored to a JSON file. Existing state at `path` is loaded,
    /// so a restarted single-node process sees its previous jobs.
    pub async fn with_mirror(path: impl Into<PathBuf>) -> QueueResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MemoryState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            state: Mutex::new(state),
            mirror_path: Some(path),
        })
    }

    async fn mirror(&self, state: &MemoryState) -> QueueResult<()> {
        if let Some(path) = &self.mirror_path {
            let bytes = serde_json::to_vec_pretty(state)?;
            tokio::fs::write(path, bytes).await?;
        }
        Ok(())
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert_job(&self, job: &Job, tasks: &[Task]) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id, job.clone());
        for task in tasks {
            state.tasks.insert(task.id, task.clone());
        }
        self.mirror(&state).await
    }

    async fn get_job(&self, job_id: Uuid) -> QueueResult<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> QueueResult<Vec<Job>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn update_job_state(
        &self,
        job_id: Uuid,
        status: JobStatus,
        progress: &JobProgress,
        message: Option<&str>,
    ) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        job.status = status;
        job.progress = *progress;
        job.status_message = message.map(|m| m.to_string());
        job.updated_at = Utc::now();
        self.mirror(&state).await?;
        Ok(true)
    }

    async fn bump_job_attempts(&self, job_id: Uuid) -> QueueResult<Option<i32>> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        job.attempts += 1;
        job.updated_at = Utc::now();
        let attempts = job.attempts;
        self.mirror(&state).await?;
        Ok(Some(attempts))
    }

    async fn delete_job(&self, job_id: Uuid) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        if state.jobs.remove(&job_id).is_none() {
            return Ok(false);
        }
        state.tasks.retain(|_, t| t.job_id != job_id);
        state.artifacts.retain(|a| a.job_id != job_id);
        self.mirror(&state).await?;
        Ok(true)
    }

    async fn get_task(&self, task_id: Uuid) -> QueueResult<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&task_id).cloned())
    }

    async fn list_tasks(&self, job_id: Uuid) -> QueueResult<Vec<Task>> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.job_id == job_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.sequence);
        Ok(tasks)
    }

    async fn claim_next_task(&self, stage: Stage, worker_id: &str) -> QueueResult<Option<Task>> {
        let mut state = self.state.lock().await;

        // FIFO within the stage: oldest first, then sequence order.
        let mut candidates: Vec<(chrono::DateTime<Utc>, i32, Uuid)> = state
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.stage == stage)
            .filter(|t| {
                state
                    .jobs
                    .get(&t.job_id)
                    .map(|j| j.status.is_active())
                    .unwrap_or(false)
            })
            .map(|t| (t.created_at, t.sequence, t.id))
            .collect();
        candidates.sort();

        for (_, _, id) in candidates {
            let Some(task) = state.tasks.get(&id).cloned() else {
                continue;
            };
            let job_tasks: Vec<Task> = state
                .tasks
                .values()
                .filter(|t| t.job_id == task.job_id)
                .cloned()
                .collect();
            if !dependency::is_claimable(&task, &job_tasks)? {
                continue;
            }

            let now = Utc::now();
            let Some(task) = state.tasks.get_mut(&id) else {
                continue;
            };
            task.status = TaskStatus::Claimed;
            task.worker_id = Some(worker_id.to_string());
            task.claimed_at = Some(now);
            task.last_heartbeat = Some(now);
            task.updated_at = now;
            let claimed = task.clone();
            self.mirror(&state).await?;
            return Ok(Some(claimed));
        }

        Ok(None)
    }

    async fn start_task(&self, task_id: Uuid, worker_id: &str) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Claimed || task.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        task.status = TaskStatus::Processing;
        task.updated_at = Utc::now();
        self.mirror(&state).await?;
        Ok(true)
    }

    async fn heartbeat_task(&self, task_id: Uuid, worker_id: &str) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(false);
        };
        if !task.status.is_running() || task.worker_id.as_deref() != Some(worker_id) {
            return Ok(false);
        }
        let now = Utc::now();
        task.last_heartbeat = Some(now);
        task.updated_at = now;
        self.mirror(&state).await?;
        Ok(true)
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        worker_id: &str,
        artifact: &Artifact,
    ) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        {
            let Some(task) = state.tasks.get_mut(&task_id) else {
                return Ok(false);
            };
            // A cancelled job has already marked its tasks failed, so this
            // condition also discards results from cancelled work.
            if task.status != TaskStatus::Processing
                || task.worker_id.as_deref() != Some(worker_id)
            {
                return Ok(false);
            }
            task.status = TaskStatus::Complete;
            task.error = None;
            task.updated_at = Utc::now();
        }
        state.artifacts.push(artifact.clone());
        self.mirror(&state).await?;
        Ok(true)
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        worker_id: &str,
        error: &str,
        max_attempts: i32,
    ) -> QueueResult<Option<TaskStatus>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if !task.status.is_running() || task.worker_id.as_deref() != Some(worker_id) {
            return Ok(None);
        }
        task.attempts += 1;
        task.status = if task.attempts < max_attempts {
            TaskStatus::Pending
        } else {
            TaskStatus::Failed
        };
        task.error = Some(error.to_string());
        task.worker_id = None;
        task.claimed_at = None;
        task.last_heartbeat = None;
        task.updated_at = Utc::now();
        let status = task.status;
        self.mirror(&state).await?;
        Ok(Some(status))
    }

    async fn cancel_tasks(&self, job_id: Uuid, reason: &str) -> QueueResult<u64> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut stopped = 0;
        for task in state.tasks.values_mut() {
            if task.job_id == job_id && !task.status.is_terminal() {
                task.status = TaskStatus::Failed;
                task.error = Some(reason.to_string());
                task.worker_id = None;
                task.claimed_at = None;
                task.last_heartbeat = None;
                task.updated_at = now;
                stopped += 1;
            }
        }
        if stopped > 0 {
            self.mirror(&state).await?;
        }
        Ok(stopped)
    }

    async fn recover_tasks(
        &self,
        filter: RecoveryFilter,
        max_attempts: i32,
        error: &str,
    ) -> QueueResult<Vec<Task>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut recovered = Vec::new();

        for task in state.tasks.values_mut() {
            if !task.status.is_running() {
                continue;
            }
            if let Some(job_id) = filter.job_id {
                if task.job_id != job_id {
                    continue;
                }
            }
            if let Some(cutoff) = filter.stalled_before {
                // A running task with no heartbeat at all is an orphan.
                if task.last_heartbeat.map(|hb| hb >= cutoff).unwrap_or(false) {
                    continue;
                }
            }

            task.attempts += 1;
            task.status = if task.attempts < max_attempts {
                TaskStatus::Pending
            } else {
                TaskStatus::Failed
            };
            task.error = Some(error.to_string());
            task.worker_id = None;
            task.claimed_at = None;
            task.last_heartbeat = None;
            task.updated_at = now;
            recovered.push(task.clone());
        }

        if !recovered.is_empty() {
            self.mirror(&state).await?;
        }
        recovered.sort_by_key(|t| (t.job_id, t.sequence));
        Ok(recovered)
    }

    async fn insert_artifact(&self, artifact: &Artifact) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.artifacts.push(artifact.clone());
        self.mirror(&state).await
    }

    async fn list_artifacts(&self, job_id: Uuid) -> QueueResult<Vec<Artifact>> {
        let state = self.state.lock().await;
        let mut artifacts: Vec<Artifact> = state
            .artifacts
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        artifacts.sort_by_key(|a| a.created_at);
        Ok(artifacts)
    }
}
