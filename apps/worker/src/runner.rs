//! The worker loop: claim, execute, heartbeat, finish.
//!
//! Each claimed task runs on its own tokio task, bounded by a semaphore.
//! During generation the lease is refreshed on an interval; a failed
//! heartbeat means the stall watchdog reclaimed the task, and the worker
//! abandons it: the bounded duplicate work that can follow is an accepted
//! cost, since artifact writes are idempotent overwrites.

use std::sync::Arc;
use std::time::Duration;

use attune_queue::{
    sequence, GenerationBackend, GenerationRequest, JobQueue, QueueError, QueueResult, Stage, Task,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Polls for claimable tasks and drives them to completion.
pub struct WorkerRunner {
    queue: JobQueue,
    backend: Arc<dyn GenerationBackend>,
    worker_id: String,
    stages: Vec<Stage>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    max_concurrent: usize,
}

impl WorkerRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: JobQueue,
        backend: Arc<dyn GenerationBackend>,
        worker_id: String,
        stages: Vec<Stage>,
        poll_interval: Duration,
        heartbeat_interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            queue,
            backend,
            worker_id,
            stages,
            poll_interval,
            heartbeat_interval,
            max_concurrent,
        }
    }

    /// Run until `shutdown` fires, then drain in-flight tasks.
    ///
    /// Shutdown is cooperative: no new claims are made, but running
    /// generations finish (or are later reclaimed by the watchdog if the
    /// process dies first).
    pub async fn run(&self, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut executions: JoinSet<()> = JoinSet::new();
        let mut next_stage = 0usize;

        tracing::info!(
            worker_id = %self.worker_id,
            stages = ?self.stages,
            max_concurrent = self.max_concurrent,
            "worker running"
        );

        loop {
            while executions.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.claim_any_stage(&mut next_stage).await {
                Some(task) => {
                    let queue = self.queue.clone();
                    let backend = Arc::clone(&self.backend);
                    let worker_id = self.worker_id.clone();
                    let heartbeat_interval = self.heartbeat_interval;
                    executions.spawn(async move {
                        let _permit = permit;
                        if let Err(e) =
                            execute_task(&queue, backend.as_ref(), &worker_id, heartbeat_interval, &task)
                                .await
                        {
                            tracing::error!(
                                task_id = %task.id,
                                error = %e,
                                "task execution errored"
                            );
                        }
                    });
                }
                None => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        if !executions.is_empty() {
            tracing::info!(in_flight = executions.len(), "draining in-flight tasks");
        }
        while executions.join_next().await.is_some() {}
        tracing::info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Try each supported stage once, round-robin, and return the first
    /// claim that lands. `None` means nothing is claimable right now.
    async fn claim_any_stage(&self, next_stage: &mut usize) -> Option<Task> {
        for _ in 0..self.stages.len() {
            let stage = self.stages[*next_stage % self.stages.len()];
            *next_stage = next_stage.wrapping_add(1);
            match self.queue.claim_next_task(stage, &self.worker_id).await {
                Ok(Some(task)) => return Some(task),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(stage = %stage, error = %e, "claim attempt failed");
                    return None;
                }
            }
        }
        None
    }
}

/// Drive one claimed task: start it, call the backend with heartbeats
/// around the call, then record success or failure.
async fn execute_task(
    queue: &JobQueue,
    backend: &dyn GenerationBackend,
    worker_id: &str,
    heartbeat_interval: Duration,
    task: &Task,
) -> QueueResult<()> {
    if !queue.start_task(task, worker_id).await? {
        tracing::info!(task_id = %task.id, "lease lost before start; abandoning");
        return Ok(());
    }

    let job = match queue.get_job(task.job_id).await {
        Ok(job) => job,
        Err(QueueError::JobNotFound(_)) => {
            tracing::warn!(task_id = %task.id, "job vanished under the task; abandoning");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let (stage, document_index) = sequence::decode(task.sequence)?;
    let request = GenerationRequest {
        job_id: job.id,
        job_type: job.job_type,
        stage,
        document_index,
        params: job.params.clone(),
        input: task.input.clone(),
    };

    let outcome = generate_with_heartbeat(queue, backend, worker_id, heartbeat_interval, task, &request)
        .await?;

    match outcome {
        // Reclaimed mid-flight; whoever holds the lease now owns the result.
        None => Ok(()),
        Some(Ok(output)) => {
            queue.complete_task(task, worker_id, output).await?;
            Ok(())
        }
        Some(Err(e)) => {
            queue.fail_task(task, worker_id, &e.to_string()).await?;
            Ok(())
        }
    }
}

/// Run the backend call, refreshing the lease on an interval. Returns
/// `None` when a heartbeat finds the lease gone.
async fn generate_with_heartbeat(
    queue: &JobQueue,
    backend: &dyn GenerationBackend,
    worker_id: &str,
    heartbeat_interval: Duration,
    task: &Task,
    request: &GenerationRequest,
) -> QueueResult<Option<QueueResult<attune_queue::GeneratedArtifact>>> {
    let generation = backend.generate(request);
    tokio::pin!(generation);

    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and the lease is already fresh
    // from the claim.
    ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut generation => return Ok(Some(result)),
            _ = ticker.tick() => {
                if !queue.heartbeat_task(task, worker_id).await? {
                    tracing::warn!(
                        task_id = %task.id,
                        "lease lost mid-generation; abandoning task"
                    );
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use attune_queue::{
        GeneratedArtifact, JobQueue, JobStatus, JobType, MemoryQueueStore, QueueError,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that fabricates storage references, failing for any stage
    /// listed in `fail_stages`.
    struct ScriptedBackend {
        calls: AtomicUsize,
        fail_stages: Vec<Stage>,
    }

    impl ScriptedBackend {
        fn new(fail_stages: Vec<Stage>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_stages,
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(
            &self,
            request: &attune_queue::GenerationRequest,
        ) -> Result<GeneratedArtifact, QueueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_stages.contains(&request.stage) {
                return Err(QueueError::generation(request.stage, "scripted failure"));
            }
            Ok(GeneratedArtifact {
                storage_reference: format!(
                    "mem://{}/{}",
                    request.stage, request.document_index
                ),
                metadata: json!({}),
            })
        }
    }

    fn test_runner(queue: JobQueue, backend: Arc<dyn GenerationBackend>) -> WorkerRunner {
        WorkerRunner::new(
            queue,
            backend,
            "test-worker".to_string(),
            vec![Stage::Text, Stage::Render, Stage::Audio, Stage::Song],
            Duration::from_millis(10),
            Duration::from_millis(50),
            2,
        )
    }

    async fn wait_for_status(queue: &JobQueue, job_id: uuid::Uuid, status: JobStatus) {
        for _ in 0..300 {
            if queue.get_job(job_id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "job never reached {status:?}; last state: {:?}",
            queue.get_job(job_id).await.unwrap().status
        );
    }

    #[tokio::test]
    async fn test_runner_drives_job_to_completion() {
        let queue = JobQueue::new(Arc::new(MemoryQueueStore::new()), 3);
        let job = queue
            .create_job(
                JobType::SingleReading,
                json!({
                    "subject": {"name": "Ada", "birth_date": "1990-03-14"},
                    "system": "Numerology"
                }),
            )
            .await
            .unwrap();

        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let runner = test_runner(queue.clone(), backend);
        let shutdown = CancellationToken::new();
        let handle = {
            let token = shutdown.clone();
            tokio::spawn(async move { runner.run(token).await })
        };

        wait_for_status(&queue, job.id, JobStatus::Complete).await;
        shutdown.cancel();
        handle.await.unwrap();

        // Every document stage has an artifact.
        let (_, documents) = queue.get_job_view(job.id).await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(
            documents[0].text.as_ref().unwrap().storage_reference,
            "mem://text/1"
        );
        assert!(documents[0].render.is_some());
        assert!(documents[0].audio.is_some());
    }

    #[tokio::test]
    async fn test_runner_exhausts_retries_into_job_error() {
        let queue = JobQueue::new(Arc::new(MemoryQueueStore::new()), 2);
        let job = queue
            .create_job(
                JobType::SingleReading,
                json!({
                    "subject": {"name": "Ada", "birth_date": "1990-03-14"},
                    "system": "Numerology"
                }),
            )
            .await
            .unwrap();

        // Text always fails, so nothing downstream ever unlocks.
        let backend = Arc::new(ScriptedBackend::new(vec![Stage::Text]));
        let runner = test_runner(queue.clone(), backend);
        let shutdown = CancellationToken::new();
        let handle = {
            let token = shutdown.clone();
            tokio::spawn(async move { runner.run(token).await })
        };

        wait_for_status(&queue, job.id, JobStatus::Error).await;
        shutdown.cancel();
        handle.await.unwrap();

        let tasks = queue.get_job_tasks(job.id).await.unwrap();
        let text = tasks.iter().find(|t| t.stage == Stage::Text).unwrap();
        assert_eq!(text.attempts, 2);
        assert!(text.error.as_deref().unwrap().contains("scripted failure"));
    }
}
