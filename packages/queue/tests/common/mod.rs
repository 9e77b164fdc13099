//! Shared test infrastructure for queue integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;

use attune_queue::{
    GeneratedArtifact, Job, JobQueue, JobType, MemoryQueueStore, Stage, Task,
};

/// A queue service over a fresh in-memory store.
pub fn memory_queue(max_attempts: i32) -> JobQueue {
    JobQueue::new(Arc::new(MemoryQueueStore::new()), max_attempts)
}

/// Valid single-participant parameters.
pub fn solo_params() -> serde_json::Value {
    json!({
        "subject": {"name": "Ada", "birth_date": "1990-03-14"}
    })
}

/// Valid two-participant parameters.
pub fn couple_params() -> serde_json::Value {
    json!({
        "subject": {"name": "Ada", "birth_date": "1990-03-14"},
        "partner": {"name": "Sam", "birth_date": "1988-11-02"}
    })
}

/// A hand-built narration job: 2 documents, text + audio stages only, so
/// the task sequences are exactly {0, 1, 200, 201}.
pub fn two_document_narration_job() -> (Job, Vec<Task>) {
    let job = Job::new(JobType::CompleteReading, solo_params(), 4);
    let tasks = [0, 1, 200, 201]
        .into_iter()
        .map(|sequence| Task::from_sequence(job.id, sequence, json!({})).unwrap())
        .collect();
    (job, tasks)
}

/// Insert the hand-built narration job into the queue's store.
pub async fn insert_narration_job(queue: &JobQueue) -> (Job, Vec<Task>) {
    let (job, tasks) = two_document_narration_job();
    queue.store().insert_job(&job, &tasks).await.unwrap();
    (job, tasks)
}

/// Claim the next task of a stage and move it to processing.
pub async fn claim_and_start(queue: &JobQueue, stage: Stage, worker: &str) -> Task {
    let task = queue
        .claim_next_task(stage, worker)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no claimable {stage} task"));
    assert!(queue.start_task(&task, worker).await.unwrap());
    task
}

/// Complete a processing task with a synthetic artifact.
pub async fn complete(queue: &JobQueue, task: &Task, worker: &str, reference: &str) {
    let accepted = queue
        .complete_task(
            task,
            worker,
            GeneratedArtifact {
                storage_reference: reference.to_string(),
                metadata: json!({}),
            },
        )
        .await
        .unwrap();
    assert!(accepted, "completion was discarded for {}", task.id);
}
