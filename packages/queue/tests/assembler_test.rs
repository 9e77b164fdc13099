//! Document assembly: metadata-then-sequence resolution, newest-wins, and
//! partial documents.

mod common;

use attune_queue::{Artifact, JobType, Stage};
use chrono::Duration as ChronoDuration;
use common::*;
use serde_json::json;

#[tokio::test]
async fn test_documents_cover_every_task_index() {
    let queue = memory_queue(3);
    let job = queue
        .create_job(JobType::CompatibilityReading, couple_params())
        .await
        .unwrap();

    // Nothing generated yet: three empty documents with manifest titles.
    let (_, documents) = queue.get_job_view(job.id).await.unwrap();
    assert_eq!(documents.len(), 3);
    assert_eq!(documents[0].title, "Ada's Reading");
    assert_eq!(documents[1].title, "Sam's Reading");
    assert_eq!(documents[2].title, "Compatibility Overlay");
    assert!(documents.iter().all(|d| !d.has_output()));
}

#[tokio::test]
async fn test_partial_document_renders() {
    let queue = memory_queue(3);
    let job = queue
        .create_job(JobType::CompatibilityReading, couple_params())
        .await
        .unwrap();

    let text = claim_and_start(&queue, Stage::Text, "w1").await;
    complete(&queue, &text, "w1", "s3://attune/text/1.md").await;

    let (_, documents) = queue.get_job_view(job.id).await.unwrap();
    let first = &documents[0];
    assert_eq!(first.document_index, 1);
    assert_eq!(
        first.text.as_ref().unwrap().storage_reference,
        "s3://attune/text/1.md"
    );
    assert!(first.render.is_none());
    assert!(first.audio.is_none());
    assert!(first.song.is_none());
}

#[tokio::test]
async fn test_resolution_survives_stripped_metadata() {
    let queue = memory_queue(3);
    let job = queue
        .create_job(JobType::CompatibilityReading, couple_params())
        .await
        .unwrap();
    let tasks = queue.get_job_tasks(job.id).await.unwrap();
    let text_doc2 = tasks.iter().find(|t| t.sequence == 1).unwrap();

    // An artifact with no metadata at all: only the task's sequence says
    // which document it belongs to.
    let bare = Artifact::new(
        job.id,
        text_doc2.id,
        Stage::Text,
        "s3://attune/text/2.md".to_string(),
        json!({}),
    );
    queue.store().insert_artifact(&bare).await.unwrap();

    let artifact = queue
        .get_document_artifact(job.id, 2, Stage::Text)
        .await
        .unwrap();
    assert_eq!(artifact.storage_reference, "s3://attune/text/2.md");
}

#[tokio::test]
async fn test_sequence_wins_over_conflicting_metadata() {
    let queue = memory_queue(3);
    let job = queue
        .create_job(JobType::CompatibilityReading, couple_params())
        .await
        .unwrap();
    let tasks = queue.get_job_tasks(job.id).await.unwrap();
    let text_doc1 = tasks.iter().find(|t| t.sequence == 0).unwrap();

    // Metadata claims document 7; the sequence says document 1.
    let conflicting = Artifact::new(
        job.id,
        text_doc1.id,
        Stage::Text,
        "s3://attune/text/1.md".to_string(),
        json!({"document_index": 7}),
    );
    queue.store().insert_artifact(&conflicting).await.unwrap();

    let (_, documents) = queue.get_job_view(job.id).await.unwrap();
    assert!(documents[0].text.is_some());
    assert!(!documents.iter().any(|d| d.document_index == 7));
}

#[tokio::test]
async fn test_newest_artifact_wins_after_regeneration() {
    let queue = memory_queue(3);
    let job = queue
        .create_job(JobType::SingleReading, json!({
            "subject": {"name": "Ada", "birth_date": "1990-03-14"},
            "system": "Numerology"
        }))
        .await
        .unwrap();

    let text = claim_and_start(&queue, Stage::Text, "w1").await;
    complete(&queue, &text, "w1", "s3://attune/text/v1.md").await;

    // Forced regeneration adds a newer row for the same document and stage.
    let regenerated = Artifact {
        created_at: chrono::Utc::now() + ChronoDuration::seconds(5),
        ..Artifact::new(
            job.id,
            text.id,
            Stage::Text,
            "s3://attune/text/v2.md".to_string(),
            json!({}),
        )
    };
    queue.store().insert_artifact(&regenerated).await.unwrap();

    let current = queue
        .get_document_artifact(job.id, 1, Stage::Text)
        .await
        .unwrap();
    assert_eq!(current.storage_reference, "s3://attune/text/v2.md");
}

#[tokio::test]
async fn test_orphan_artifact_resolves_by_metadata() {
    let queue = memory_queue(3);
    let job = queue
        .create_job(JobType::CompleteReading, solo_params())
        .await
        .unwrap();

    // No task link at all; metadata is the only clue.
    let orphan = Artifact {
        task_id: None,
        ..Artifact::new(
            job.id,
            uuid::Uuid::new_v4(),
            Stage::Render,
            "s3://attune/render/3.pdf".to_string(),
            json!({"document_index": 3}),
        )
    };
    queue.store().insert_artifact(&orphan).await.unwrap();

    let artifact = queue
        .get_document_artifact(job.id, 3, Stage::Render)
        .await
        .unwrap();
    assert_eq!(artifact.storage_reference, "s3://attune/render/3.pdf");
}
