//! Artifact assembly: the per-document view, recomputed at read time.
//!
//! Resolution order for an artifact's document index is explicit: the
//! artifact's own metadata when present, otherwise the decoded sequence of
//! its producing task. When both exist and disagree, the disagreement is
//! logged and the sequence wins: never a silent guess, never "first
//! artifact found".

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::manifest;
use crate::models::{Artifact, ArtifactRef, Document, Job};
use crate::sequence::{self, Stage};
use crate::store::QueueStore;

/// Assemble the per-document view of a job.
///
/// Returns one entry per document index present in tasks or artifacts. A
/// document with only a subset of stage outputs is valid and renders as-is.
/// When several artifacts exist for the same (index, stage), as after a
/// forced regeneration or duplicate work from a reclaim, the most recently
/// created wins.
pub async fn build_documents(store: &dyn QueueStore, job: &Job) -> QueueResult<Vec<Document>> {
    let tasks = store.list_tasks(job.id).await?;
    let artifacts = store.list_artifacts(job.id).await?;

    let validated = manifest::validate_params(job.job_type, &job.params).ok();
    let title_for = |index: u32| match &validated {
        Some(params) => manifest::document_title(job.job_type, params, index),
        None => format!("Chapter {index}"),
    };

    let mut documents: BTreeMap<u32, Document> = BTreeMap::new();

    // Every task index gets an entry, so not-yet-generated documents are
    // visible to callers.
    let mut sequence_by_task: HashMap<Uuid, i32> = HashMap::with_capacity(tasks.len());
    for task in &tasks {
        sequence_by_task.insert(task.id, task.sequence);
        match sequence::decode(task.sequence) {
            Ok((_, index)) => {
                documents
                    .entry(index)
                    .or_insert_with(|| Document::new(index, title_for(index)));
            }
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "undecodable task sequence");
            }
        }
    }

    // Oldest first (the store returns them that way), so the newest artifact
    // for a slot is the one left standing.
    for artifact in &artifacts {
        let Some((index, stage)) = resolve_artifact(artifact, &sequence_by_task) else {
            continue;
        };
        documents
            .entry(index)
            .or_insert_with(|| Document::new(index, title_for(index)))
            .set_stage_output(
                stage,
                ArtifactRef {
                    artifact_id: artifact.id,
                    storage_reference: artifact.storage_reference.clone(),
                    created_at: artifact.created_at,
                },
            );
    }

    Ok(documents.into_values().collect())
}

/// Fetch the current artifact reference for one (document index, stage) of
/// a job, resolved through the same rules as [`build_documents`].
pub async fn find_document_artifact(
    store: &dyn QueueStore,
    job: &Job,
    document_index: u32,
    stage: Stage,
) -> QueueResult<ArtifactRef> {
    let documents = build_documents(store, job).await?;
    documents
        .iter()
        .find(|d| d.document_index == document_index)
        .and_then(|d| d.stage_output(stage))
        .cloned()
        .ok_or(QueueError::ArtifactNotFound {
            document_index,
            stage,
        })
}

/// Resolve which (document index, stage) an artifact belongs to.
///
/// Metadata first, then the task's sequence; sequence authoritative on
/// disagreement. An artifact with neither is unresolvable and skipped.
fn resolve_artifact(
    artifact: &Artifact,
    sequence_by_task: &HashMap<Uuid, i32>,
) -> Option<(u32, Stage)> {
    let decoded = artifact
        .task_id
        .and_then(|task_id| sequence_by_task.get(&task_id))
        .and_then(|seq| match sequence::decode(*seq) {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!(artifact_id = %artifact.id, error = %e, "undecodable artifact sequence");
                None
            }
        });
    let metadata_index = artifact.metadata_document_index();

    match (decoded, metadata_index) {
        (Some((stage, index)), Some(meta_index)) => {
            if meta_index != index {
                tracing::warn!(
                    artifact_id = %artifact.id,
                    metadata_index = meta_index,
                    sequence_index = index,
                    "artifact metadata disagrees with task sequence; sequence wins"
                );
            }
            if stage != artifact.stage {
                tracing::warn!(
                    artifact_id = %artifact.id,
                    stage_column = %artifact.stage,
                    sequence_stage = %stage,
                    "artifact stage column disagrees with task sequence; sequence wins"
                );
            }
            Some((index, stage))
        }
        (Some((stage, index)), None) => Some((index, stage)),
        (None, Some(meta_index)) => Some((meta_index, artifact.stage)),
        (None, None) => {
            tracing::warn!(
                artifact_id = %artifact.id,
                "artifact has neither metadata index nor a decodable task; skipped"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn artifact(task_id: Option<Uuid>, stage: Stage, metadata: serde_json::Value) -> Artifact {
        Artifact {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            task_id,
            stage,
            storage_reference: "s3://attune/x".to_string(),
            metadata,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_prefers_sequence_on_disagreement() {
        let task_id = Uuid::new_v4();
        let mut map = HashMap::new();
        map.insert(task_id, 201); // audio, document 2

        let conflicting = artifact(Some(task_id), Stage::Audio, json!({"document_index": 7}));
        assert_eq!(
            resolve_artifact(&conflicting, &map),
            Some((2, Stage::Audio))
        );
    }

    #[test]
    fn test_resolve_falls_back_to_metadata_without_task() {
        let orphan = artifact(None, Stage::Render, json!({"document_index": 4}));
        assert_eq!(
            resolve_artifact(&orphan, &HashMap::new()),
            Some((4, Stage::Render))
        );
    }

    #[test]
    fn test_resolve_skips_unresolvable() {
        let unresolvable = artifact(None, Stage::Text, json!({}));
        assert_eq!(resolve_artifact(&unresolvable, &HashMap::new()), None);
    }
}
