//! The computed per-document view.
//!
//! Documents are never persisted. They are recomputed at read time from
//! tasks and artifacts so the view stays correct even when artifact
//! metadata is incomplete or disagrees with task sequences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sequence::Stage;

/// Pointer to the current artifact for one stage of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: Uuid,
    pub storage_reference: String,
    pub created_at: DateTime<Utc>,
}

/// One logical chapter of a reading package, with whatever stage outputs
/// exist so far. Partial documents are valid and must render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// 1-based position within the job.
    pub document_index: u32,

    /// Display title from the job-type manifest.
    pub title: String,

    pub text: Option<ArtifactRef>,
    pub render: Option<ArtifactRef>,
    pub audio: Option<ArtifactRef>,
    pub song: Option<ArtifactRef>,
}

impl Document {
    /// Create an empty document shell.
    pub fn new(document_index: u32, title: String) -> Self {
        Self {
            document_index,
            title,
            text: None,
            render: None,
            audio: None,
            song: None,
        }
    }

    /// The current output for a stage, if any.
    pub fn stage_output(&self, stage: Stage) -> Option<&ArtifactRef> {
        match stage {
            Stage::Text => self.text.as_ref(),
            Stage::Render => self.render.as_ref(),
            Stage::Audio => self.audio.as_ref(),
            Stage::Song => self.song.as_ref(),
        }
    }

    /// Record the current output for a stage, replacing any older one.
    pub fn set_stage_output(&mut self, stage: Stage, output: ArtifactRef) {
        let slot = match stage {
            Stage::Text => &mut self.text,
            Stage::Render => &mut self.render,
            Stage::Audio => &mut self.audio,
            Stage::Song => &mut self.song,
        };
        *slot = Some(output);
    }

    /// Whether any stage has produced output yet.
    pub fn has_output(&self) -> bool {
        self.text.is_some() || self.render.is_some() || self.audio.is_some() || self.song.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ref(reference: &str) -> ArtifactRef {
        ArtifactRef {
            artifact_id: Uuid::new_v4(),
            storage_reference: reference.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_stage_slots() {
        let mut doc = Document::new(1, "Western Astrology".to_string());
        assert!(!doc.has_output());

        doc.set_stage_output(Stage::Audio, sample_ref("s3://a/1.ogg"));
        assert!(doc.has_output());
        assert!(doc.stage_output(Stage::Audio).is_some());
        assert!(doc.stage_output(Stage::Text).is_none());

        // Replacement keeps only the newest reference.
        doc.set_stage_output(Stage::Audio, sample_ref("s3://a/2.ogg"));
        assert_eq!(
            doc.stage_output(Stage::Audio).unwrap().storage_reference,
            "s3://a/2.ogg"
        );
    }
}
