//! Stage dependency resolution.
//!
//! Render, audio, and song output for a document all build on that
//! document's generated text, so their tasks are gated on the sibling text
//! task being complete. The check is evaluated fresh on every claim attempt
//! and never cached: the sibling's completion time is unknown in advance.
//!
//! The durable backend enforces the same rule inside its conditional claim
//! via the precomputed `depends_on` sequence; this resolver is the in-process
//! form used by the memory backend and by diagnostics.

use crate::models::{Task, TaskStatus};
use crate::sequence::{self, SequenceError, Stage};

/// Whether `task` is currently claimable, given the other tasks of its job.
///
/// Text tasks are unconditionally claimable. Any other stage is claimable
/// only once the text task for the same decoded document index is complete.
/// Stage and document index come from the authoritative sequence, not from
/// the redundant stage field.
pub fn is_claimable(task: &Task, job_tasks: &[Task]) -> Result<bool, SequenceError> {
    let (stage, document_index) = sequence::decode(task.sequence)?;
    if stage == Stage::Text {
        return Ok(true);
    }

    for sibling in job_tasks {
        if sibling.job_id != task.job_id || sibling.id == task.id {
            continue;
        }
        if sequence::decode(sibling.sequence)? == (Stage::Text, document_index) {
            return Ok(sibling.status == TaskStatus::Complete);
        }
    }

    // No text sibling at all: never claimable.
    Ok(false)
}
