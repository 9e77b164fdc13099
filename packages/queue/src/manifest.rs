//! Declared manifests: which stages run for which document indexes, per job
//! type.
//!
//! The manifest is consulted exactly once, at job creation, to pre-compute
//! every task's sequence through the codec. Nothing downstream branches on
//! the job type string to guess band layouts: the manifest is the single
//! declaration of which (stage, document) pairs exist, including the types
//! where the song stage applies to only a subset of documents.

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};
use crate::models::JobType;
use crate::sequence::{self, SequenceError, Stage};

/// The five reading systems, in chapter order.
pub const READING_SYSTEMS: [&str; 5] = [
    "Western Astrology",
    "Vedic Astrology",
    "Chinese Zodiac",
    "Numerology",
    "Human Design",
];

/// One person in a reading request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Display name, used in document titles.
    pub name: String,
    /// Birth date, ISO 8601 date string.
    pub birth_date: String,
    /// Birth time, when known. Refines several systems.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_time: Option<String>,
    /// Birth place, free-form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_place: Option<String>,
}

impl Participant {
    fn validate(&self, label: &str) -> QueueResult<()> {
        if self.name.trim().is_empty() {
            return Err(QueueError::validation(format!("{label}.name is required")));
        }
        if self.birth_date.trim().is_empty() {
            return Err(QueueError::validation(format!(
                "{label}.birth_date is required"
            )));
        }
        Ok(())
    }
}

/// Validated job parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingParams {
    /// The person the reading is for.
    pub subject: Participant,
    /// Second participant, required for two-participant job types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<Participant>,
    /// Chosen reading system, required for `SingleReading`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// Parse and validate raw job parameters against the job type's
/// requirements. Fails with `QueueError::Validation` before anything is
/// persisted.
pub fn validate_params(job_type: JobType, params: &serde_json::Value) -> QueueResult<ReadingParams> {
    let parsed: ReadingParams = serde_json::from_value(params.clone())
        .map_err(|e| QueueError::validation(format!("malformed params: {e}")))?;

    parsed.subject.validate("subject")?;

    match job_type {
        JobType::SingleReading => {
            let system = parsed
                .system
                .as_deref()
                .ok_or_else(|| QueueError::validation("system is required for single_reading"))?;
            if !READING_SYSTEMS.contains(&system) {
                return Err(QueueError::validation(format!(
                    "unknown reading system: {system}"
                )));
            }
        }
        JobType::CompleteReading => {}
        JobType::CompatibilityReading | JobType::FullPackage => {
            let partner = parsed.partner.as_ref().ok_or_else(|| {
                QueueError::validation(format!("partner is required for {job_type}"))
            })?;
            partner.validate("partner")?;
        }
    }

    Ok(parsed)
}

/// Which document indexes a stage applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDocuments {
    /// Every document in the job.
    All,
    /// An explicit subset of 1-based indexes.
    Only(&'static [u32]),
}

/// One stage's slice of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub stage: Stage,
    pub documents: StageDocuments,
}

/// The full task layout for one job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobManifest {
    /// Number of logical documents in the package.
    pub document_count: u32,
    /// Ordered stage plans.
    pub stages: &'static [StagePlan],
}

impl JobManifest {
    /// Resolve the manifest into concrete task sequences, one per
    /// (stage, document index) pair, encoded through the codec.
    pub fn task_sequences(&self) -> Result<Vec<i32>, SequenceError> {
        let mut sequences = Vec::new();
        for plan in self.stages {
            match plan.documents {
                StageDocuments::All => {
                    for index in 1..=self.document_count {
                        sequences.push(sequence::encode(plan.stage, index)?);
                    }
                }
                StageDocuments::Only(indexes) => {
                    for &index in indexes {
                        if index == 0 || index > self.document_count {
                            return Err(SequenceError::DocumentIndexOutOfRange(index));
                        }
                        sequences.push(sequence::encode(plan.stage, index)?);
                    }
                }
            }
        }
        Ok(sequences)
    }
}

const SINGLE_READING: JobManifest = JobManifest {
    document_count: 1,
    stages: &[
        StagePlan {
            stage: Stage::Text,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Render,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Audio,
            documents: StageDocuments::All,
        },
    ],
};

// Theme song for the opening chapter only.
const COMPLETE_READING: JobManifest = JobManifest {
    document_count: 5,
    stages: &[
        StagePlan {
            stage: Stage::Text,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Render,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Audio,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Song,
            documents: StageDocuments::Only(&[1]),
        },
    ],
};

// Documents 1 and 2 are the individual readings; 3 is the overlay, which is
// the only document that gets a song.
const COMPATIBILITY_READING: JobManifest = JobManifest {
    document_count: 3,
    stages: &[
        StagePlan {
            stage: Stage::Text,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Render,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Audio,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Song,
            documents: StageDocuments::Only(&[3]),
        },
    ],
};

// Five systems per participant plus the final verdict (document 11), which
// carries the couple's song.
const FULL_PACKAGE: JobManifest = JobManifest {
    document_count: 11,
    stages: &[
        StagePlan {
            stage: Stage::Text,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Render,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Audio,
            documents: StageDocuments::All,
        },
        StagePlan {
            stage: Stage::Song,
            documents: StageDocuments::Only(&[11]),
        },
    ],
};

impl JobType {
    /// The declared manifest for this job type.
    pub fn manifest(&self) -> &'static JobManifest {
        match self {
            JobType::SingleReading => &SINGLE_READING,
            JobType::CompleteReading => &COMPLETE_READING,
            JobType::CompatibilityReading => &COMPATIBILITY_READING,
            JobType::FullPackage => &FULL_PACKAGE,
        }
    }
}

/// Display title for one document of a job.
///
/// Falls back to a plain chapter label for indexes the manifest does not
/// describe, so the assembler can still render documents discovered from
/// artifacts alone.
pub fn document_title(job_type: JobType, params: &ReadingParams, index: u32) -> String {
    let manifest = job_type.manifest();
    if index == 0 || index > manifest.document_count {
        return format!("Chapter {index}");
    }

    match job_type {
        JobType::SingleReading => params
            .system
            .clone()
            .unwrap_or_else(|| format!("Chapter {index}")),
        JobType::CompleteReading => READING_SYSTEMS[(index - 1) as usize].to_string(),
        JobType::CompatibilityReading => match index {
            1 => format!("{}'s Reading", params.subject.name),
            2 => match &params.partner {
                Some(partner) => format!("{}'s Reading", partner.name),
                None => format!("Chapter {index}"),
            },
            _ => "Compatibility Overlay".to_string(),
        },
        JobType::FullPackage => {
            if index <= 5 {
                format!(
                    "{} — {}",
                    params.subject.name,
                    READING_SYSTEMS[(index - 1) as usize]
                )
            } else if index <= 10 {
                match &params.partner {
                    Some(partner) => {
                        format!("{} — {}", partner.name, READING_SYSTEMS[(index - 6) as usize])
                    }
                    None => format!("Chapter {index}"),
                }
            } else {
                "Final Verdict".to_string()
            }
        }
    }
}
