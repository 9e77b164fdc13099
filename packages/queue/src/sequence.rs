//! Sequence codec: the single mapping between task sequence numbers and
//! (stage, document index) pairs.
//!
//! Every task carries an integer `sequence` that is unique within its job.
//! Each generation stage owns a disjoint band of 100 sequence values, and the
//! document index is the 1-based offset into the band:
//!
//! | stage  | band      |
//! |--------|-----------|
//! | text   | 0..=99    |
//! | render | 100..=199 |
//! | audio  | 200..=299 |
//! | song   | 300..=399 |
//!
//! The bands are fixed for the lifetime of the system; moving a boundary
//! would invalidate every previously persisted task. All other modules go
//! through [`encode`] and [`decode`]: none of them re-derive the band
//! arithmetic on their own.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of each stage band. Also the maximum number of documents a single
/// job can address per stage.
pub const BAND_WIDTH: i32 = 100;

/// A content generation stage.
///
/// The discriminant order matches the band layout: `text` owns the lowest
/// band and `song` the highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "stage", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Text,
    Render,
    Audio,
    Song,
}

impl Stage {
    /// All stages, in band order.
    pub const ALL: [Stage; 4] = [Stage::Text, Stage::Render, Stage::Audio, Stage::Song];

    /// First sequence value of this stage's band.
    pub fn band_start(&self) -> i32 {
        match self {
            Stage::Text => 0,
            Stage::Render => BAND_WIDTH,
            Stage::Audio => 2 * BAND_WIDTH,
            Stage::Song => 3 * BAND_WIDTH,
        }
    }

    /// Stable lowercase name, matching the database enum and wire format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Text => "text",
            Stage::Render => "render",
            Stage::Audio => "audio",
            Stage::Song => "song",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Stage::Text),
            "render" => Ok(Stage::Render),
            "audio" => Ok(Stage::Audio),
            "song" => Ok(Stage::Song),
            other => Err(SequenceError::UnknownStage(other.to_string())),
        }
    }
}

/// Errors produced by the codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    /// Document index outside 1..=100. Indexes are 1-based and user-visible.
    #[error("document index {0} is out of range (expected 1..={BAND_WIDTH})")]
    DocumentIndexOutOfRange(u32),

    /// Sequence value outside every defined stage band.
    #[error("sequence {0} falls outside every stage band")]
    OutOfBand(i32),

    /// Stage name not recognized.
    #[error("unknown stage: {0}")]
    UnknownStage(String),
}

/// Encode a (stage, 1-based document index) pair into a sequence number.
pub fn encode(stage: Stage, document_index: u32) -> Result<i32, SequenceError> {
    if document_index == 0 || document_index > BAND_WIDTH as u32 {
        return Err(SequenceError::DocumentIndexOutOfRange(document_index));
    }
    Ok(stage.band_start() + document_index as i32 - 1)
}

/// Decode a sequence number into its (stage, 1-based document index) pair.
///
/// Total over every defined band. Values outside all bands are rejected here,
/// which in practice happens at task-creation time: persisted sequences are
/// always decodable.
pub fn decode(sequence: i32) -> Result<(Stage, u32), SequenceError> {
    for stage in Stage::ALL {
        let start = stage.band_start();
        if sequence >= start && sequence < start + BAND_WIDTH {
            return Ok((stage, (sequence - start + 1) as u32));
        }
    }
    Err(SequenceError::OutOfBand(sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_stages() {
        for stage in Stage::ALL {
            for index in 1..=BAND_WIDTH as u32 {
                let sequence = encode(stage, index).unwrap();
                assert_eq!(decode(sequence).unwrap(), (stage, index));
            }
        }
    }

    #[test]
    fn test_bands_are_disjoint() {
        let mut seen = std::collections::HashSet::new();
        for stage in Stage::ALL {
            for index in 1..=BAND_WIDTH as u32 {
                assert!(seen.insert(encode(stage, index).unwrap()));
            }
        }
        assert_eq!(seen.len(), 4 * BAND_WIDTH as usize);
    }

    #[test]
    fn test_known_sequences() {
        assert_eq!(encode(Stage::Text, 1).unwrap(), 0);
        assert_eq!(encode(Stage::Text, 2).unwrap(), 1);
        assert_eq!(encode(Stage::Audio, 1).unwrap(), 200);
        assert_eq!(encode(Stage::Audio, 2).unwrap(), 201);
        assert_eq!(encode(Stage::Song, 100).unwrap(), 399);
        assert_eq!(decode(399).unwrap(), (Stage::Song, 100));
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        assert_eq!(
            encode(Stage::Text, 0),
            Err(SequenceError::DocumentIndexOutOfRange(0))
        );
        assert_eq!(
            encode(Stage::Song, 101),
            Err(SequenceError::DocumentIndexOutOfRange(101))
        );
    }

    #[test]
    fn test_rejects_out_of_band_sequence() {
        assert_eq!(decode(-1), Err(SequenceError::OutOfBand(-1)));
        assert_eq!(decode(400), Err(SequenceError::OutOfBand(400)));
    }

    #[test]
    fn test_stage_parsing() {
        assert_eq!("text".parse::<Stage>().unwrap(), Stage::Text);
        assert_eq!("song".parse::<Stage>().unwrap(), Stage::Song);
        assert!("pdf".parse::<Stage>().is_err());
        assert_eq!(Stage::Render.to_string(), "render");
    }
}
