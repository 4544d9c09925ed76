//! # Behavior Feature Schema
//!
//! Layout of the 453-element input vector and the 42-element label vector
//! consumed by the behavior predictor. The inference runtime encodes features
//! with the same constants, so every value here is part of the model contract.

use std::ops::Range;

use crate::error::{Result, TaleweaveError};

// Input regions

pub const MAX_TENSOR_AXES: usize = 16;
/// Axis value (4) + temporal layer (4) + provenance (5).
pub const FEATURES_PER_AXIS: usize = 4 + 4 + 5;

pub const NUM_PRIMARIES: usize = 8;
/// Intensity (1) + awareness level (5).
pub const FEATURES_PER_PRIMARY: usize = 1 + 5;

/// Trust (3) + affection + debt + history weight + projection accuracy.
pub const SELF_EDGE_FEATURES: usize = 7;

pub const MAX_EDGES: usize = 5;
/// 5 substrate dimensions x axis value (4) + topological role (4).
pub const FEATURES_PER_EDGE: usize = 5 * 4 + 4;

/// Scene type (4) + cast size + tension.
pub const SCENE_FEATURES: usize = 6;

/// Event type (7) + emotional register (7) + confidence + target count.
pub const EVENT_FEATURES: usize = 16;

pub const HISTORY_DEPTH: usize = 3;
/// Action type (6) + speech register (4) + awareness level (5) + valence.
pub const FEATURES_PER_HISTORY: usize = 16;

pub const TOTAL_INPUT_FEATURES: usize = MAX_TENSOR_AXES * FEATURES_PER_AXIS
    + NUM_PRIMARIES * FEATURES_PER_PRIMARY
    + SELF_EDGE_FEATURES
    + MAX_EDGES * FEATURES_PER_EDGE
    + SCENE_FEATURES
    + EVENT_FEATURES
    + HISTORY_DEPTH * FEATURES_PER_HISTORY;

// Output heads

pub const NUM_ACTION_TYPES: usize = 6;
pub const NUM_ACTION_CONTEXTS: usize = 5;
pub const NUM_SPEECH_REGISTERS: usize = 4;
pub const NUM_AWARENESS_LEVELS: usize = 5;

pub const ACTION_HEAD_SIZE: usize = NUM_ACTION_TYPES + 1 + 1 + 1 + NUM_ACTION_CONTEXTS;
pub const SPEECH_HEAD_SIZE: usize = 1 + NUM_SPEECH_REGISTERS + 1;
pub const THOUGHT_HEAD_SIZE: usize = NUM_AWARENESS_LEVELS + 1;
pub const EMOTION_HEAD_SIZE: usize = NUM_PRIMARIES + NUM_PRIMARIES;

pub const TOTAL_OUTPUT_FEATURES: usize =
    ACTION_HEAD_SIZE + SPEECH_HEAD_SIZE + THOUGHT_HEAD_SIZE + EMOTION_HEAD_SIZE;

// Absolute offsets into the label vector

pub const ACTION_TYPE_RANGE: Range<usize> = 0..6;
pub const ACTION_CONFIDENCE_IDX: usize = 6;
pub const ACTION_TARGET_IDX: usize = 7;
pub const ACTION_VALENCE_IDX: usize = 8;
pub const ACTION_CONTEXT_RANGE: Range<usize> = 9..14;

pub const SPEECH_OCCURS_IDX: usize = 14;
pub const SPEECH_REGISTER_RANGE: Range<usize> = 15..19;
pub const SPEECH_CONFIDENCE_IDX: usize = 19;

pub const AWARENESS_LEVEL_RANGE: Range<usize> = 20..25;
pub const DOMINANT_EMOTION_IDX: usize = 25;

pub const INTENSITY_DELTA_RANGE: Range<usize> = 26..34;
pub const AWARENESS_SHIFT_RANGE: Range<usize> = 34..42;

// Names for reporting

pub const ACTION_TYPES: [&str; NUM_ACTION_TYPES] =
    ["Perform", "Speak", "Move", "Examine", "Wait", "Resist"];

pub const ACTION_CONTEXTS: [&str; NUM_ACTION_CONTEXTS] = [
    "SharedHistory",
    "CurrentScene",
    "EmotionalReaction",
    "RelationalDynamic",
    "WorldResponse",
];

pub const SPEECH_REGISTERS: [&str; NUM_SPEECH_REGISTERS] =
    ["Whisper", "Conversational", "Declamatory", "Internal"];

pub const AWARENESS_LEVELS: [&str; NUM_AWARENESS_LEVELS] = [
    "Articulate",
    "Recognizable",
    "Preconscious",
    "Defended",
    "Structural",
];

pub const EMOTIONAL_PRIMARIES: [&str; NUM_PRIMARIES] = [
    "Joy",
    "Trust",
    "Fear",
    "Surprise",
    "Sadness",
    "Disgust",
    "Anger",
    "Anticipation",
];

/// Bumped whenever any constant above changes meaning.
pub const SCHEMA_VERSION: u32 = 1;

/// One of the four prediction heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Head {
    Action,
    Speech,
    Thought,
    Emotion,
}

impl Head {
    /// Heads in label-vector order.
    pub const ALL: [Head; 4] = [Head::Action, Head::Speech, Head::Thought, Head::Emotion];

    pub fn name(self) -> &'static str {
        match self {
            Head::Action => "action",
            Head::Speech => "speech",
            Head::Thought => "thought",
            Head::Emotion => "emotion",
        }
    }

    pub fn size(self) -> usize {
        match self {
            Head::Action => ACTION_HEAD_SIZE,
            Head::Speech => SPEECH_HEAD_SIZE,
            Head::Thought => THOUGHT_HEAD_SIZE,
            Head::Emotion => EMOTION_HEAD_SIZE,
        }
    }

    /// First label column owned by this head.
    pub fn offset(self) -> usize {
        Self::ALL
            .iter()
            .take_while(|head| **head != self)
            .map(|head| head.size())
            .sum()
    }

    /// Label columns owned by this head.
    pub fn label_range(self) -> Range<usize> {
        let start = self.offset();
        start..start + self.size()
    }
}

impl std::fmt::Display for Head {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Check that a feature/label pair matches the schema dimensions.
pub fn verify_dimensions(features: &[f32], labels: &[f32]) -> Result<()> {
    verify_lengths(0, features.len(), labels.len())
}

pub(crate) fn verify_lengths(line: usize, features: usize, labels: usize) -> Result<()> {
    if features != TOTAL_INPUT_FEATURES {
        return Err(TaleweaveError::DimensionMismatch {
            line,
            field: "features",
            expected: TOTAL_INPUT_FEATURES,
            found: features,
        });
    }
    if labels != TOTAL_OUTPUT_FEATURES {
        return Err(TaleweaveError::DimensionMismatch {
            line,
            field: "labels",
            expected: TOTAL_OUTPUT_FEATURES,
            found: labels,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_total() {
        assert_eq!(TOTAL_INPUT_FEATURES, 453);
        assert_eq!(MAX_TENSOR_AXES * FEATURES_PER_AXIS, 208);
        assert_eq!(MAX_EDGES * FEATURES_PER_EDGE, 120);
    }

    #[test]
    fn test_output_total() {
        assert_eq!(TOTAL_OUTPUT_FEATURES, 42);
        let sum: usize = Head::ALL.iter().map(|h| h.size()).sum();
        assert_eq!(sum, TOTAL_OUTPUT_FEATURES);
    }

    #[test]
    fn test_head_offsets_are_contiguous() {
        assert_eq!(Head::Action.label_range(), 0..14);
        assert_eq!(Head::Speech.label_range(), 14..20);
        assert_eq!(Head::Thought.label_range(), 20..26);
        assert_eq!(Head::Emotion.label_range(), 26..42);
    }

    #[test]
    fn test_slices_inside_their_heads() {
        let action = Head::Action.label_range();
        assert!(action.contains(&ACTION_TYPE_RANGE.start));
        assert_eq!(ACTION_CONTEXT_RANGE.end, action.end);
        assert_eq!(SPEECH_OCCURS_IDX, Head::Speech.offset());
        assert_eq!(SPEECH_CONFIDENCE_IDX + 1, Head::Speech.label_range().end);
        assert_eq!(AWARENESS_LEVEL_RANGE.start, Head::Thought.offset());
        assert_eq!(DOMINANT_EMOTION_IDX + 1, Head::Thought.label_range().end);
        assert_eq!(INTENSITY_DELTA_RANGE.start, Head::Emotion.offset());
        assert_eq!(AWARENESS_SHIFT_RANGE.end, TOTAL_OUTPUT_FEATURES);
    }

    #[test]
    fn test_name_lists_match_sizes() {
        assert_eq!(ACTION_TYPES.len(), ACTION_TYPE_RANGE.len());
        assert_eq!(ACTION_CONTEXTS.len(), ACTION_CONTEXT_RANGE.len());
        assert_eq!(SPEECH_REGISTERS.len(), SPEECH_REGISTER_RANGE.len());
        assert_eq!(AWARENESS_LEVELS.len(), AWARENESS_LEVEL_RANGE.len());
        assert_eq!(EMOTIONAL_PRIMARIES.len(), INTENSITY_DELTA_RANGE.len());
    }

    #[test]
    fn test_verify_dimensions() {
        let features = vec![0.0; TOTAL_INPUT_FEATURES];
        let labels = vec![0.0; TOTAL_OUTPUT_FEATURES];
        assert!(verify_dimensions(&features, &labels).is_ok());

        let err = verify_dimensions(&features[1..], &labels).unwrap_err();
        assert!(err.to_string().contains("features vector has 452 elements"));

        let err = verify_dimensions(&features, &labels[..41]).unwrap_err();
        assert!(err.to_string().contains("labels vector has 41 elements"));
    }
}
