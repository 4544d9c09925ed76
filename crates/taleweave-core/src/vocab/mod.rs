//! # Label Vocabularies
//!
//! Fixed, closed label sets shared by the dataset builder, the aligner, the
//! metric engine and every exported model. The id of a label is its position
//! in the constant arrays below; exported models embed these ids, so the order
//! must never change.

pub mod bio_tags;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, TaleweaveError};

pub use bio_tags::BioTag;

/// Maximum number of subword tokens per example, padding included.
pub const MAX_SEQ_LENGTH: usize = 128;

/// Label id for positions excluded from loss and metrics.
pub const IGNORE_INDEX: i64 = -100;

/// Event kind names in id order.
pub const EVENT_KIND_NAMES: [&str; 8] = [
    "StateAssertion",
    "ActionOccurrence",
    "SpatialChange",
    "EmotionalExpression",
    "InformationTransfer",
    "SpeechAct",
    "RelationalShift",
    "EnvironmentalChange",
];

/// Entity category names in id order.
pub const NER_CATEGORY_NAMES: [&str; 7] = [
    "CHARACTER",
    "OBJECT",
    "LOCATION",
    "GESTURE",
    "SENSORY",
    "ABSTRACT",
    "COLLECTIVE",
];

/// A string that does not name any member of a fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {vocabulary} {value:?}")]
pub struct ParseLabelError {
    pub vocabulary: &'static str,
    pub value: String,
}

/// Event kinds recognised by the sequence classifier.
///
/// Scene and entity lifecycle events are system-generated and never
/// extracted from text, so they are not part of this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    StateAssertion,
    ActionOccurrence,
    SpatialChange,
    EmotionalExpression,
    InformationTransfer,
    SpeechAct,
    RelationalShift,
    EnvironmentalChange,
}

impl EventKind {
    /// Number of classifiable event kinds.
    pub const COUNT: usize = 8;

    /// All kinds in id order.
    pub const ALL: [EventKind; Self::COUNT] = [
        EventKind::StateAssertion,
        EventKind::ActionOccurrence,
        EventKind::SpatialChange,
        EventKind::EmotionalExpression,
        EventKind::InformationTransfer,
        EventKind::SpeechAct,
        EventKind::RelationalShift,
        EventKind::EnvironmentalChange,
    ];

    /// Dense id used as the multi-hot column.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn as_str(self) -> &'static str {
        EVENT_KIND_NAMES[self.index()]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        EVENT_KIND_NAMES
            .iter()
            .position(|name| *name == s)
            .and_then(Self::from_index)
            .ok_or_else(|| ParseLabelError {
                vocabulary: "event kind",
                value: s.to_string(),
            })
    }
}

/// Entity categories tagged by the token classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NerCategory {
    /// A character or person, e.g. "Sarah", "the old man", "I".
    Character,
    /// A physical object, e.g. "the stone", "a sword".
    Object,
    /// A place or spatial reference, e.g. "the riverbed", "the clearing".
    Location,
    /// A gesture or body language, e.g. "clenched fists", "turned away".
    Gesture,
    /// A sensory detail, e.g. "a distant howl", "the smell of smoke".
    Sensory,
    /// An abstract concept, e.g. "the truth", "the betrayal".
    Abstract,
    /// A group or collective, e.g. "the villagers", "the council".
    Collective,
}

impl NerCategory {
    /// Number of entity categories.
    pub const COUNT: usize = 7;

    /// All categories in id order.
    pub const ALL: [NerCategory; Self::COUNT] = [
        NerCategory::Character,
        NerCategory::Object,
        NerCategory::Location,
        NerCategory::Gesture,
        NerCategory::Sensory,
        NerCategory::Abstract,
        NerCategory::Collective,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }

    pub fn as_str(self) -> &'static str {
        NER_CATEGORY_NAMES[self.index()]
    }
}

impl fmt::Display for NerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NerCategory {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        NER_CATEGORY_NAMES
            .iter()
            .position(|name| *name == s)
            .and_then(Self::from_index)
            .ok_or_else(|| ParseLabelError {
                vocabulary: "entity category",
                value: s.to_string(),
            })
    }
}

/// Derive the BIO tag list for an ordered set of categories:
/// `O, B-cat1, I-cat1, B-cat2, I-cat2, ...`.
pub fn bio_tag_names<S: AsRef<str>>(categories: &[S]) -> Vec<String> {
    let mut tags = Vec::with_capacity(1 + 2 * categories.len());
    tags.push("O".to_string());
    for category in categories {
        let category = category.as_ref();
        tags.push(format!("B-{category}"));
        tags.push(format!("I-{category}"));
    }
    tags
}

/// Bidirectional id maps for the classification labels and the BIO tags.
///
/// The typed enums cover the production label sets; this value exists so that
/// the same derivation can be exercised (and compared against) from an
/// arbitrary ordered list of names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
    classes: Vec<String>,
    class_to_id: HashMap<String, usize>,
    tags: Vec<String>,
    tag_to_id: HashMap<String, usize>,
}

impl LabelVocabulary {
    /// Build a vocabulary from ordered class names and ordered entity categories.
    pub fn new<C: AsRef<str>, E: AsRef<str>>(classes: &[C], categories: &[E]) -> Self {
        let classes: Vec<String> = classes.iter().map(|c| c.as_ref().to_string()).collect();
        let class_to_id = classes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let tags = bio_tag_names(categories);
        let tag_to_id = tags
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Self {
            classes,
            class_to_id,
            tags,
            tag_to_id,
        }
    }

    /// The production vocabulary: 8 event kinds and 15 BIO tags.
    pub fn standard() -> Self {
        Self::new(&EVENT_KIND_NAMES, &NER_CATEGORY_NAMES)
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn class_id(&self, name: &str) -> Option<usize> {
        self.class_to_id.get(name).copied()
    }

    pub fn class_name(&self, id: usize) -> Option<&str> {
        self.classes.get(id).map(String::as_str)
    }

    pub fn tag_id(&self, name: &str) -> Option<usize> {
        self.tag_to_id.get(name).copied()
    }

    pub fn tag_name(&self, id: usize) -> Option<&str> {
        self.tags.get(id).map(String::as_str)
    }
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self::standard()
    }
}

/// Compare a model's embedded `id2label` map against the expected names.
///
/// A mismatch here would silently scramble every prediction, so evaluation
/// refuses to run a model whose label ids differ from the compiled ones.
pub fn verify_id2label<S: AsRef<str>>(
    model: &str,
    expected: &[S],
    id2label: &BTreeMap<usize, String>,
) -> Result<()> {
    if id2label.len() != expected.len() {
        return Err(TaleweaveError::LabelMismatch(format!(
            "{model}: model declares {} labels, expected {}",
            id2label.len(),
            expected.len()
        )));
    }

    for (id, name) in expected.iter().enumerate() {
        match id2label.get(&id) {
            Some(found) if found == name.as_ref() => {}
            Some(found) => {
                return Err(TaleweaveError::LabelMismatch(format!(
                    "{model}: id {id} is {found:?} in the model, expected {:?}",
                    name.as_ref()
                )));
            }
            None => {
                return Err(TaleweaveError::LabelMismatch(format!(
                    "{model}: id {id} is missing from the model label map"
                )));
            }
        }
    }

    Ok(())
}
