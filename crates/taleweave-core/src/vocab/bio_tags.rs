//! # BIO Tags for Entity Tagging
//!
//! Defines the tag set for token-level labeling of narrative text.
//! Uses the BIO (Begin-Inside-Outside) tagging scheme over [`NerCategory`].

use std::fmt;
use std::str::FromStr;

use super::{NerCategory, ParseLabelError};

/// BIO tags for labeling subword tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BioTag {
    /// Outside any entity.
    Outside,
    /// First token of an entity.
    Begin(NerCategory),
    /// Continuation token of an entity.
    Inside(NerCategory),
}

impl BioTag {
    /// Total number of distinct tags: `O` plus a B/I pair per category.
    pub const NUM_TAGS: usize = 1 + 2 * NerCategory::COUNT;

    /// All tags in id order.
    pub fn all_tags() -> Vec<BioTag> {
        (0..Self::NUM_TAGS).filter_map(Self::from_index).collect()
    }

    /// Get the tag index for tensor operations.
    pub fn index(&self) -> usize {
        match self {
            BioTag::Outside => 0,
            BioTag::Begin(category) => 1 + 2 * category.index(),
            BioTag::Inside(category) => 2 + 2 * category.index(),
        }
    }

    /// Get tag from index.
    pub fn from_index(idx: usize) -> Option<Self> {
        if idx == 0 {
            return Some(BioTag::Outside);
        }
        let category = NerCategory::from_index((idx - 1) / 2)?;
        if idx % 2 == 1 {
            Some(BioTag::Begin(category))
        } else {
            Some(BioTag::Inside(category))
        }
    }

    /// Label id as stored in training tensors.
    pub fn id(&self) -> i64 {
        self.index() as i64
    }

    /// Tag for a label id; `None` for the ignore id or anything out of range.
    pub fn from_id(id: i64) -> Option<Self> {
        usize::try_from(id).ok().and_then(Self::from_index)
    }

    /// Check if this is a "Begin" tag.
    pub fn is_begin(&self) -> bool {
        matches!(self, BioTag::Begin(_))
    }

    /// Check if this is an "Inside" tag.
    pub fn is_inside(&self) -> bool {
        matches!(self, BioTag::Inside(_))
    }

    /// Get the entity category for this tag.
    pub fn category(&self) -> Option<NerCategory> {
        match self {
            BioTag::Begin(category) | BioTag::Inside(category) => Some(*category),
            BioTag::Outside => None,
        }
    }
}

impl fmt::Display for BioTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BioTag::Outside => write!(f, "O"),
            BioTag::Begin(category) => write!(f, "B-{category}"),
            BioTag::Inside(category) => write!(f, "I-{category}"),
        }
    }
}

impl FromStr for BioTag {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ParseLabelError {
            vocabulary: "BIO tag",
            value: s.to_string(),
        };

        if s == "O" {
            return Ok(BioTag::Outside);
        }
        if let Some(category) = s.strip_prefix("B-") {
            return category.parse().map(BioTag::Begin).map_err(|_| unknown());
        }
        if let Some(category) = s.strip_prefix("I-") {
            return category.parse().map(BioTag::Inside).map_err(|_| unknown());
        }
        Err(unknown())
    }
}
