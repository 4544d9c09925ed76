//! # Span-to-Label Alignment
//!
//! Converts character-span entity annotations into one BIO label id per
//! subword token, given the tokenizer's offset mapping.
//!
//! For each token:
//!
//! 1. no offset (special token, padding) → [`IGNORE_INDEX`]
//! 2. zero-width offset `(s, s)` → [`IGNORE_INDEX`]
//! 3. the first entity in input order overlapping `[tok_start, tok_end)` labels
//!    it, `B-` when the token starts at or before the entity start, `I-` otherwise
//! 4. no overlapping entity → `O`
//!
//! When two annotations cover the same token only the first listed one
//! contributes. Entities need not be sorted.

use crate::record::EntityAnnotation;
use crate::vocab::{BioTag, IGNORE_INDEX};

/// Character offsets of one token, `None` when it has no source text.
pub type TokenOffset = Option<(usize, usize)>;

/// Label one token.
pub fn label_token(entities: &[EntityAnnotation], offset: TokenOffset) -> i64 {
    let Some((tok_start, tok_end)) = offset else {
        return IGNORE_INDEX;
    };
    if tok_start == tok_end {
        return IGNORE_INDEX;
    }

    let tag = entities
        .iter()
        .find(|entity| entity.overlaps(tok_start, tok_end))
        .map(|entity| {
            if tok_start <= entity.start {
                BioTag::Begin(entity.category)
            } else {
                BioTag::Inside(entity.category)
            }
        })
        .unwrap_or(BioTag::Outside);

    tag.id()
}

/// One label id per offset entry, same length as `offsets`.
pub fn align_bio_labels(entities: &[EntityAnnotation], offsets: &[TokenOffset]) -> Vec<i64> {
    offsets
        .iter()
        .map(|offset| label_token(entities, *offset))
        .collect()
}

/// Align, then truncate or right-pad with [`IGNORE_INDEX`] to `max_len`.
pub fn align_and_pad(
    entities: &[EntityAnnotation],
    offsets: &[TokenOffset],
    max_len: usize,
) -> Vec<i64> {
    let take = offsets.len().min(max_len);
    let mut labels = align_bio_labels(entities, &offsets[..take]);
    labels.resize(max_len, IGNORE_INDEX);
    labels
}
