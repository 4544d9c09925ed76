//! Entity-level scoring of BIO tag sequences.
//!
//! Gold and predicted sequences are decoded into entity chunks and compared
//! by exact `(category, start, end)` match. Positions whose gold label is the
//! ignore id are dropped from both sequences first.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{Prf, ratio, harmonic_mean};
use crate::vocab::{BioTag, IGNORE_INDEX, NerCategory};

/// A contiguous entity span over token positions, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityChunk {
    pub category: NerCategory,
    pub start: usize,
    pub end: usize,
}

/// Decode chunks from a tag sequence.
///
/// Lenient IOB2: an `I-X` that follows `O` or a tag of a different category
/// opens a new chunk instead of being dropped.
pub fn extract_chunks(tags: &[BioTag]) -> Vec<EntityChunk> {
    let mut chunks = Vec::new();
    let mut open: Option<(NerCategory, usize)> = None;

    for (i, tag) in tags.iter().enumerate() {
        let continues = match (open, tag) {
            (Some((category, _)), BioTag::Inside(c)) => category == *c,
            _ => false,
        };
        if continues {
            continue;
        }

        if let Some((category, start)) = open.take() {
            chunks.push(EntityChunk {
                category,
                start,
                end: i,
            });
        }
        if let Some(category) = tag.category() {
            open = Some((category, i));
        }
    }

    if let Some((category, start)) = open {
        chunks.push(EntityChunk {
            category,
            start,
            end: tags.len(),
        });
    }
    chunks
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EntityCounts {
    true_positives: u64,
    predicted: u64,
    gold: u64,
}

impl EntityCounts {
    fn add(&mut self, other: &EntityCounts) {
        self.true_positives += other.true_positives;
        self.predicted += other.predicted;
        self.gold += other.gold;
    }
}

/// Mergeable per-category entity counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggingCounts {
    per_category: BTreeMap<NerCategory, EntityCounts>,
}

impl TaggingCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one example's gold and predicted label ids.
    ///
    /// Predicted ids outside the tag set decode as `O`.
    pub fn add(&mut self, gold: &[i64], pred: &[i64]) {
        let (gold_tags, pred_tags): (Vec<BioTag>, Vec<BioTag>) = gold
            .iter()
            .zip(pred)
            .filter(|(g, _)| **g != IGNORE_INDEX)
            .map(|(g, p)| {
                (
                    BioTag::from_id(*g).unwrap_or(BioTag::Outside),
                    BioTag::from_id(*p).unwrap_or(BioTag::Outside),
                )
            })
            .unzip();

        let gold_chunks = extract_chunks(&gold_tags);
        let pred_chunks = extract_chunks(&pred_tags);
        let gold_set: HashSet<&EntityChunk> = gold_chunks.iter().collect();

        for chunk in &gold_chunks {
            self.per_category.entry(chunk.category).or_default().gold += 1;
        }
        for chunk in &pred_chunks {
            let counts = self.per_category.entry(chunk.category).or_default();
            counts.predicted += 1;
            if gold_set.contains(chunk) {
                counts.true_positives += 1;
            }
        }
    }

    pub fn merge(&mut self, other: &TaggingCounts) {
        for (category, counts) in &other.per_category {
            self.per_category.entry(*category).or_default().add(counts);
        }
    }

    /// Whether any entity occurred in gold or predictions.
    pub fn has_entities(&self) -> bool {
        self.per_category
            .values()
            .any(|c| c.gold > 0 || c.predicted > 0)
    }

    /// Micro-averaged entity metrics plus a breakdown for every category that
    /// occurred in gold or predictions.
    pub fn finish(&self) -> TaggingMetrics {
        let mut total = EntityCounts::default();
        let mut per_category = Vec::new();

        for (category, counts) in &self.per_category {
            total.add(counts);
            if counts.gold == 0 && counts.predicted == 0 {
                continue;
            }
            let prf = Prf::from_counts(
                counts.true_positives,
                counts.predicted - counts.true_positives,
                counts.gold - counts.true_positives,
            );
            per_category.push(CategoryScore {
                category: *category,
                precision: prf.precision,
                recall: prf.recall,
                f1: prf.f1,
                support: counts.gold,
            });
        }

        let precision = ratio(total.true_positives, total.predicted);
        let recall = ratio(total.true_positives, total.gold);
        TaggingMetrics {
            precision,
            recall,
            f1: harmonic_mean(precision, recall),
            gold_entities: total.gold,
            predicted_entities: total.predicted,
            per_category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: NerCategory,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Gold entities of this category.
    pub support: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaggingMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub gold_entities: u64,
    pub predicted_entities: u64,
    pub per_category: Vec<CategoryScore>,
}

impl TaggingMetrics {
    pub fn has_entities(&self) -> bool {
        self.gold_entities > 0 || self.predicted_entities > 0
    }
}

/// Score predicted label-id sequences against gold ones, example by example.
pub fn score_tagging(gold: &[Vec<i64>], pred: &[Vec<i64>]) -> TaggingMetrics {
    let mut counts = TaggingCounts::new();
    for (g, p) in gold.iter().zip(pred) {
        counts.add(g, p);
    }
    counts.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const O: i64 = 0;
    const B_CHAR: i64 = 1;
    const I_CHAR: i64 = 2;
    const B_OBJ: i64 = 3;
    const I_OBJ: i64 = 4;
    const B_LOC: i64 = 5;
    const X: i64 = IGNORE_INDEX;

    fn tags(ids: &[i64]) -> Vec<BioTag> {
        ids.iter().filter_map(|id| BioTag::from_id(*id)).collect()
    }

    fn gold() -> Vec<Vec<i64>> {
        vec![
            vec![X, B_CHAR, O, B_OBJ, I_OBJ, O, B_CHAR, X, X],
            vec![X, O, B_LOC, O, X],
            vec![X, O, O, X],
        ]
    }

    #[test]
    fn test_extract_chunks() {
        let chunks = extract_chunks(&tags(&[B_CHAR, I_CHAR, O, B_OBJ, B_OBJ, I_OBJ]));
        assert_eq!(
            chunks,
            vec![
                EntityChunk {
                    category: NerCategory::Character,
                    start: 0,
                    end: 2,
                },
                EntityChunk {
                    category: NerCategory::Object,
                    start: 3,
                    end: 4,
                },
                EntityChunk {
                    category: NerCategory::Object,
                    start: 4,
                    end: 6,
                },
            ]
        );
    }

    #[test]
    fn test_lenient_inside_opens_chunk() {
        let chunks = extract_chunks(&tags(&[O, I_CHAR, I_CHAR, I_OBJ]));
        assert_eq!(
            chunks,
            vec![
                EntityChunk {
                    category: NerCategory::Character,
                    start: 1,
                    end: 3,
                },
                EntityChunk {
                    category: NerCategory::Object,
                    start: 3,
                    end: 4,
                },
            ]
        );
    }

    #[test]
    fn test_exact_predictions_score_one() {
        let gold = gold();
        let metrics = score_tagging(&gold, &gold);
        assert_eq!(metrics.f1, 1.0);
        assert_eq!(metrics.gold_entities, 4);
        assert_eq!(metrics.per_category.len(), 3);
        assert!(metrics.per_category.iter().all(|c| c.f1 == 1.0));
    }

    #[test]
    fn test_empty_predictions_zero_recall() {
        let gold = gold();
        let pred: Vec<Vec<i64>> = gold.iter().map(|row| vec![O; row.len()]).collect();
        let metrics = score_tagging(&gold, &pred);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.f1, 0.0);
    }

    #[test]
    fn test_partial_span_is_not_a_match() {
        let gold = vec![vec![X, B_OBJ, I_OBJ, O, X]];
        let pred = vec![vec![O, B_OBJ, O, O, O]];
        let metrics = score_tagging(&gold, &pred);
        assert_eq!(metrics.precision, 0.0);
        assert_eq!(metrics.recall, 0.0);
    }

    #[test]
    fn test_wrong_category_is_not_a_match() {
        let gold = vec![vec![B_CHAR, O]];
        let pred = vec![vec![B_LOC, O]];
        let metrics = score_tagging(&gold, &pred);
        assert_eq!(metrics.f1, 0.0);
        assert_eq!(metrics.per_category.len(), 2);
    }

    #[test]
    fn test_ignored_positions_are_dropped() {
        // The prediction at the ignored position would otherwise break the span.
        let gold = vec![vec![B_CHAR, X, I_CHAR]];
        let pred = vec![vec![B_CHAR, B_OBJ, I_CHAR]];
        let metrics = score_tagging(&gold, &pred);
        assert_eq!(metrics.f1, 1.0);
    }

    #[test]
    fn test_no_entities_anywhere() {
        let gold = vec![vec![X, O, O, X]];
        let metrics = score_tagging(&gold, &gold);
        assert!(!metrics.has_entities());
        assert_eq!(metrics.f1, 0.0);
        assert!(metrics.per_category.is_empty());

        let empty = score_tagging(&[], &[]);
        assert_eq!(empty, TaggingMetrics::default());
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let gold = gold();
        let mut pred = gold.clone();
        pred[0][3] = O;

        let whole = score_tagging(&gold, &pred);
        let mut first = TaggingCounts::new();
        first.add(&gold[2], &pred[2]);
        first.add(&gold[0], &pred[0]);
        let mut second = TaggingCounts::new();
        second.add(&gold[1], &pred[1]);
        second.merge(&first);
        assert_eq!(second.finish(), whole);
    }
}
