//! # Metric Engine
//!
//! Both scorers accumulate per-example counts into a mergeable value and only
//! reduce to ratios at the end, so results do not depend on how inference was
//! batched. Every ratio with a zero denominator is reported as zero.

pub mod classification;
pub mod tagging;

use serde::{Deserialize, Serialize};

pub use classification::{
    ClassScore, ClassificationCounts, ClassificationMetrics, score_classification,
};
pub use tagging::{
    CategoryScore, EntityChunk, TaggingCounts, TaggingMetrics, extract_chunks, score_tagging,
};

/// Default sigmoid decision threshold for multi-label predictions.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Precision, recall and F1 derived from raw counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Prf {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Prf {
    pub fn from_counts(tp: u64, fp: u64, fn_: u64) -> Self {
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        Self {
            precision,
            recall,
            f1: harmonic_mean(precision, recall),
        }
    }
}

pub(crate) fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

pub(crate) fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Multi-hot predictions from raw logits: `1.0` where `sigmoid(logit) > threshold`.
pub fn threshold_probabilities(logits: &[f32], threshold: f32) -> Vec<f32> {
    logits
        .iter()
        .map(|&logit| if sigmoid(logit) > threshold { 1.0 } else { 0.0 })
        .collect()
}

/// Index of the largest value; the first one wins ties. `0` for an empty slice.
pub fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_value), (i, &value)| {
            if value > best_value {
                (i, value)
            } else {
                (best, best_value)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prf_zero_division() {
        assert_eq!(Prf::from_counts(0, 0, 0), Prf::default());
        let prf = Prf::from_counts(0, 3, 0);
        assert_eq!(prf.precision, 0.0);
        assert_eq!(prf.f1, 0.0);
    }

    #[test]
    fn test_prf_values() {
        let prf = Prf::from_counts(3, 1, 2);
        assert!((prf.precision - 0.75).abs() < 1e-12);
        assert!((prf.recall - 0.6).abs() < 1e-12);
        assert!((prf.f1 - 2.0 * 0.75 * 0.6 / 1.35).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_is_strict() {
        // sigmoid(0) == 0.5 exactly, which must not count as positive.
        assert_eq!(
            threshold_probabilities(&[0.0, 0.1, -3.0], 0.5),
            vec![0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 2.0, -1.0, 2.0]), 1);
        assert_eq!(argmax(&[]), 0);
        assert_eq!(argmax(&[-5.0]), 0);
    }
}
