//! Multi-label classification scoring.

use serde::{Deserialize, Serialize};

use super::Prf;

/// Per-class confusion counts over a stream of multi-hot examples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationCounts {
    tp: Vec<u64>,
    fp: Vec<u64>,
    fn_: Vec<u64>,
}

impl ClassificationCounts {
    pub fn new(num_classes: usize) -> Self {
        Self {
            tp: vec![0; num_classes],
            fp: vec![0; num_classes],
            fn_: vec![0; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.tp.len()
    }

    /// Add one example. Values `>= 0.5` count as positive; columns beyond
    /// `num_classes` are ignored.
    pub fn add(&mut self, gold: &[f32], pred: &[f32]) {
        for c in 0..self.num_classes() {
            let g = gold.get(c).is_some_and(|v| *v >= 0.5);
            let p = pred.get(c).is_some_and(|v| *v >= 0.5);
            match (g, p) {
                (true, true) => self.tp[c] += 1,
                (false, true) => self.fp[c] += 1,
                (true, false) => self.fn_[c] += 1,
                (false, false) => {}
            }
        }
    }

    pub fn merge(&mut self, other: &ClassificationCounts) {
        if self.num_classes() < other.num_classes() {
            let n = other.num_classes();
            self.tp.resize(n, 0);
            self.fp.resize(n, 0);
            self.fn_.resize(n, 0);
        }
        for c in 0..other.num_classes() {
            self.tp[c] += other.tp[c];
            self.fp[c] += other.fp[c];
            self.fn_[c] += other.fn_[c];
        }
    }

    /// Reduce to per-class and macro metrics. Classes beyond `names` are
    /// reported as `class_{id}`.
    pub fn finish<S: AsRef<str>>(&self, names: &[S]) -> ClassificationMetrics {
        let per_class: Vec<ClassScore> = (0..self.num_classes())
            .map(|c| {
                let prf = Prf::from_counts(self.tp[c], self.fp[c], self.fn_[c]);
                ClassScore {
                    name: names
                        .get(c)
                        .map(|n| n.as_ref().to_string())
                        .unwrap_or_else(|| format!("class_{c}")),
                    precision: prf.precision,
                    recall: prf.recall,
                    f1: prf.f1,
                    support: self.tp[c] + self.fn_[c],
                }
            })
            .collect();

        ClassificationMetrics {
            macro_precision: mean(&per_class, |s| s.precision),
            macro_recall: mean(&per_class, |s| s.recall),
            macro_f1: mean(&per_class, |s| s.f1),
            per_class,
        }
    }
}

fn mean(scores: &[ClassScore], value: impl Fn(&ClassScore) -> f64) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().map(value).sum::<f64>() / scores.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Gold positives for this class.
    pub support: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub per_class: Vec<ClassScore>,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
}

impl ClassificationMetrics {
    pub fn class(&self, name: &str) -> Option<&ClassScore> {
        self.per_class.iter().find(|s| s.name == name)
    }
}

/// Score multi-hot predictions against multi-hot gold labels.
///
/// The macro average runs over every class in `names`, including classes
/// with no support.
pub fn score_classification<S: AsRef<str>>(
    gold: &[Vec<f32>],
    pred: &[Vec<f32>],
    names: &[S],
) -> ClassificationMetrics {
    let mut counts = ClassificationCounts::new(names.len());
    for (g, p) in gold.iter().zip(pred) {
        counts.add(g, p);
    }
    counts.finish(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::EVENT_KIND_NAMES;

    fn one_hot(width: usize, on: &[usize]) -> Vec<f32> {
        let mut row = vec![0.0; width];
        for &i in on {
            row[i] = 1.0;
        }
        row
    }

    /// Every class appears at least once.
    fn gold() -> Vec<Vec<f32>> {
        vec![
            one_hot(8, &[0, 1]),
            one_hot(8, &[2]),
            one_hot(8, &[3, 4]),
            one_hot(8, &[5]),
            one_hot(8, &[6, 7]),
            one_hot(8, &[1, 5]),
        ]
    }

    #[test]
    fn test_exact_predictions_score_one() {
        let gold = gold();
        let metrics = score_classification(&gold, &gold, &EVENT_KIND_NAMES);
        assert_eq!(metrics.per_class.len(), 8);
        assert!((metrics.macro_f1 - 1.0).abs() < 1e-12);
        assert!((metrics.macro_precision - 1.0).abs() < 1e-12);
        assert!((metrics.macro_recall - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_predictions_zero_recall() {
        let gold = gold();
        let empty = vec![vec![0.0; 8]; gold.len()];
        let metrics = score_classification(&gold, &empty, &EVENT_KIND_NAMES);
        assert_eq!(metrics.macro_recall, 0.0);
        assert_eq!(metrics.macro_precision, 0.0);
        assert_eq!(metrics.macro_f1, 0.0);
    }

    #[test]
    fn test_no_examples() {
        let metrics = score_classification(&[], &[], &EVENT_KIND_NAMES);
        assert_eq!(metrics.macro_f1, 0.0);
        assert!(metrics.per_class.iter().all(|s| s.support == 0));
    }

    #[test]
    fn test_per_class_counts() {
        let gold = vec![vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 0.0]];
        let pred = vec![vec![1.0, 1.0], vec![0.0, 1.0], vec![1.0, 0.0]];
        let metrics = score_classification(&gold, &pred, &["a", "b"]);

        let a = metrics.class("a").unwrap();
        assert!((a.precision - 0.5).abs() < 1e-12);
        assert!((a.recall - 0.5).abs() < 1e-12);
        assert_eq!(a.support, 2);

        let b = metrics.class("b").unwrap();
        assert!((b.precision - 0.5).abs() < 1e-12);
        assert!((b.recall - 1.0).abs() < 1e-12);
        assert!((metrics.macro_recall - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_merge_is_order_insensitive() {
        let gold = gold();
        let pred: Vec<Vec<f32>> = gold.iter().rev().cloned().collect();

        let whole = score_classification(&gold, &pred, &EVENT_KIND_NAMES);

        let mut a = ClassificationCounts::new(8);
        let mut b = ClassificationCounts::new(8);
        for (i, (g, p)) in gold.iter().zip(&pred).enumerate() {
            if i % 2 == 0 { a.add(g, p) } else { b.add(g, p) }
        }
        b.merge(&a);
        assert_eq!(b.finish(&EVENT_KIND_NAMES), whole);
    }

    #[test]
    fn test_unnamed_classes() {
        let metrics = ClassificationCounts::new(3).finish(&["x"]);
        assert_eq!(metrics.per_class[2].name, "class_2");
    }
}
