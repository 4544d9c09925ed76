//! # Train/Validation Splitting
//!
//! Two strategies behind one entry point:
//!
//! - [`SplitStrategy::Stratified`]: examples are the unit of assignment and
//!   every key (the primary event kind) keeps its relative frequency in both
//!   partitions.
//! - [`SplitStrategy::Grouped`]: keys are groups (generative cells) and a group
//!   is never split across the boundary.
//!
//! Both are deterministic for a given `(examples, val_fraction, seed)`.

use std::collections::BTreeMap;

use oorandom::Rand64;
use tracing::info;

use crate::error::{Result, TaleweaveError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitStrategy {
    Stratified,
    Grouped,
}

/// Sorted, disjoint example indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Share of examples that ended up in validation.
    pub fn val_fraction(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.val.len() as f64 / self.len() as f64
        }
    }

    /// Clone the selected examples out of `examples`.
    pub fn select<T: Clone>(&self, examples: &[T]) -> (Vec<T>, Vec<T>) {
        let pick = |indices: &[usize]| indices.iter().map(|&i| examples[i].clone()).collect();
        (pick(&self.train), pick(&self.val))
    }
}

/// Partition `examples` into train and validation indices.
///
/// `val_fraction` must lie strictly between 0 and 1.
pub fn split<T, K, F>(
    examples: &[T],
    val_fraction: f64,
    seed: u64,
    strategy: SplitStrategy,
    key_fn: F,
) -> Result<Split>
where
    K: Ord,
    F: Fn(&T) -> K,
{
    if !(val_fraction > 0.0 && val_fraction < 1.0) {
        return Err(TaleweaveError::InvalidSplit(format!(
            "val_fraction must be in (0, 1), got {val_fraction}"
        )));
    }
    if examples.is_empty() {
        return Ok(Split::default());
    }

    let mut groups: BTreeMap<K, Vec<usize>> = BTreeMap::new();
    for (i, example) in examples.iter().enumerate() {
        groups.entry(key_fn(example)).or_default().push(i);
    }
    let groups: Vec<Vec<usize>> = groups.into_values().collect();

    let mut rng = Rand64::new(u128::from(seed));
    let mut result = match strategy {
        SplitStrategy::Stratified => stratified(groups, examples.len(), val_fraction, &mut rng),
        SplitStrategy::Grouped => grouped(groups, examples.len(), val_fraction, &mut rng),
    };
    result.train.sort_unstable();
    result.val.sort_unstable();

    info!(
        strategy = ?strategy,
        train = result.train.len(),
        val = result.val.len(),
        requested = val_fraction,
        realized = result.val_fraction(),
        "split dataset"
    );
    Ok(result)
}

fn stratified(
    classes: Vec<Vec<usize>>,
    total: usize,
    val_fraction: f64,
    rng: &mut Rand64,
) -> Split {
    let n_val = ((total as f64 * val_fraction).ceil() as usize).min(total);

    // Integer shares: class c gets floor(n_c * n_val / total), the leftover
    // goes to the largest remainders.
    let mut quota: Vec<usize> = Vec::with_capacity(classes.len());
    let mut remainders: Vec<(usize, usize)> = Vec::with_capacity(classes.len());
    for (c, members) in classes.iter().enumerate() {
        let numerator = members.len() * n_val;
        quota.push(numerator / total);
        remainders.push((c, numerator % total));
    }

    let allocated: usize = quota.iter().sum();
    remainders.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| classes[b.0].len().cmp(&classes[a.0].len()))
            .then_with(|| a.0.cmp(&b.0))
    });
    for &(c, _) in remainders.iter().take(n_val - allocated) {
        quota[c] += 1;
    }

    let mut result = Split::default();
    for (mut members, k) in classes.into_iter().zip(quota) {
        shuffle(&mut members, rng);
        let train = members.split_off(k.min(members.len()));
        result.val.extend(members);
        result.train.extend(train);
    }
    result
}

fn grouped(groups: Vec<Vec<usize>>, total: usize, val_fraction: f64, rng: &mut Rand64) -> Split {
    let target = (total as f64 * val_fraction).floor() as usize;

    let mut order: Vec<usize> = (0..groups.len()).collect();
    shuffle(&mut order, rng);

    let mut result = Split::default();
    for g in order {
        if result.val.len() < target {
            result.val.extend_from_slice(&groups[g]);
        } else {
            result.train.extend_from_slice(&groups[g]);
        }
    }
    result
}

/// In-place Fisher-Yates shuffle.
pub fn shuffle<T>(items: &mut [T], rng: &mut Rand64) {
    for i in (1..items.len()).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        items.swap(i, j);
    }
}
