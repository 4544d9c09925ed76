//! # Dataset Builder
//!
//! Turns validated [`EventExample`]s into fixed-shape model inputs for one of
//! the two text tasks. Both tasks share tokenization; they differ only in the
//! label payload.
//!
//! These are the library-level inputs for fine-tuning the text models, which
//! happens outside this workspace. `validate-dataset events --tokenizer`
//! reports per-tag statistics through [`build_dataset`] and
//! [`ner_class_weights`].

use candle_core::{Device, Tensor};
use tracing::{debug, info};

use crate::align::align_and_pad;
use crate::encoder::TextEncoder;
use crate::error::Result;
use crate::record::EventExample;
use crate::vocab::{EventKind, IGNORE_INDEX};

/// Maximum weight any tag can receive from [`ner_class_weights`].
pub const MAX_CLASS_WEIGHT: f32 = 10.0;

/// Which text model a dataset feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Multi-label event kind classification, one label vector per text.
    Classification,
    /// BIO entity tagging, one label id per token.
    Tagging,
}

impl Task {
    pub fn name(self) -> &'static str {
        match self {
            Task::Classification => "classification",
            Task::Tagging => "tagging",
        }
    }
}

/// Label payload of a [`TaskDataset`].
#[derive(Debug, Clone, PartialEq)]
pub enum TaskLabels {
    /// `[N][num_event_kinds]` multi-hot floats.
    MultiHot(Vec<Vec<f32>>),
    /// `[N][max_len]` BIO ids, padding and special tokens set to [`IGNORE_INDEX`].
    Bio(Vec<Vec<i64>>),
}

impl TaskLabels {
    pub fn len(&self) -> usize {
        match self {
            TaskLabels::MultiHot(rows) => rows.len(),
            TaskLabels::Bio(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tokenized texts plus labels, all rows the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDataset {
    pub task: Task,
    pub max_length: usize,
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub labels: TaskLabels,
}

impl TaskDataset {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Build `(input_ids [N, L] u32, attention_mask [N, L] u32, labels)`.
    ///
    /// Labels are `[N, num_event_kinds]` f32 or `[N, L]` i64.
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
        let n = self.len();
        let len = self.max_length;

        let input_ids = Tensor::from_vec(self.input_ids.concat(), (n, len), device)?;
        let attention_mask = Tensor::from_vec(self.attention_mask.concat(), (n, len), device)?;
        let labels = match &self.labels {
            TaskLabels::MultiHot(rows) => {
                Tensor::from_vec(rows.concat(), (n, EventKind::COUNT), device)?
            }
            TaskLabels::Bio(rows) => Tensor::from_vec(rows.concat(), (n, len), device)?,
        };

        Ok((input_ids, attention_mask, labels))
    }
}

/// Tokenize every example and attach task labels.
pub fn build_dataset<E: TextEncoder + ?Sized>(
    examples: &[EventExample],
    task: Task,
    encoder: &E,
) -> Result<TaskDataset> {
    let max_length = encoder.max_length();
    let texts: Vec<&str> = examples.iter().map(|ex| ex.text.as_str()).collect();
    let encodings = encoder.encode_batch(&texts)?;

    let mut input_ids = Vec::with_capacity(examples.len());
    let mut attention_mask = Vec::with_capacity(examples.len());
    let mut multi_hot = Vec::new();
    let mut bio = Vec::new();

    for (example, mut encoding) in examples.iter().zip(encodings) {
        match task {
            Task::Classification => multi_hot.push(example.multi_hot()),
            Task::Tagging => bio.push(align_and_pad(
                &example.entities,
                &encoding.offsets,
                max_length,
            )),
        }
        encoding.input_ids.resize(max_length, 0);
        encoding.attention_mask.resize(max_length, 0);
        input_ids.push(encoding.input_ids);
        attention_mask.push(encoding.attention_mask);
    }

    let labels = match task {
        Task::Classification => TaskLabels::MultiHot(multi_hot),
        Task::Tagging => TaskLabels::Bio(bio),
    };

    info!(
        task = task.name(),
        examples = input_ids.len(),
        max_length,
        "built dataset"
    );

    Ok(TaskDataset {
        task,
        max_length,
        input_ids,
        attention_mask,
        labels,
    })
}

/// Multi-hot matrix for a set of examples.
pub fn multi_hot(examples: &[EventExample]) -> Vec<Vec<f32>> {
    examples.iter().map(EventExample::multi_hot).collect()
}

/// Inverse-frequency weights for the tagging loss.
///
/// Ignore ids are skipped, unseen tags count as 1, and each weight
/// `total / (num_tags * count)` is capped at [`MAX_CLASS_WEIGHT`].
pub fn ner_class_weights(labels: &[Vec<i64>], num_tags: usize) -> Vec<f32> {
    let mut counts = vec![0u64; num_tags];
    for id in labels.iter().flatten() {
        if *id == IGNORE_INDEX {
            continue;
        }
        if let Some(count) = usize::try_from(*id).ok().and_then(|i| counts.get_mut(i)) {
            *count += 1;
        }
    }

    let counts: Vec<u64> = counts.into_iter().map(|c| c.max(1)).collect();
    let total: u64 = counts.iter().sum();
    let weights: Vec<f32> = counts
        .iter()
        .map(|count| {
            let weight = total as f64 / (num_tags as f64 * *count as f64);
            (weight as f32).min(MAX_CLASS_WEIGHT)
        })
        .collect();

    debug!(?weights, "computed tagging class weights");
    weights
}
