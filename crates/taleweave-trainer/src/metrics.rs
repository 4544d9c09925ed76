//! Per-head behavior metrics accumulated across batches.

use std::collections::BTreeMap;

use candle_core::{Result, Tensor};

use taleweave_core::feature_schema::{
    ACTION_CONFIDENCE_IDX, ACTION_CONTEXT_RANGE, ACTION_TYPE_RANGE, ACTION_VALENCE_IDX,
    AWARENESS_LEVEL_RANGE, AWARENESS_SHIFT_RANGE, DOMINANT_EMOTION_IDX, INTENSITY_DELTA_RANGE,
    NUM_PRIMARIES, SPEECH_CONFIDENCE_IDX, SPEECH_OCCURS_IDX, SPEECH_REGISTER_RANGE,
};
use taleweave_core::metrics::argmax;

use crate::model::HeadOutputs;

/// Row-level sums; `compute` divides by the number of rows seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorMetrics {
    rows: usize,
    action_type_hits: usize,
    action_context_hits: usize,
    action_confidence_se: f64,
    action_valence_se: f64,
    speech_occurs_hits: usize,
    speech_register_hits: usize,
    speech_confidence_se: f64,
    thought_awareness_hits: usize,
    thought_emotion_ae: f64,
    emotion_delta_se: f64,
    emotion_shift_hits: usize,
}

impl BehaviorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Accumulate one batch of model outputs against its `(batch, 42)` labels.
    pub fn update(&mut self, outputs: &HeadOutputs, labels: &Tensor) -> Result<()> {
        let action = outputs.action.to_vec2::<f32>()?;
        let speech = outputs.speech.to_vec2::<f32>()?;
        let thought = outputs.thought.to_vec2::<f32>()?;
        let emotion = outputs.emotion.to_vec2::<f32>()?;
        let labels = labels.to_vec2::<f32>()?;

        for (i, label) in labels.iter().enumerate() {
            self.update_row(&action[i], &speech[i], &thought[i], &emotion[i], label);
        }
        Ok(())
    }

    /// Accumulate a single example given each head's logits.
    pub fn update_row(
        &mut self,
        action: &[f32],
        speech: &[f32],
        thought: &[f32],
        emotion: &[f32],
        labels: &[f32],
    ) {
        self.rows += 1;

        self.action_type_hits +=
            usize::from(argmax(&action[0..6]) == argmax(&labels[ACTION_TYPE_RANGE]));
        self.action_context_hits += usize::from(
            argmax(&action[9..14]) == argmax(&labels[ACTION_CONTEXT_RANGE]),
        );
        self.action_confidence_se += squared(action[6], labels[ACTION_CONFIDENCE_IDX]);
        self.action_valence_se += squared(action[8], labels[ACTION_VALENCE_IDX]);

        self.speech_occurs_hits +=
            usize::from((speech[0] > 0.0) == (labels[SPEECH_OCCURS_IDX] > 0.5));
        self.speech_register_hits += usize::from(
            argmax(&speech[1..5]) == argmax(&labels[SPEECH_REGISTER_RANGE]),
        );
        self.speech_confidence_se += squared(speech[5], labels[SPEECH_CONFIDENCE_IDX]);

        self.thought_awareness_hits += usize::from(
            argmax(&thought[0..5]) == argmax(&labels[AWARENESS_LEVEL_RANGE]),
        );
        self.thought_emotion_ae += f64::from((thought[5] - labels[DOMINANT_EMOTION_IDX]).abs());

        for (pred, gold) in emotion[0..8].iter().zip(&labels[INTENSITY_DELTA_RANGE]) {
            self.emotion_delta_se += squared(*pred, *gold);
        }
        for (pred, gold) in emotion[8..16].iter().zip(&labels[AWARENESS_SHIFT_RANGE]) {
            self.emotion_shift_hits += usize::from((*pred > 0.0) == (*gold > 0.5));
        }
    }

    /// Named metric values; empty when nothing was accumulated.
    pub fn compute(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        if self.rows == 0 {
            return metrics;
        }

        let n = self.rows as f64;
        let per_primary = n * NUM_PRIMARIES as f64;
        let mut put = |name: &str, value: f64| {
            metrics.insert(name.to_string(), value);
        };

        put("action_type_acc", self.action_type_hits as f64 / n);
        put("action_context_acc", self.action_context_hits as f64 / n);
        put("action_confidence_mse", self.action_confidence_se / n);
        put("action_valence_mse", self.action_valence_se / n);
        put("speech_occurs_acc", self.speech_occurs_hits as f64 / n);
        put("speech_register_acc", self.speech_register_hits as f64 / n);
        put("speech_confidence_mse", self.speech_confidence_se / n);
        put(
            "thought_awareness_acc",
            self.thought_awareness_hits as f64 / n,
        );
        put("thought_emotion_mae", self.thought_emotion_ae / n);
        put("emotion_delta_mse", self.emotion_delta_se / per_primary);
        put(
            "emotion_shift_acc",
            self.emotion_shift_hits as f64 / per_primary,
        );
        metrics
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn squared(pred: f32, gold: f32) -> f64 {
    let diff = f64::from(pred - gold);
    diff * diff
}
