//! Weighted multi-head loss.
//!
//! Each head's output regions get the loss that matches their encoding:
//! cross-entropy for one-hot categoricals, MSE for continuous scalars and
//! BCE-with-logits for binary flags.

use std::ops::Range;

use candle_core::{Result, Tensor};
use candle_nn::loss::{binary_cross_entropy_with_logit, cross_entropy, mse};
use serde::{Deserialize, Serialize};

use taleweave_core::feature_schema::{
    ACTION_CONFIDENCE_IDX, ACTION_CONTEXT_RANGE, ACTION_TARGET_IDX, ACTION_TYPE_RANGE,
    ACTION_VALENCE_IDX, AWARENESS_LEVEL_RANGE, AWARENESS_SHIFT_RANGE, DOMINANT_EMOTION_IDX, Head,
    INTENSITY_DELTA_RANGE, SPEECH_CONFIDENCE_IDX, SPEECH_OCCURS_IDX, SPEECH_REGISTER_RANGE,
};

use crate::model::HeadOutputs;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    pub action: f64,
    pub speech: f64,
    pub thought: f64,
    pub emotion: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            action: 0.35,
            speech: 0.20,
            thought: 0.20,
            emotion: 0.25,
        }
    }
}

impl LossWeights {
    pub fn with_action(mut self, weight: f64) -> Self {
        self.action = weight.max(0.0);
        self
    }

    pub fn with_speech(mut self, weight: f64) -> Self {
        self.speech = weight.max(0.0);
        self
    }

    pub fn with_thought(mut self, weight: f64) -> Self {
        self.thought = weight.max(0.0);
        self
    }

    pub fn with_emotion(mut self, weight: f64) -> Self {
        self.emotion = weight.max(0.0);
        self
    }

    pub fn get(&self, head: Head) -> f64 {
        match head {
            Head::Action => self.action,
            Head::Speech => self.speech,
            Head::Thought => self.thought,
            Head::Emotion => self.emotion,
        }
    }
}

/// Weighted total plus the unweighted value of each head.
#[derive(Debug, Clone)]
pub struct LossBreakdown {
    /// Scalar tensor to back-propagate.
    pub total: Tensor,
    pub action: f32,
    pub speech: f32,
    pub thought: f32,
    pub emotion: f32,
}

impl LossBreakdown {
    pub fn total_value(&self) -> Result<f32> {
        self.total.to_scalar::<f32>()
    }

    pub fn head(&self, head: Head) -> f32 {
        match head {
            Head::Action => self.action,
            Head::Speech => self.speech,
            Head::Thought => self.thought,
            Head::Emotion => self.emotion,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiHeadLoss {
    weights: LossWeights,
}

impl MultiHeadLoss {
    pub fn new(weights: LossWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &LossWeights {
        &self.weights
    }

    /// `labels` is the full `(batch, 42)` label matrix.
    pub fn compute(&self, outputs: &HeadOutputs, labels: &Tensor) -> Result<LossBreakdown> {
        let action = &outputs.action;
        let action_loss = (categorical(action, 0..6, labels, ACTION_TYPE_RANGE)?
            + scalar(action, 6, labels, ACTION_CONFIDENCE_IDX)?)?;
        let action_loss = (action_loss + scalar(action, 7, labels, ACTION_TARGET_IDX)?)?;
        let action_loss = (action_loss + scalar(action, 8, labels, ACTION_VALENCE_IDX)?)?;
        let action_loss =
            (action_loss + categorical(action, 9..14, labels, ACTION_CONTEXT_RANGE)?)?;

        let speech = &outputs.speech;
        let occurs = SPEECH_OCCURS_IDX..SPEECH_OCCURS_IDX + 1;
        let speech_loss = (binary(speech, 0..1, labels, occurs)?
            + categorical(speech, 1..5, labels, SPEECH_REGISTER_RANGE)?)?;
        let speech_loss = (speech_loss + scalar(speech, 5, labels, SPEECH_CONFIDENCE_IDX)?)?;

        let thought = &outputs.thought;
        let thought_loss = (categorical(thought, 0..5, labels, AWARENESS_LEVEL_RANGE)?
            + scalar(thought, 5, labels, DOMINANT_EMOTION_IDX)?)?;

        let emotion = &outputs.emotion;
        let emotion_loss = (regression(emotion, 0..8, labels, INTENSITY_DELTA_RANGE)?
            + binary(emotion, 8..16, labels, AWARENESS_SHIFT_RANGE)?)?;

        let total = (action_loss.affine(self.weights.action, 0.0)?
            + speech_loss.affine(self.weights.speech, 0.0)?)?;
        let total = (total + thought_loss.affine(self.weights.thought, 0.0)?)?;
        let total = (total + emotion_loss.affine(self.weights.emotion, 0.0)?)?;

        Ok(LossBreakdown {
            total,
            action: action_loss.to_scalar::<f32>()?,
            speech: speech_loss.to_scalar::<f32>()?,
            thought: thought_loss.to_scalar::<f32>()?,
            emotion: emotion_loss.to_scalar::<f32>()?,
        })
    }
}

fn columns(xs: &Tensor, range: Range<usize>) -> Result<Tensor> {
    xs.narrow(1, range.start, range.len())
}

/// Cross-entropy against the argmax of a one-hot label region.
fn categorical(
    pred: &Tensor,
    pred_range: Range<usize>,
    labels: &Tensor,
    label_range: Range<usize>,
) -> Result<Tensor> {
    let targets = columns(labels, label_range)?.argmax(1)?;
    cross_entropy(&columns(pred, pred_range)?, &targets)
}

fn scalar(pred: &Tensor, pred_idx: usize, labels: &Tensor, label_idx: usize) -> Result<Tensor> {
    regression(
        pred,
        pred_idx..pred_idx + 1,
        labels,
        label_idx..label_idx + 1,
    )
}

fn regression(
    pred: &Tensor,
    pred_range: Range<usize>,
    labels: &Tensor,
    label_range: Range<usize>,
) -> Result<Tensor> {
    mse(&columns(pred, pred_range)?, &columns(labels, label_range)?)
}

fn binary(
    pred: &Tensor,
    pred_range: Range<usize>,
    labels: &Tensor,
    label_range: Range<usize>,
) -> Result<Tensor> {
    binary_cross_entropy_with_logit(&columns(pred, pred_range)?, &columns(labels, label_range)?)
}
