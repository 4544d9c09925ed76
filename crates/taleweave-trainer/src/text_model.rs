//! DistilBERT text classifiers loaded from exported safetensors.
//!
//! A model directory holds `config.json` (the transformer config plus the
//! `id2label` map) and `model.safetensors`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, linear};
use candle_transformers::models::distilbert::{Config as DistilBertConfig, DistilBertModel};
use serde::Deserialize;
use tracing::info;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// A model producing raw logits from token ids and a `0`/`1` attention mask,
/// both `(batch, seq)` `u32` tensors.
///
/// Sequence models return `(batch, num_labels)`, token models
/// `(batch, seq, num_labels)`.
pub trait LogitsModel {
    fn num_labels(&self) -> usize;

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor>;
}

/// Fields of `config.json` the classifier heads need beyond the transformer config.
#[derive(Debug, Clone, Deserialize)]
struct HeadConfig {
    dim: usize,
    #[serde(default)]
    id2label: BTreeMap<usize, String>,
}

#[derive(Debug, Clone)]
pub struct TextModelConfig {
    pub distilbert: DistilBertConfig,
    pub dim: usize,
    pub id2label: BTreeMap<usize, String>,
}

impl TextModelConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let distilbert: DistilBertConfig =
            serde_json::from_str(json).context("Failed to parse DistilBERT config")?;
        let head: HeadConfig =
            serde_json::from_str(json).context("Failed to parse classifier config")?;
        Ok(Self {
            distilbert,
            dim: head.dim,
            id2label: head.id2label,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn num_labels(&self) -> usize {
        self.id2label.len()
    }
}

fn load_dir(dir: &Path, device: &Device) -> Result<(TextModelConfig, VarBuilder<'static>)> {
    let config = TextModelConfig::from_file(dir.join(CONFIG_FILE))?;
    let weights = dir.join(WEIGHTS_FILE);
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&weights], DType::F32, device) }
        .with_context(|| format!("Failed to map weights: {}", weights.display()))?;
    Ok((config, vb))
}

/// Padding positions are `0` in the attention mask; the encoder expects a
/// `(batch, 1, 1, seq)` mask that is `1` where attention is blocked, so it
/// broadcasts over heads and query positions.
fn blocked_positions(attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    attention_mask.eq(0u32)?.unsqueeze(1)?.unsqueeze(1)
}

/// Multi-label event classifier: `pre_classifier → ReLU → classifier` over
/// the first token's hidden state.
pub struct DistilBertSequenceClassifier {
    distilbert: DistilBertModel,
    pre_classifier: Linear,
    classifier: Linear,
    num_labels: usize,
}

impl DistilBertSequenceClassifier {
    pub fn new(vb: VarBuilder, config: &TextModelConfig) -> candle_core::Result<Self> {
        let num_labels = config.num_labels();
        Ok(Self {
            distilbert: DistilBertModel::load(vb.pp("distilbert"), &config.distilbert)?,
            pre_classifier: linear(config.dim, config.dim, vb.pp("pre_classifier"))?,
            classifier: linear(config.dim, num_labels, vb.pp("classifier"))?,
            num_labels,
        })
    }

    /// Load from a model directory. Returns the config for label checks.
    pub fn load(dir: &Path, device: &Device) -> Result<(Self, TextModelConfig)> {
        let (config, vb) = load_dir(dir, device)?;
        let model = Self::new(vb, &config)
            .with_context(|| format!("Failed to load sequence classifier from {}", dir.display()))?;
        info!(dir = %dir.display(), labels = model.num_labels, "Loaded sequence classifier");
        Ok((model, config))
    }
}

impl LogitsModel for DistilBertSequenceClassifier {
    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self
            .distilbert
            .forward(input_ids, &blocked_positions(attention_mask)?)?;
        let pooled = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pre_classifier.forward(&pooled)?.relu()?;
        self.classifier.forward(&pooled)
    }
}

/// BIO tagger: `classifier` over every token's hidden state.
pub struct DistilBertTokenClassifier {
    distilbert: DistilBertModel,
    classifier: Linear,
    num_labels: usize,
}

impl DistilBertTokenClassifier {
    pub fn new(vb: VarBuilder, config: &TextModelConfig) -> candle_core::Result<Self> {
        let num_labels = config.num_labels();
        Ok(Self {
            distilbert: DistilBertModel::load(vb.pp("distilbert"), &config.distilbert)?,
            classifier: linear(config.dim, num_labels, vb.pp("classifier"))?,
            num_labels,
        })
    }

    pub fn load(dir: &Path, device: &Device) -> Result<(Self, TextModelConfig)> {
        let (config, vb) = load_dir(dir, device)?;
        let model = Self::new(vb, &config)
            .with_context(|| format!("Failed to load token classifier from {}", dir.display()))?;
        info!(dir = %dir.display(), labels = model.num_labels, "Loaded token classifier");
        Ok((model, config))
    }
}

impl LogitsModel for DistilBertTokenClassifier {
    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
        let hidden = self
            .distilbert
            .forward(input_ids, &blocked_positions(attention_mask)?)?;
        self.classifier.forward(&hidden)
    }
}
