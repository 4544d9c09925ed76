//! Multi-head MLP predicting character behavior from the 453-element
//! feature vector.
//!
//! Shared trunk `453 → 384 → 256 → 256`, then four independent heads
//! (`256 → 64 → N`). Every output is a raw logit; activations are applied
//! by the loss, the metrics and the runtime decoder.

use candle_core::{Result, Tensor};
use candle_nn::{Dropout, Linear, Module, VarBuilder, linear};
use serde::{Deserialize, Serialize};

use taleweave_core::feature_schema::{Head, TOTAL_INPUT_FEATURES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorModelConfig {
    pub input_dim: usize,
    pub trunk_dims: Vec<usize>,
    pub head_hidden: usize,
    pub dropout: f32,
}

impl Default for BehaviorModelConfig {
    fn default() -> Self {
        Self {
            input_dim: TOTAL_INPUT_FEATURES,
            trunk_dims: vec![384, 256, 256],
            head_hidden: 64,
            dropout: 0.3,
        }
    }
}

impl BehaviorModelConfig {
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout.clamp(0.0, 0.95);
        self
    }

    pub fn with_trunk_dims(mut self, dims: Vec<usize>) -> Self {
        if !dims.is_empty() {
            self.trunk_dims = dims;
        }
        self
    }

    pub fn with_head_hidden(mut self, hidden: usize) -> Self {
        self.head_hidden = hidden.max(1);
        self
    }

    fn trunk_out(&self) -> usize {
        self.trunk_dims.last().copied().unwrap_or(self.input_dim)
    }
}

/// Raw logits of every head for one batch.
#[derive(Debug, Clone)]
pub struct HeadOutputs {
    pub action: Tensor,
    pub speech: Tensor,
    pub thought: Tensor,
    pub emotion: Tensor,
}

impl HeadOutputs {
    pub fn get(&self, head: Head) -> &Tensor {
        match head {
            Head::Action => &self.action,
            Head::Speech => &self.speech,
            Head::Thought => &self.thought,
            Head::Emotion => &self.emotion,
        }
    }
}

/// `Linear → ReLU → Linear`.
struct PredictionHead {
    hidden: Linear,
    output: Linear,
}

impl PredictionHead {
    fn new(vb: VarBuilder, in_dim: usize, hidden: usize, out_dim: usize) -> Result<Self> {
        Ok(Self {
            hidden: linear(in_dim, hidden, vb.pp("0"))?,
            output: linear(hidden, out_dim, vb.pp("2"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.output.forward(&self.hidden.forward(xs)?.relu()?)
    }
}

pub struct BehaviorPredictor {
    trunk: Vec<Linear>,
    dropout: Dropout,
    action: PredictionHead,
    speech: PredictionHead,
    thought: PredictionHead,
    emotion: PredictionHead,
    config: BehaviorModelConfig,
}

impl BehaviorPredictor {
    /// Build (or load) the network from a var builder.
    ///
    /// Parameter names follow sequential-container numbering: the i-th trunk
    /// linear is `trunk.{3i}`, head layers are `{head}_head.0` and
    /// `{head}_head.2`.
    pub fn new(vb: VarBuilder, config: &BehaviorModelConfig) -> Result<Self> {
        let mut trunk = Vec::with_capacity(config.trunk_dims.len());
        let mut prev = config.input_dim;
        for (i, &dim) in config.trunk_dims.iter().enumerate() {
            trunk.push(linear(prev, dim, vb.pp("trunk").pp(3 * i))?);
            prev = dim;
        }

        let trunk_out = config.trunk_out();
        let hidden = config.head_hidden;
        let head = |h: Head| {
            PredictionHead::new(
                vb.pp(format!("{}_head", h.name())),
                trunk_out,
                hidden,
                h.size(),
            )
        };

        Ok(Self {
            trunk,
            dropout: Dropout::new(config.dropout),
            action: head(Head::Action)?,
            speech: head(Head::Speech)?,
            thought: head(Head::Thought)?,
            emotion: head(Head::Emotion)?,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &BehaviorModelConfig {
        &self.config
    }

    /// Forward pass; dropout is active only when `train` is set.
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<HeadOutputs> {
        let last = self.trunk.len().saturating_sub(1);
        let mut shared = xs.clone();
        for (i, layer) in self.trunk.iter().enumerate() {
            shared = layer.forward(&shared)?.relu()?;
            if i < last {
                shared = self.dropout.forward(&shared, train)?;
            }
        }

        Ok(HeadOutputs {
            action: self.action.forward(&shared)?,
            speech: self.speech.forward(&shared)?,
            thought: self.thought.forward(&shared)?,
            emotion: self.emotion.forward(&shared)?,
        })
    }

    /// Inference forward pass.
    pub fn forward(&self, xs: &Tensor) -> Result<HeadOutputs> {
        self.forward_t(xs, false)
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    use super::*;
    use taleweave_core::feature_schema::TOTAL_OUTPUT_FEATURES;

    fn build(config: &BehaviorModelConfig) -> (VarMap, BehaviorPredictor) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = BehaviorPredictor::new(vb, config).unwrap();
        (varmap, model)
    }

    #[test]
    fn test_output_shapes() {
        let (_, model) = build(&BehaviorModelConfig::default());
        let xs = Tensor::zeros((5, TOTAL_INPUT_FEATURES), DType::F32, &Device::Cpu).unwrap();
        let out = model.forward(&xs).unwrap();

        let mut total = 0;
        for head in Head::ALL {
            assert_eq!(out.get(head).dims(), &[5, head.size()]);
            total += head.size();
        }
        assert_eq!(total, TOTAL_OUTPUT_FEATURES);
    }

    #[test]
    fn test_parameter_names() {
        let (varmap, _) = build(&BehaviorModelConfig::default());
        let data = varmap.data().lock().unwrap();
        for name in [
            "trunk.0.weight",
            "trunk.3.weight",
            "trunk.6.bias",
            "action_head.0.weight",
            "emotion_head.2.bias",
        ] {
            assert!(data.contains_key(name), "missing {name}");
        }
        // 3 trunk layers + 4 heads x 2 layers, weight and bias each
        assert_eq!(data.len(), 2 * (3 + 8));
    }

    #[test]
    fn test_eval_forward_is_deterministic() {
        let (_, model) = build(&BehaviorModelConfig::default());
        let xs = Tensor::randn(0f32, 1f32, (3, TOTAL_INPUT_FEATURES), &Device::Cpu).unwrap();
        let a = model.forward(&xs).unwrap();
        let b = model.forward(&xs).unwrap();
        let diff = (&a.action - &b.action)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_eq!(diff, 0.0);
    }

    #[test]
    fn test_config_setters_clamp() {
        let config = BehaviorModelConfig::default()
            .with_dropout(2.0)
            .with_head_hidden(0)
            .with_trunk_dims(vec![]);
        assert_eq!(config.dropout, 0.95);
        assert_eq!(config.head_hidden, 1);
        assert_eq!(config.trunk_dims, vec![384, 256, 256]);
    }
}
