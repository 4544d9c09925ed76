//! Training loop for the behavior predictor.
//!
//! Examples are split by generative cell so that no cell contributes to both
//! partitions. Each epoch reshuffles the training rows with a seeded RNG,
//! steps AdamW over mini-batches, then scores the validation partition.
//! The learning rate halves after a plateau; training stops early after
//! `patience` epochs without improvement.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use oorandom::Rand64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taleweave_core::feature_schema::{TOTAL_INPUT_FEATURES, TOTAL_OUTPUT_FEATURES};
use taleweave_core::record::behavior::flatten;
use taleweave_core::split::shuffle;
use taleweave_core::{BehaviorExample, Split, SplitStrategy, load_jsonl, split};

use crate::export::{ExportMetadata, save_model};
use crate::loss::{LossWeights, MultiHeadLoss};
use crate::metrics::BehaviorMetrics;
use crate::model::{BehaviorModelConfig, BehaviorPredictor};

/// File name of the best checkpoint inside the output directory.
pub const BEST_CHECKPOINT: &str = "best_model.safetensors";

/// Epochs without improvement before the learning rate is reduced.
const LR_PATIENCE: usize = 5;
const LR_FACTOR: f64 = 0.5;
/// Relative improvement the scheduler requires.
const LR_THRESHOLD: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub patience: usize,
    pub min_delta: f64,
    pub val_fraction: f64,
    pub seed: u64,
    pub dropout: f32,
    pub loss_weights: LossWeights,
    pub output_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 256,
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            patience: 10,
            min_delta: 1e-4,
            val_fraction: 0.2,
            seed: 42,
            dropout: 0.3,
            loss_weights: LossWeights::default(),
            output_dir: PathBuf::from("checkpoints"),
        }
    }
}

impl TrainConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay.max(0.0);
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience.max(1);
        self
    }

    pub fn with_min_delta(mut self, min_delta: f64) -> Self {
        self.min_delta = min_delta.max(0.0);
        self
    }

    pub fn with_val_fraction(mut self, val_fraction: f64) -> Self {
        self.val_fraction = val_fraction.clamp(0.01, 0.99);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout.clamp(0.0, 0.95);
        self
    }

    pub fn with_loss_weights(mut self, loss_weights: LossWeights) -> Self {
        self.loss_weights = loss_weights;
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, output_dir: P) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn model_config(&self) -> BehaviorModelConfig {
        BehaviorModelConfig::default().with_dropout(self.dropout)
    }

    pub fn best_checkpoint(&self) -> PathBuf {
        self.output_dir.join(BEST_CHECKPOINT)
    }
}

/// Counts describing a grouped train/validation split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub examples: usize,
    pub cells: usize,
    pub train_examples: usize,
    pub val_examples: usize,
    pub train_cells: usize,
    pub val_cells: usize,
}

impl SplitSummary {
    fn new(examples: &[BehaviorExample], split: &Split) -> Self {
        let cells = |indices: &[usize]| -> BTreeSet<String> {
            indices.iter().map(|&i| examples[i].cell_key()).collect()
        };
        let train_cells = cells(&split.train);
        let val_cells = cells(&split.val);
        Self {
            examples: examples.len(),
            cells: train_cells.union(&val_cells).count(),
            train_examples: split.train.len(),
            val_examples: split.val.len(),
            train_cells: train_cells.len(),
            val_cells: val_cells.len(),
        }
    }
}

/// Split behavior examples by cell without training.
pub fn split_by_cell(
    examples: &[BehaviorExample],
    val_fraction: f64,
    seed: u64,
) -> Result<(Split, SplitSummary)> {
    let split = split(
        examples,
        val_fraction,
        seed,
        SplitStrategy::Grouped,
        BehaviorExample::cell_key,
    )?;
    let summary = SplitSummary::new(examples, &split);
    Ok((split, summary))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub learning_rate: f64,
    pub metrics: BTreeMap<String, f64>,
    pub improved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub best_checkpoint: PathBuf,
    pub best_val_loss: f64,
    pub best_epoch: usize,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub split: SplitSummary,
    pub history: Vec<EpochSummary>,
}

/// Reduce-on-plateau schedule in `min` mode with a relative threshold.
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    best: f64,
    bad_epochs: usize,
    patience: usize,
    factor: f64,
    threshold: f64,
}

impl Default for PlateauScheduler {
    fn default() -> Self {
        Self::new(LR_PATIENCE, LR_FACTOR, LR_THRESHOLD)
    }
}

impl PlateauScheduler {
    pub fn new(patience: usize, factor: f64, threshold: f64) -> Self {
        Self {
            best: f64::INFINITY,
            bad_epochs: 0,
            patience,
            factor,
            threshold,
        }
    }

    /// Record an epoch's metric. Returns the reduced learning rate when the
    /// plateau has lasted longer than `patience` epochs.
    pub fn step(&mut self, metric: f64, learning_rate: f64) -> Option<f64> {
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.bad_epochs = 0;
            return None;
        }
        self.bad_epochs += 1;
        if self.bad_epochs > self.patience {
            self.bad_epochs = 0;
            Some(learning_rate * self.factor)
        } else {
            None
        }
    }
}

/// Row-major feature and label matrices on `device`.
struct BehaviorTensors {
    features: Tensor,
    labels: Tensor,
    rows: usize,
}

impl BehaviorTensors {
    fn new(examples: &[BehaviorExample], device: &Device) -> Result<Self> {
        let rows = examples.len();
        let (features, labels) = flatten(examples);
        Ok(Self {
            features: Tensor::from_vec(features, (rows, TOTAL_INPUT_FEATURES), device)?,
            labels: Tensor::from_vec(labels, (rows, TOTAL_OUTPUT_FEATURES), device)?,
            rows,
        })
    }

    fn batch(&self, indices: &[u32], device: &Device) -> Result<(Tensor, Tensor)> {
        let index = Tensor::from_slice(indices, indices.len(), device)?;
        Ok((
            self.features.index_select(&index, 0)?,
            self.labels.index_select(&index, 0)?,
        ))
    }
}

/// Train on `examples`, writing the best checkpoint under `config.output_dir`.
pub fn train(
    config: &TrainConfig,
    examples: &[BehaviorExample],
    device: &Device,
) -> Result<TrainingOutcome> {
    ensure!(!examples.is_empty(), "no training examples");

    let (split, summary) = split_by_cell(examples, config.val_fraction, config.seed)?;
    info!(
        train = summary.train_examples,
        val = summary.val_examples,
        train_cells = summary.train_cells,
        val_cells = summary.val_cells,
        "Split by cell"
    );
    if split.train.is_empty() || split.val.is_empty() {
        bail!(
            "split left an empty partition ({} train, {} val); need more cells",
            split.train.len(),
            split.val.len()
        );
    }

    let (train_examples, val_examples) = split.select(examples);
    let train_data = BehaviorTensors::new(&train_examples, device)?;
    let val_data = BehaviorTensors::new(&val_examples, device)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model_config = config.model_config();
    let model = BehaviorPredictor::new(vb, &model_config)?;
    let parameters: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
    info!(parameters, device = ?device, "Built model");

    let loss_fn = MultiHeadLoss::new(config.loss_weights);
    let mut optimizer = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        },
    )?;
    let mut scheduler = PlateauScheduler::default();

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;
    let best_path = config.best_checkpoint();

    let mut rng = Rand64::new(u128::from(config.seed));
    let mut order: Vec<u32> = (0..train_data.rows as u32).collect();
    let val_order: Vec<u32> = (0..val_data.rows as u32).collect();
    let mut metrics = BehaviorMetrics::new();

    let mut history = Vec::new();
    let mut best: Option<(usize, f64)> = None;
    let mut epochs_without_improvement = 0;
    let mut stopped_early = false;

    for epoch in 1..=config.epochs {
        shuffle(&mut order, &mut rng);
        let mut train_loss_sum = 0.0;
        let mut train_batches = 0;
        for chunk in order.chunks(config.batch_size) {
            let (xs, ys) = train_data.batch(chunk, device)?;
            let outputs = model.forward_t(&xs, true)?;
            let losses = loss_fn.compute(&outputs, &ys)?;
            optimizer.backward_step(&losses.total)?;
            train_loss_sum += f64::from(losses.total_value()?);
            train_batches += 1;
        }
        let train_loss = train_loss_sum / train_batches as f64;

        metrics.reset();
        let mut val_loss_sum = 0.0;
        let mut val_batches = 0;
        for chunk in val_order.chunks(config.batch_size) {
            let (xs, ys) = val_data.batch(chunk, device)?;
            let outputs = model.forward(&xs)?;
            let losses = loss_fn.compute(&outputs, &ys)?;
            val_loss_sum += f64::from(losses.total_value()?);
            val_batches += 1;
            metrics.update(&outputs, &ys)?;
        }
        let val_loss = val_loss_sum / val_batches as f64;
        let values = metrics.compute();

        if let Some(lr) = scheduler.step(val_loss, optimizer.learning_rate()) {
            optimizer.set_learning_rate(lr);
            debug!(epoch, lr, "Reduced learning rate");
        }

        let value = |key: &str| values.get(key).copied().unwrap_or(0.0);
        info!(
            epoch,
            epochs = config.epochs,
            train_loss = %format!("{train_loss:.4}"),
            val_loss = %format!("{val_loss:.4}"),
            lr = %format!("{:.2e}", optimizer.learning_rate()),
            action_type_acc = %format!("{:.3}", value("action_type_acc")),
            speech_occurs_acc = %format!("{:.3}", value("speech_occurs_acc")),
            awareness_acc = %format!("{:.3}", value("thought_awareness_acc")),
            emotion_delta_mse = %format!("{:.4}", value("emotion_delta_mse")),
            "Epoch complete"
        );

        let best_val_loss = best.map_or(f64::INFINITY, |(_, loss)| loss);
        let improved = val_loss < best_val_loss - config.min_delta;
        history.push(EpochSummary {
            epoch,
            train_loss,
            val_loss,
            learning_rate: optimizer.learning_rate(),
            metrics: values,
            improved,
        });

        if improved {
            best = Some((epoch, val_loss));
            epochs_without_improvement = 0;
            let metadata = ExportMetadata::new(&model_config).with_checkpoint(epoch, val_loss);
            save_model(&varmap, &best_path, &metadata)?;
            info!(epoch, val_loss = %format!("{val_loss:.4}"), "Saved best model");
        } else {
            epochs_without_improvement += 1;
            if epochs_without_improvement >= config.patience {
                info!(
                    patience = config.patience,
                    "Early stopping after epochs without improvement"
                );
                stopped_early = true;
                break;
            }
        }
    }

    let Some((best_epoch, best_val_loss)) = best else {
        warn!("Validation loss never became finite");
        bail!("training produced no checkpoint: validation loss was never finite");
    };
    info!(
        best_epoch,
        best_val_loss = %format!("{best_val_loss:.4}"),
        checkpoint = %best_path.display(),
        "Training finished"
    );

    Ok(TrainingOutcome {
        best_checkpoint: best_path,
        best_val_loss,
        best_epoch,
        epochs_run: history.len(),
        stopped_early,
        split: summary,
        history,
    })
}

/// Load a behavior JSONL file and train on it.
pub fn train_from_file<P: AsRef<Path>>(
    config: &TrainConfig,
    data_path: P,
    device: &Device,
) -> Result<TrainingOutcome> {
    let data_path = data_path.as_ref();
    info!(path = %data_path.display(), "Loading behavior examples");
    let examples: Vec<BehaviorExample> = load_jsonl(data_path)
        .with_context(|| format!("Failed to load {}", data_path.display()))?;
    train(config, &examples, device)
}
