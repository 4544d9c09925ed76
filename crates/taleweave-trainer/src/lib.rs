//! # Taleweave Trainer
//!
//! Training, export and evaluation workflows on top of `taleweave-core`:
//!
//! - the multi-head behavior predictor (model, loss, metrics, training loop
//!   and safetensors export with parity validation)
//! - DistilBERT event classifiers and entity taggers, evaluated against
//!   labeled event data

pub mod evaluation;
pub mod export;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod report;
pub mod text_model;
pub mod trainer;

pub use evaluation::{EvalConfig, evaluate, evaluate_classification, evaluate_tagging};
pub use export::{ExportMetadata, export_checkpoint, load_model, save_model, validate_parity};
pub use loss::{LossBreakdown, LossWeights, MultiHeadLoss};
pub use metrics::BehaviorMetrics;
pub use model::{BehaviorModelConfig, BehaviorPredictor, HeadOutputs};
pub use report::{EvaluationReport, format_report};
pub use text_model::{
    DistilBertSequenceClassifier, DistilBertTokenClassifier, LogitsModel, TextModelConfig,
};
pub use trainer::{
    EpochSummary, SplitSummary, TrainConfig, TrainingOutcome, split_by_cell, train, train_from_file,
};
