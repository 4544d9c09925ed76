//! Behavior Predictor Training Tool
//!
//! Trains the multi-head behavior predictor on a JSONL export of
//! `{features, labels, cell}` records, then exports and validates the best
//! checkpoint.

use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::Device;
use clap::Parser;
use tracing::info;

use taleweave_core::{BehaviorExample, load_jsonl};
use taleweave_trainer::export::export_checkpoint;
use taleweave_trainer::{LossWeights, TrainConfig, split_by_cell, train};

/// File name of the exported model inside the output directory.
const EXPORTED_MODEL: &str = "model.safetensors";

/// CLI arguments
#[derive(Parser)]
#[command(name = "train-behavior")]
#[command(about = "Train the multi-head character behavior predictor")]
#[command(version)]
struct Cli {
    /// JSONL training data
    #[arg(required_unless_present = "export_only")]
    data_path: Option<PathBuf>,

    /// Output directory for checkpoints and the exported model
    #[arg(
        short,
        long,
        env = "TALEWEAVE_OUTPUT_DIR",
        default_value = "checkpoints"
    )]
    output_dir: PathBuf,

    #[arg(long, default_value_t = 100)]
    epochs: usize,

    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Initial learning rate
    #[arg(long, default_value_t = 1e-3)]
    lr: f64,

    /// Epochs without improvement before stopping
    #[arg(long, default_value_t = 10)]
    patience: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 0.3)]
    dropout: f32,

    /// Share of cells held out for validation
    #[arg(long, default_value_t = 0.2)]
    val_fraction: f64,

    #[arg(long, default_value_t = 0.35)]
    action_weight: f64,

    #[arg(long, default_value_t = 0.20)]
    speech_weight: f64,

    #[arg(long, default_value_t = 0.20)]
    thought_weight: f64,

    #[arg(long, default_value_t = 0.25)]
    emotion_weight: f64,

    /// Load and split the data, then exit without training
    #[arg(long)]
    validate_only: bool,

    /// Skip training and export an existing checkpoint
    #[arg(long, value_name = "CHECKPOINT")]
    export_only: Option<PathBuf>,
}

impl Cli {
    fn train_config(&self) -> TrainConfig {
        TrainConfig::default()
            .with_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_learning_rate(self.lr)
            .with_patience(self.patience)
            .with_seed(self.seed)
            .with_dropout(self.dropout)
            .with_val_fraction(self.val_fraction)
            .with_loss_weights(
                LossWeights::default()
                    .with_action(self.action_weight)
                    .with_speech(self.speech_weight)
                    .with_thought(self.thought_weight)
                    .with_emotion(self.emotion_weight),
            )
            .with_output_dir(&self.output_dir)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let device = Device::Cpu;
    let exported = cli.output_dir.join(EXPORTED_MODEL);

    if let Some(checkpoint) = &cli.export_only {
        let metadata = export_checkpoint(checkpoint, &exported, &device)
            .with_context(|| format!("Failed to export {}", checkpoint.display()))?;
        println!(
            "Exported {} -> {}",
            checkpoint.display(),
            exported.display()
        );
        if let (Some(epoch), Some(val_loss)) = (metadata.epoch, metadata.val_loss) {
            println!("  Epoch: {epoch}, val loss: {val_loss:.4}");
        }
        return Ok(());
    }

    let data_path = cli
        .data_path
        .as_deref()
        .context("a data path is required unless --export-only is given")?;
    let examples: Vec<BehaviorExample> = load_jsonl(data_path)
        .with_context(|| format!("Failed to load {}", data_path.display()))?;
    info!(examples = examples.len(), "Loaded training data");

    let config = cli.train_config();

    if cli.validate_only {
        let (_, summary) = split_by_cell(&examples, config.val_fraction, config.seed)?;
        println!("Data validation passed.");
        println!(
            "  Examples: {} across {} cells",
            summary.examples, summary.cells
        );
        println!(
            "  Train: {} examples ({} cells)",
            summary.train_examples, summary.train_cells
        );
        println!(
            "  Val:   {} examples ({} cells)",
            summary.val_examples, summary.val_cells
        );
        return Ok(());
    }

    let outcome = train(&config, &examples, &device)?;
    export_checkpoint(&outcome.best_checkpoint, &exported, &device)
        .context("Failed to export the best checkpoint")?;

    println!(
        "Best validation loss: {:.4} (epoch {})",
        outcome.best_val_loss, outcome.best_epoch
    );
    println!("Epochs run: {}", outcome.epochs_run);
    println!("Best checkpoint: {}", outcome.best_checkpoint.display());
    println!("Exported model: {}", exported.display());
    Ok(())
}
