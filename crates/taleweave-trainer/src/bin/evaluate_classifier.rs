//! Text Model Evaluation Tool
//!
//! Scores the event classifier and NER model in a model directory against
//! labeled event JSONL and prints a text report.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use taleweave_trainer::{EvalConfig, evaluate, format_report};

/// CLI arguments
#[derive(Parser)]
#[command(name = "evaluate-classifier")]
#[command(about = "Evaluate event classification and NER models against labeled data")]
#[command(version)]
struct Cli {
    /// Directory with tokenizer.json, event_classifier/ and ner_classifier/
    model_dir: PathBuf,

    /// JSONL labeled event data
    data_path: PathBuf,

    /// Evaluate every example instead of the held-out split
    #[arg(long)]
    no_split: bool,

    #[arg(long, default_value_t = 0.15)]
    val_fraction: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Sigmoid threshold for event classification
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Also write the report as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
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
    let config = EvalConfig::default()
        .with_split(!cli.no_split)
        .with_val_fraction(cli.val_fraction)
        .with_seed(cli.seed)
        .with_threshold(cli.threshold)
        .with_batch_size(cli.batch_size);

    let report = evaluate(&cli.model_dir, &cli.data_path, &config)?;
    print!("{}", format_report(&report));

    if let Some(path) = &cli.output {
        report.write_json(path)?;
        info!(path = %path.display(), "Wrote JSON report");
    }
    Ok(())
}
