//! Dataset Validation Tool
//!
//! Loads a JSONL file under one of the two training schemas, reporting the
//! first schema violation with its line number, then prints label counts and
//! the train/validation split the trainers would use. Given a tokenizer, event
//! data is also tokenized into the tagging dataset to report per-tag token
//! counts and the class weights a tagging loss would use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use taleweave_core::{
    BehaviorExample, BioTag, EventExample, EventKind, HfTextEncoder, LabelVocabulary, NerCategory,
    SplitStrategy, Task, TaskLabels, build_dataset, load_jsonl, ner_class_weights, split,
};
use taleweave_trainer::split_by_cell;

/// CLI arguments
#[derive(Parser)]
#[command(name = "validate-dataset")]
#[command(about = "Validate Taleweave training data and preview its split")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Split seed
    #[arg(short, long, global = true, default_value_t = 42)]
    seed: u64,

    /// Print the summary as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Labeled event text (event classification and NER)
    Events {
        path: PathBuf,

        #[arg(long, default_value_t = 0.15)]
        val_fraction: f64,

        /// `tokenizer.json` used to build the tagging dataset
        #[arg(long)]
        tokenizer: Option<PathBuf>,
    },
    /// Behavior feature/label vectors grouped by cell
    Behavior {
        path: PathBuf,

        #[arg(long, default_value_t = 0.2)]
        val_fraction: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Events {
            path,
            val_fraction,
            tokenizer,
        } => validate_events(
            path,
            *val_fraction,
            tokenizer.as_deref(),
            cli.seed,
            cli.json,
        ),
        Commands::Behavior { path, val_fraction } => {
            validate_behavior(path, *val_fraction, cli.seed, cli.json)
        }
    }
}

/// Token counts per BIO tag and the matching inverse-frequency weights.
#[derive(Debug)]
struct TagStatistics {
    tokens: Vec<usize>,
    weights: Vec<f32>,
}

fn tag_statistics(examples: &[EventExample], tokenizer: &Path) -> Result<TagStatistics> {
    let encoder = HfTextEncoder::from_file(tokenizer)
        .with_context(|| format!("Invalid tokenizer {}", tokenizer.display()))?;
    let dataset = build_dataset(examples, Task::Tagging, &encoder)?;
    let TaskLabels::Bio(labels) = &dataset.labels else {
        anyhow::bail!("tagging dataset carried non-BIO labels");
    };

    let mut tokens = vec![0usize; BioTag::NUM_TAGS];
    for id in labels.iter().flatten() {
        if let Some(count) = usize::try_from(*id).ok().and_then(|i| tokens.get_mut(i)) {
            *count += 1;
        }
    }
    let weights = ner_class_weights(labels, BioTag::NUM_TAGS);
    Ok(TagStatistics { tokens, weights })
}

fn validate_events(
    path: &Path,
    val_fraction: f64,
    tokenizer: Option<&Path>,
    seed: u64,
    json: bool,
) -> Result<()> {
    let examples: Vec<EventExample> =
        load_jsonl(path).with_context(|| format!("Invalid event data in {}", path.display()))?;
    info!(examples = examples.len(), "Loaded event examples");

    let mut kinds: BTreeMap<EventKind, usize> = BTreeMap::new();
    let mut categories: BTreeMap<NerCategory, usize> = BTreeMap::new();
    for example in &examples {
        for kind in &example.event_kinds {
            *kinds.entry(*kind).or_default() += 1;
        }
        for entity in &example.entities {
            *categories.entry(entity.category).or_default() += 1;
        }
    }

    let split = split(
        &examples,
        val_fraction,
        seed,
        SplitStrategy::Stratified,
        EventExample::primary_kind,
    )?;
    let statistics = tokenizer
        .map(|tokenizer| tag_statistics(&examples, tokenizer))
        .transpose()?;
    let vocabulary = LabelVocabulary::standard();

    if json {
        let kind_counts: BTreeMap<&str, usize> =
            kinds.iter().map(|(k, n)| (k.as_str(), *n)).collect();
        let category_counts: BTreeMap<&str, usize> =
            categories.iter().map(|(c, n)| (c.as_str(), *n)).collect();
        let mut summary = serde_json::json!({
            "examples": examples.len(),
            "event_kinds": kind_counts,
            "entity_categories": category_counts,
            "train": split.train.len(),
            "val": split.val.len(),
        });
        if let Some(statistics) = &statistics {
            let tags: BTreeMap<&str, serde_json::Value> = vocabulary
                .tags()
                .iter()
                .zip(statistics.tokens.iter().zip(&statistics.weights))
                .map(|(tag, (tokens, weight))| {
                    (
                        tag.as_str(),
                        serde_json::json!({ "tokens": tokens, "weight": weight }),
                    )
                })
                .collect();
            summary["bio_tags"] = serde_json::json!(tags);
        }
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{}: {} valid event examples",
        path.display(),
        examples.len()
    );
    println!();
    println!("{:<25} {:>8}", "Event kind", "Count");
    for kind in EventKind::ALL {
        println!(
            "{:<25} {:>8}",
            kind.as_str(),
            kinds.get(&kind).copied().unwrap_or(0)
        );
    }
    println!();
    println!("{:<25} {:>8}", "Entity category", "Count");
    for category in NerCategory::ALL {
        println!(
            "{:<25} {:>8}",
            category.as_str(),
            categories.get(&category).copied().unwrap_or(0)
        );
    }
    println!();
    println!(
        "Stratified split (val_fraction={val_fraction}, seed={seed}): {} train, {} val",
        split.train.len(),
        split.val.len()
    );

    if let Some(statistics) = &statistics {
        println!();
        println!("{:<25} {:>8} {:>8}", "BIO tag", "Tokens", "Weight");
        for (tag, (tokens, weight)) in vocabulary
            .tags()
            .iter()
            .zip(statistics.tokens.iter().zip(&statistics.weights))
        {
            println!("{tag:<25} {tokens:>8} {weight:>8.3}");
        }
    }
    Ok(())
}

fn validate_behavior(path: &Path, val_fraction: f64, seed: u64, json: bool) -> Result<()> {
    let examples: Vec<BehaviorExample> =
        load_jsonl(path).with_context(|| format!("Invalid behavior data in {}", path.display()))?;
    info!(examples = examples.len(), "Loaded behavior examples");

    let (_, summary) = split_by_cell(&examples, val_fraction, seed)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{}: {} valid behavior examples",
        path.display(),
        summary.examples
    );
    println!("  Cells: {}", summary.cells);
    println!(
        "  Grouped split (val_fraction={val_fraction}, seed={seed}): \
         {} train examples in {} cells, {} val examples in {} cells",
        summary.train_examples, summary.train_cells, summary.val_examples, summary.val_cells
    );
    Ok(())
}
