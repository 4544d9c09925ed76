//! Evaluation of exported text models against labeled event JSONL.
//!
//! A model directory holds `tokenizer.json` and up to two model
//! subdirectories, `event_classifier/` and `ner_classifier/`. Each model's
//! embedded label map is checked against the compiled-in vocabulary before
//! any inference runs. Every example goes through each model exactly once.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use taleweave_core::metrics::{
    ClassificationCounts, DEFAULT_THRESHOLD, TaggingCounts, argmax, threshold_probabilities,
};
use taleweave_core::vocab::EVENT_KIND_NAMES;
use taleweave_core::{
    BioTag, ClassificationMetrics, EventExample, EventKind, HfTextEncoder, LabelVocabulary,
    MAX_SEQ_LENGTH, SplitStrategy, TaggingMetrics, TextEncoder, TokenEncoding, align_bio_labels,
    load_jsonl, split, verify_id2label,
};

use crate::report::EvaluationReport;
use crate::text_model::{DistilBertSequenceClassifier, DistilBertTokenClassifier, LogitsModel};

pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const EVENT_MODEL_DIR: &str = "event_classifier";
pub const NER_MODEL_DIR: &str = "ner_classifier";

#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    pub val_fraction: f64,
    pub seed: u64,
    pub threshold: f32,
    /// Evaluate only the held-out split; otherwise every example.
    pub use_split: bool,
    pub batch_size: usize,
    pub max_length: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            val_fraction: 0.15,
            seed: 42,
            threshold: DEFAULT_THRESHOLD,
            use_split: true,
            batch_size: 32,
            max_length: MAX_SEQ_LENGTH,
        }
    }
}

impl EvalConfig {
    pub fn with_val_fraction(mut self, val_fraction: f64) -> Self {
        self.val_fraction = val_fraction.clamp(0.01, 0.99);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_split(mut self, use_split: bool) -> Self {
        self.use_split = use_split;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length.max(2);
        self
    }
}

/// Stack fixed-length encodings into `(batch, seq)` id and mask tensors.
fn batch_tensors(encodings: &[TokenEncoding], device: &Device) -> Result<(Tensor, Tensor)> {
    let width = encodings.first().map_or(0, TokenEncoding::len);
    ensure!(
        encodings.iter().all(|e| e.len() == width),
        "encoder returned sequences of different lengths"
    );
    let ids: Vec<u32> = encodings
        .iter()
        .flat_map(|e| e.input_ids.iter().copied())
        .collect();
    let mask: Vec<u32> = encodings
        .iter()
        .flat_map(|e| e.attention_mask.iter().copied())
        .collect();
    let shape = (encodings.len(), width);
    Ok((
        Tensor::from_vec(ids, shape, device)?,
        Tensor::from_vec(mask, shape, device)?,
    ))
}

fn encode_chunk<E: TextEncoder + ?Sized>(
    encoder: &E,
    chunk: &[EventExample],
) -> Result<Vec<TokenEncoding>> {
    let texts: Vec<&str> = chunk.iter().map(|e| e.text.as_str()).collect();
    Ok(encoder.encode_batch(&texts)?)
}

/// Multi-label event classification scores over `examples`.
pub fn evaluate_classification<E, M>(
    encoder: &E,
    model: &M,
    examples: &[EventExample],
    config: &EvalConfig,
    device: &Device,
) -> Result<ClassificationMetrics>
where
    E: TextEncoder + ?Sized,
    M: LogitsModel + ?Sized,
{
    ensure!(
        model.num_labels() == EventKind::COUNT,
        "event model has {} labels, expected {}",
        model.num_labels(),
        EventKind::COUNT
    );
    let mut counts = ClassificationCounts::new(EventKind::COUNT);

    for chunk in examples.chunks(config.batch_size.max(1)) {
        let encodings = encode_chunk(encoder, chunk)?;
        let (input_ids, attention_mask) = batch_tensors(&encodings, device)?;
        let logits = model
            .forward(&input_ids, &attention_mask)?
            .to_vec2::<f32>()?;

        for (example, row) in chunk.iter().zip(&logits) {
            let predicted = threshold_probabilities(row, config.threshold);
            counts.add(&example.multi_hot(), &predicted);
        }
    }

    Ok(counts.finish(&EVENT_KIND_NAMES))
}

/// Entity-level tagging scores over `examples`. Gold tags come from aligning
/// each example's entities to the same encoding fed to the model.
pub fn evaluate_tagging<E, M>(
    encoder: &E,
    model: &M,
    examples: &[EventExample],
    config: &EvalConfig,
    device: &Device,
) -> Result<TaggingMetrics>
where
    E: TextEncoder + ?Sized,
    M: LogitsModel + ?Sized,
{
    ensure!(
        model.num_labels() == BioTag::NUM_TAGS,
        "ner model has {} labels, expected {}",
        model.num_labels(),
        BioTag::NUM_TAGS
    );
    let mut counts = TaggingCounts::new();

    for chunk in examples.chunks(config.batch_size.max(1)) {
        let encodings = encode_chunk(encoder, chunk)?;
        let (input_ids, attention_mask) = batch_tensors(&encodings, device)?;
        let logits = model
            .forward(&input_ids, &attention_mask)?
            .to_vec3::<f32>()?;

        for ((example, encoding), rows) in chunk.iter().zip(&encodings).zip(&logits) {
            let gold = align_bio_labels(&example.entities, &encoding.offsets);
            let predicted: Vec<i64> = rows.iter().map(|row| argmax(row) as i64).collect();
            counts.add(&gold, &predicted);
        }
    }

    Ok(counts.finish())
}

/// Examples to evaluate: the stratified held-out split, or all of them.
pub fn evaluation_examples(
    examples: Vec<EventExample>,
    config: &EvalConfig,
) -> Result<Vec<EventExample>> {
    if !config.use_split {
        return Ok(examples);
    }
    let split = split(
        &examples,
        config.val_fraction,
        config.seed,
        SplitStrategy::Stratified,
        EventExample::primary_kind,
    )?;
    let (_, val) = split.select(&examples);
    Ok(val)
}

/// Load the tokenizer of a model directory at `max_length`.
pub fn load_encoder(model_dir: &Path, max_length: usize) -> Result<HfTextEncoder> {
    let path = model_dir.join(TOKENIZER_FILE);
    let tokenizer = Tokenizer::from_file(&path)
        .map_err(|e| anyhow::anyhow!("Failed to load tokenizer {}: {e}", path.display()))?;
    Ok(HfTextEncoder::from_tokenizer(tokenizer, max_length)?)
}

/// Evaluate every model present in `model_dir` on `data_path`.
pub fn evaluate(
    model_dir: &Path,
    data_path: &Path,
    config: &EvalConfig,
) -> Result<EvaluationReport> {
    let device = Device::Cpu;

    let examples: Vec<EventExample> = load_jsonl(data_path)
        .with_context(|| format!("Failed to load {}", data_path.display()))?;
    let total = examples.len();
    let examples = evaluation_examples(examples, config)?;
    info!(
        total,
        evaluated = examples.len(),
        "Loaded evaluation examples"
    );

    let encoder = load_encoder(model_dir, config.max_length)?;
    let mut report = EvaluationReport::new(model_dir, examples.len());

    let event_dir = model_dir.join(EVENT_MODEL_DIR);
    if event_dir.is_dir() {
        let (model, model_config) = DistilBertSequenceClassifier::load(&event_dir, &device)?;
        verify_id2label(
            "event classifier",
            &EVENT_KIND_NAMES,
            &model_config.id2label,
        )?;
        let metrics = evaluate_classification(&encoder, &model, &examples, config, &device)?;
        info!(macro_f1 = %format!("{:.4}", metrics.macro_f1), "Event classification evaluated");
        report.event_classification = Some(metrics);
    } else {
        warn!(dir = %event_dir.display(), "No event classifier found");
    }

    let ner_dir = model_dir.join(NER_MODEL_DIR);
    if ner_dir.is_dir() {
        let (model, model_config) = DistilBertTokenClassifier::load(&ner_dir, &device)?;
        let vocabulary = LabelVocabulary::standard();
        verify_id2label("ner classifier", vocabulary.tags(), &model_config.id2label)?;
        let metrics = evaluate_tagging(&encoder, &model, &examples, config, &device)?;
        info!(entity_f1 = %format!("{:.4}", metrics.f1), "NER evaluated");
        report.ner = Some(metrics);
    } else {
        warn!(dir = %ner_dir.display(), "No NER model found");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;

    use super::*;
    use taleweave_core::{EntityAnnotation, NerCategory, TextRegister};

    /// One token per whitespace word, wrapped in `[CLS]`/`[SEP]`, padded with 0.
    /// Word ids are `10 + word index in VOCAB`.
    struct WordEncoder {
        max_length: usize,
    }

    const VOCAB: [&str; 8] = [
        "Sarah", "walked", "home", "Adam", "ran", "the", "stone", "fell",
    ];

    impl TextEncoder for WordEncoder {
        fn max_length(&self) -> usize {
            self.max_length
        }

        fn encode(&self, text: &str) -> taleweave_core::Result<TokenEncoding> {
            let mut ids = vec![2];
            let mut offsets = vec![None];
            for (char_idx, word) in words(text) {
                if ids.len() + 1 >= self.max_length {
                    break;
                }
                let id = VOCAB
                    .iter()
                    .position(|w| *w == word)
                    .map_or(1, |i| 10 + i as u32);
                ids.push(id);
                offsets.push(Some((char_idx, char_idx + word.chars().count())));
            }
            ids.push(3);
            offsets.push(None);
            let mut mask = vec![1; ids.len()];
            while ids.len() < self.max_length {
                ids.push(0);
                mask.push(0);
                offsets.push(None);
            }
            Ok(TokenEncoding {
                input_ids: ids,
                attention_mask: mask,
                offsets,
            })
        }
    }

    fn words(text: &str) -> Vec<(usize, &str)> {
        let mut out = Vec::new();
        let mut char_idx = 0;
        for word in text.split(' ') {
            if !word.is_empty() {
                out.push((char_idx, word));
            }
            char_idx += word.chars().count() + 1;
        }
        out
    }

    /// Returns fixed logits for each distinct id row; counts forward calls.
    struct TableModel {
        num_labels: usize,
        sequence: HashMap<Vec<u32>, Vec<f32>>,
        tokens: HashMap<Vec<u32>, Vec<Vec<f32>>>,
        calls: Cell<usize>,
        rows_seen: Cell<usize>,
    }

    impl TableModel {
        fn new(num_labels: usize) -> Self {
            Self {
                num_labels,
                sequence: HashMap::new(),
                tokens: HashMap::new(),
                calls: Cell::new(0),
                rows_seen: Cell::new(0),
            }
        }
    }

    impl LogitsModel for TableModel {
        fn num_labels(&self) -> usize {
            self.num_labels
        }

        fn forward(
            &self,
            input_ids: &Tensor,
            _attention_mask: &Tensor,
        ) -> candle_core::Result<Tensor> {
            self.calls.set(self.calls.get() + 1);
            let rows = input_ids.to_vec2::<u32>()?;
            self.rows_seen.set(self.rows_seen.get() + rows.len());
            let seq = rows.first().map_or(0, Vec::len);
            let device = input_ids.device();
            if self.tokens.is_empty() {
                let data: Vec<f32> = rows
                    .iter()
                    .flat_map(|ids| {
                        self.sequence
                            .get(ids)
                            .cloned()
                            .unwrap_or_else(|| vec![-5.0; self.num_labels])
                    })
                    .collect();
                Tensor::from_vec(data, (rows.len(), self.num_labels), device)
            } else {
                let data: Vec<f32> = rows
                    .iter()
                    .flat_map(|ids| {
                        let table = self.tokens.get(ids).cloned().unwrap_or_default();
                        (0..seq)
                            .flat_map(|i| {
                                table.get(i).cloned().unwrap_or_else(|| {
                                    one_hot_logits(self.num_labels, BioTag::Outside.index())
                                })
                            })
                            .collect::<Vec<f32>>()
                    })
                    .collect();
                Tensor::from_vec(data, (rows.len(), seq, self.num_labels), device)
            }
        }
    }

    fn one_hot_logits(width: usize, hot: usize) -> Vec<f32> {
        let mut row = vec![-5.0; width];
        row[hot] = 5.0;
        row
    }

    fn example(
        id: &str,
        text: &str,
        kinds: &[EventKind],
        entities: Vec<EntityAnnotation>,
    ) -> EventExample {
        EventExample {
            id: id.into(),
            text: text.into(),
            register: TextRegister::Narrator,
            event_kinds: kinds.to_vec(),
            action_type: None,
            entities,
        }
    }

    fn examples() -> Vec<EventExample> {
        vec![
            example(
                "a",
                "Sarah walked home",
                &[EventKind::SpatialChange, EventKind::ActionOccurrence],
                vec![EntityAnnotation::new(
                    0,
                    5,
                    "Sarah",
                    NerCategory::Character,
                    "Actor",
                )],
            ),
            example(
                "b",
                "Adam ran",
                &[EventKind::ActionOccurrence],
                vec![EntityAnnotation::new(
                    0,
                    4,
                    "Adam",
                    NerCategory::Character,
                    "Actor",
                )],
            ),
            example(
                "c",
                "the stone fell",
                &[EventKind::StateAssertion],
                vec![EntityAnnotation::new(
                    0,
                    9,
                    "the stone",
                    NerCategory::Object,
                    "Subject",
                )],
            ),
        ]
    }

    /// Sequence model whose predictions equal the gold kinds.
    fn oracle_classifier(encoder: &WordEncoder, examples: &[EventExample]) -> TableModel {
        let mut model = TableModel::new(EventKind::COUNT);
        for ex in examples {
            let ids = encoder.encode(&ex.text).unwrap().input_ids;
            let logits = ex
                .multi_hot()
                .iter()
                .map(|v| if *v > 0.5 { 5.0 } else { -5.0 })
                .collect();
            model.sequence.insert(ids, logits);
        }
        model
    }

    /// Token model whose predictions equal the aligned gold tags.
    fn oracle_tagger(encoder: &WordEncoder, examples: &[EventExample]) -> TableModel {
        let mut model = TableModel::new(BioTag::NUM_TAGS);
        for ex in examples {
            let encoding = encoder.encode(&ex.text).unwrap();
            let gold = align_bio_labels(&ex.entities, &encoding.offsets);
            let rows = gold
                .iter()
                .map(|id| {
                    let tag = BioTag::from_id(*id).unwrap_or(BioTag::Outside);
                    one_hot_logits(BioTag::NUM_TAGS, tag.index())
                })
                .collect();
            model.tokens.insert(encoding.input_ids, rows);
        }
        model
    }

    #[test]
    fn test_oracle_classifier_scores_one_on_present_classes() {
        let encoder = WordEncoder { max_length: 8 };
        let examples = examples();
        let model = oracle_classifier(&encoder, &examples);
        let config = EvalConfig::default().with_batch_size(2);

        let metrics =
            evaluate_classification(&encoder, &model, &examples, &config, &Device::Cpu).unwrap();
        for kind in [
            EventKind::SpatialChange,
            EventKind::ActionOccurrence,
            EventKind::StateAssertion,
        ] {
            let score = metrics.class(kind.as_str()).unwrap();
            assert_eq!(score.f1, 1.0, "{kind}");
        }
        assert_eq!(metrics.class("ActionOccurrence").unwrap().support, 2);
        // one forward per batch, every example exactly once
        assert_eq!(model.calls.get(), 2);
        assert_eq!(model.rows_seen.get(), 3);
    }

    #[test]
    fn test_silent_classifier_has_zero_recall() {
        let encoder = WordEncoder { max_length: 8 };
        let model = TableModel::new(EventKind::COUNT);
        let metrics = evaluate_classification(
            &encoder,
            &model,
            &examples(),
            &EvalConfig::default(),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(metrics.macro_recall, 0.0);
    }

    #[test]
    fn test_classification_label_count_mismatch() {
        let encoder = WordEncoder { max_length: 8 };
        let model = TableModel::new(3);
        let err = evaluate_classification(
            &encoder,
            &model,
            &examples(),
            &EvalConfig::default(),
            &Device::Cpu,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected 8"));
    }

    #[test]
    fn test_oracle_tagger_scores_one() {
        let encoder = WordEncoder { max_length: 8 };
        let examples = examples();
        let model = oracle_tagger(&encoder, &examples);

        let metrics = evaluate_tagging(
            &encoder,
            &model,
            &examples,
            &EvalConfig::default(),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(metrics.f1, 1.0);
        assert_eq!(metrics.gold_entities, 3);
        assert_eq!(model.rows_seen.get(), 3);
    }

    #[test]
    fn test_tagging_label_count_mismatch() {
        let encoder = WordEncoder { max_length: 8 };
        let model = TableModel::new(BioTag::NUM_TAGS - 2);
        let err = evaluate_tagging(
            &encoder,
            &model,
            &examples(),
            &EvalConfig::default(),
            &Device::Cpu,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected 15"));
        assert_eq!(model.calls.get(), 0);
    }

    #[test]
    fn test_tagging_is_batch_size_independent() {
        let encoder = WordEncoder { max_length: 8 };
        let examples = examples();
        let mut model = oracle_tagger(&encoder, &examples);
        // break the prediction for "Adam"
        let adam = encoder.encode("Adam ran").unwrap().input_ids;
        model.tokens.remove(&adam);

        let small = EvalConfig::default().with_batch_size(1);
        let large = EvalConfig::default().with_batch_size(32);
        let a = evaluate_tagging(&encoder, &model, &examples, &small, &Device::Cpu).unwrap();
        let b = evaluate_tagging(&encoder, &model, &examples, &large, &Device::Cpu).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.predicted_entities, 2);
        assert_eq!(a.gold_entities, 3);
    }

    #[test]
    fn test_evaluation_examples_split() {
        let mut all = Vec::new();
        for i in 0..20 {
            let kind = if i % 2 == 0 {
                EventKind::SpatialChange
            } else {
                EventKind::StateAssertion
            };
            all.push(example(&i.to_string(), "Adam ran", &[kind], vec![]));
        }
        let config = EvalConfig::default();
        let val = evaluation_examples(all.clone(), &config).unwrap();
        assert_eq!(val.len(), 3);
        assert_eq!(val, evaluation_examples(all.clone(), &config).unwrap());

        let everything = evaluation_examples(all, &config.with_split(false)).unwrap();
        assert_eq!(everything.len(), 20);
    }
}
