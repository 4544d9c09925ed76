//! # Taleweave Core
//!
//! Data contracts shared by the Taleweave training and evaluation tools:
//! fixed label vocabularies, character-span to BIO alignment, JSONL record
//! loading, dataset building, leakage-free splitting and metrics.
//!
//! ## Quick Start
//!
//! ```rust
//! use taleweave_core::{BioTag, EntityAnnotation, NerCategory, align_bio_labels};
//!
//! // "Sarah walked" as [CLS] Sarah walked [SEP]
//! let entities = vec![EntityAnnotation::new(0, 5, "Sarah", NerCategory::Character, "Actor")];
//! let offsets = vec![None, Some((0, 5)), Some((6, 12)), None];
//!
//! let labels = align_bio_labels(&entities, &offsets);
//! assert_eq!(labels[1], BioTag::Begin(NerCategory::Character).id());
//! assert_eq!(labels[2], BioTag::Outside.id());
//! ```
pub mod align;
pub mod dataset;
pub mod encoder;
pub mod error;
pub mod feature_schema;
pub mod metrics;
pub mod record;
pub mod split;
pub mod vocab;

// Re-export primary API
pub use align::{TokenOffset, align_and_pad, align_bio_labels};
pub use dataset::{Task, TaskDataset, TaskLabels, build_dataset, multi_hot, ner_class_weights};
pub use encoder::{HfTextEncoder, TextEncoder, TokenEncoding};
pub use error::{Result, TaleweaveError};
pub use metrics::{ClassificationMetrics, TaggingMetrics, score_classification, score_tagging};
pub use record::{
    BehaviorExample, CellDescriptor, EntityAnnotation, EventExample, JsonlRecord, TextRegister,
    load_jsonl, read_jsonl,
};
pub use split::{Split, SplitStrategy, split};
pub use vocab::{
    BioTag, EventKind, IGNORE_INDEX, LabelVocabulary, MAX_SEQ_LENGTH, NerCategory, verify_id2label,
};
