//! Feature/label vectors for the behavior predictor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{JsonlRecord, decode, expect_object, json_type, require_fields};
use crate::error::{Result, TaleweaveError};
use crate::feature_schema::{TOTAL_INPUT_FEATURES, TOTAL_OUTPUT_FEATURES, verify_lengths};

const REQUIRED_FIELDS: &[&str] = &["id", "cell", "features", "labels"];
const REQUIRED_CELL_FIELDS: &[&str] = &[
    "archetype_a",
    "archetype_b",
    "dynamic",
    "profile",
    "a_is_role_a",
];

/// The generative cell an example was sampled from.
///
/// Every variation of a cell shares the same key, so splits must keep a cell
/// on one side of the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellDescriptor {
    pub archetype_a: String,
    pub archetype_b: String,
    pub dynamic: String,
    pub profile: String,
    pub a_is_role_a: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
}

impl CellDescriptor {
    /// Grouping key: `archetype_a|archetype_b|dynamic|profile|a_is_role_a`.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.archetype_a, self.archetype_b, self.dynamic, self.profile, self.a_is_role_a
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorExample {
    pub id: String,
    pub cell: CellDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<u32>,
    pub features: Vec<f32>,
    pub labels: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl BehaviorExample {
    pub fn cell_key(&self) -> String {
        self.cell.key()
    }
}

impl JsonlRecord for BehaviorExample {
    fn from_json(line: usize, value: Value) -> Result<Self> {
        let record = expect_object(line, "record", &value)?;
        require_fields(line, "", record, REQUIRED_FIELDS)?;

        let cell = expect_object(line, "cell", &record["cell"])?;
        require_fields(line, "cell: ", cell, REQUIRED_CELL_FIELDS)?;

        let features = vector_len(line, "features", &record["features"])?;
        let labels = vector_len(line, "labels", &record["labels"])?;
        verify_lengths(line, features, labels)?;

        decode(line, value)
    }
}

fn vector_len(line: usize, field: &str, value: &Value) -> Result<usize> {
    value
        .as_array()
        .map(Vec::len)
        .ok_or_else(|| TaleweaveError::InvalidRecord {
            line,
            message: format!("{field} must be an array, found {}", json_type(value)),
        })
}

/// Row-major copies of the feature and label vectors.
pub fn flatten(examples: &[BehaviorExample]) -> (Vec<f32>, Vec<f32>) {
    let mut features = Vec::with_capacity(examples.len() * TOTAL_INPUT_FEATURES);
    let mut labels = Vec::with_capacity(examples.len() * TOTAL_OUTPUT_FEATURES);
    for example in examples {
        features.extend_from_slice(&example.features);
        labels.extend_from_slice(&example.labels);
    }
    (features, labels)
}
