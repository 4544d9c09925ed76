//! # JSONL Training Records
//!
//! One JSON object per line. Every record is validated before it is accepted:
//! a missing field, an out-of-vocabulary label or a wrong vector length aborts
//! loading of the whole file with the 1-based line number. There is no
//! partial-success mode.

pub mod behavior;
pub mod event;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{Result, TaleweaveError};

pub use behavior::{BehaviorExample, CellDescriptor};
pub use event::{EntityAnnotation, EventExample, TextRegister, find_overlapping_entities};

/// A record type that can be parsed from one JSONL line.
pub trait JsonlRecord: Sized {
    /// Validate and convert one decoded JSON value.
    ///
    /// `line` is the 1-based line number used in error messages.
    fn from_json(line: usize, value: Value) -> Result<Self>;
}

/// Read and validate every record from a line-oriented reader.
///
/// Blank lines are skipped but still counted for line numbers.
pub fn read_jsonl<T: JsonlRecord, R: BufRead>(reader: R) -> Result<Vec<T>> {
    let mut records = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line_num = idx + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: Value =
            serde_json::from_str(line).map_err(|e| TaleweaveError::InvalidRecord {
                line: line_num,
                message: format!("invalid JSON: {e}"),
            })?;
        records.push(T::from_json(line_num, value)?);
    }

    debug!(count = records.len(), "parsed JSONL records");
    Ok(records)
}

/// Load and validate every record from a JSONL file.
pub fn load_jsonl<T: JsonlRecord, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let records = read_jsonl(BufReader::new(file))?;
    info!(path = %path.display(), count = records.len(), "loaded training records");
    Ok(records)
}

/// Require a JSON object, reporting `what` when the value has another shape.
pub(crate) fn expect_object<'a>(
    line: usize,
    what: &str,
    value: &'a Value,
) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| TaleweaveError::InvalidRecord {
        line,
        message: format!("{what} must be a JSON object, found {}", json_type(value)),
    })
}

/// Fail with the sorted list of required keys absent from `object`.
pub(crate) fn require_fields(
    line: usize,
    location: &str,
    object: &Map<String, Value>,
    required: &[&str],
) -> Result<()> {
    let mut missing: Vec<String> = required
        .iter()
        .filter(|field| !object.contains_key(**field))
        .map(|field| field.to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort();
    Err(TaleweaveError::MissingFields {
        line,
        location: location.to_string(),
        fields: missing,
    })
}

/// Typed conversion once the shape checks have passed.
pub(crate) fn decode<T: DeserializeOwned>(line: usize, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| TaleweaveError::InvalidRecord {
        line,
        message: e.to_string(),
    })
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
