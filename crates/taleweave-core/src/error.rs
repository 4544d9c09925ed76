use thiserror::Error;

/// Errors that can occur while loading, encoding, or scoring Taleweave data.
#[derive(Debug, Error)]
pub enum TaleweaveError {
    /// A JSONL record lacks one or more required fields.
    #[error("line {line}: {location}missing fields {fields:?}")]
    MissingFields {
        /// 1-based line number in the source file.
        line: usize,
        /// Nested location prefix such as `"entity 2: "`, empty for top-level fields.
        location: String,
        /// Names of the absent fields, sorted.
        fields: Vec<String>,
    },

    /// A JSONL record is present but malformed (bad JSON, wrong field type).
    #[error("line {line}: {message}")]
    InvalidRecord {
        /// 1-based line number in the source file.
        line: usize,
        /// What was expected vs. what was found.
        message: String,
    },

    /// A fixed-length vector does not have the expected number of elements.
    #[error("line {line}: {field} vector has {found} elements, expected {expected}")]
    DimensionMismatch {
        /// 1-based line number, 0 when the vector did not come from a file.
        line: usize,
        /// Which vector (`features` or `labels`).
        field: &'static str,
        /// Required length.
        expected: usize,
        /// Actual length.
        found: usize,
    },

    /// An event kind or entity category outside the fixed vocabulary.
    #[error("line {line}: unknown {vocabulary} {value:?}, expected one of {expected}")]
    UnknownLabel {
        /// 1-based line number in the source file.
        line: usize,
        /// Which vocabulary was violated.
        vocabulary: &'static str,
        /// The offending value.
        value: String,
        /// Comma-separated list of accepted values.
        expected: String,
    },

    /// An entity span that violates `0 <= start < end <= len(text)`.
    #[error("line {line}, entity {entity}: invalid span [{start}, {end}) for {text_len} chars")]
    InvalidSpan {
        line: usize,
        entity: usize,
        start: usize,
        end: usize,
        text_len: usize,
    },

    /// Split parameters out of range.
    #[error("invalid split: {0}")]
    InvalidSplit(String),

    /// A model's embedded label map disagrees with the compiled vocabulary.
    #[error("label map mismatch: {0}")]
    LabelMismatch(String),

    /// JSON (de)serialization failed outside of line-oriented loading.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The subword tokenizer failed to load or encode.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Candle tensor construction failed.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for Taleweave core operations.
pub type Result<T> = std::result::Result<T, TaleweaveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = TaleweaveError::MissingFields {
            line: 3,
            location: String::new(),
            fields: vec!["entities".into(), "register".into()],
        };
        assert_eq!(
            err.to_string(),
            "line 3: missing fields [\"entities\", \"register\"]"
        );

        let err = TaleweaveError::MissingFields {
            line: 1,
            location: "entity 0: ".into(),
            fields: vec!["category".into()],
        };
        assert!(err.to_string().contains("entity 0: missing fields"));

        let err = TaleweaveError::DimensionMismatch {
            line: 7,
            field: "features",
            expected: 453,
            found: 452,
        };
        assert_eq!(
            err.to_string(),
            "line 7: features vector has 452 elements, expected 453"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TaleweaveError>();
    }
}
