//! Annotated text examples for event classification and entity tagging.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::{JsonlRecord, decode, expect_object, json_type, require_fields};
use crate::error::{Result, TaleweaveError};
use crate::vocab::{EVENT_KIND_NAMES, EventKind, NER_CATEGORY_NAMES, NerCategory};

const REQUIRED_FIELDS: &[&str] = &["id", "text", "register", "event_kinds", "entities"];
const REQUIRED_ENTITY_FIELDS: &[&str] = &["start", "end", "text", "category", "role"];

/// An entity mention with half-open character offsets into the example text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAnnotation {
    /// First character of the mention (inclusive).
    pub start: usize,
    /// One past the last character of the mention (exclusive).
    pub end: usize,
    /// The mention text.
    pub text: String,
    pub category: NerCategory,
    /// Participant role in the event ("Actor", "Target", ...).
    pub role: String,
}

impl EntityAnnotation {
    pub fn new(
        start: usize,
        end: usize,
        text: impl Into<String>,
        category: NerCategory,
        role: impl Into<String>,
    ) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            category,
            role: role.into(),
        }
    }

    /// Whether the half-open range `[start, end)` shares at least one character
    /// with this mention.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && end > self.start
    }
}

/// Who produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextRegister {
    Player,
    Narrator,
}

/// A single annotated training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventExample {
    pub id: String,
    pub text: String,
    pub register: TextRegister,
    /// Multi-label targets; the first entry is the primary kind.
    pub event_kinds: Vec<EventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    pub entities: Vec<EntityAnnotation>,
}

impl EventExample {
    /// The kind used as stratification key. Loading guarantees at least one.
    pub fn primary_kind(&self) -> EventKind {
        self.event_kinds
            .first()
            .copied()
            .unwrap_or(EventKind::StateAssertion)
    }

    /// Multi-hot target vector, one column per [`EventKind`].
    pub fn multi_hot(&self) -> Vec<f32> {
        encode_event_kinds(&self.event_kinds)
    }
}

/// Multi-hot encode a set of event kinds.
pub fn encode_event_kinds(kinds: &[EventKind]) -> Vec<f32> {
    let mut labels = vec![0.0f32; EventKind::COUNT];
    for kind in kinds {
        labels[kind.index()] = 1.0;
    }
    labels
}

/// Pairs `(i, j)`, `i < j`, of annotations whose spans overlap.
pub fn find_overlapping_entities(entities: &[EntityAnnotation]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (i, a) in entities.iter().enumerate() {
        for (j, b) in entities.iter().enumerate().skip(i + 1) {
            if a.overlaps(b.start, b.end) {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

impl JsonlRecord for EventExample {
    fn from_json(line: usize, value: Value) -> Result<Self> {
        let record = expect_object(line, "record", &value)?;
        require_fields(line, "", record, REQUIRED_FIELDS)?;

        let kinds = record["event_kinds"]
            .as_array()
            .ok_or_else(|| TaleweaveError::InvalidRecord {
                line,
                message: format!(
                    "event_kinds must be an array, found {}",
                    json_type(&record["event_kinds"])
                ),
            })?;
        if kinds.is_empty() {
            return Err(TaleweaveError::InvalidRecord {
                line,
                message: "event_kinds is empty, expected at least one event kind".into(),
            });
        }
        for kind in kinds {
            check_vocabulary::<EventKind>(line, "event kind", kind, &EVENT_KIND_NAMES)?;
        }

        let entities = record["entities"]
            .as_array()
            .ok_or_else(|| TaleweaveError::InvalidRecord {
                line,
                message: format!(
                    "entities must be an array, found {}",
                    json_type(&record["entities"])
                ),
            })?;
        for (i, entity) in entities.iter().enumerate() {
            let location = format!("entity {i}: ");
            let entity = expect_object(line, location.trim_end_matches(": "), entity)?;
            require_fields(line, &location, entity, REQUIRED_ENTITY_FIELDS)?;
            check_vocabulary::<NerCategory>(
                line,
                "entity category",
                &entity["category"],
                &NER_CATEGORY_NAMES,
            )?;
        }

        let example: EventExample = decode(line, value)?;

        let text_len = example.text.chars().count();
        for (i, entity) in example.entities.iter().enumerate() {
            if entity.start >= entity.end || entity.end > text_len {
                return Err(TaleweaveError::InvalidSpan {
                    line,
                    entity: i,
                    start: entity.start,
                    end: entity.end,
                    text_len,
                });
            }
        }

        let overlapping = find_overlapping_entities(&example.entities);
        if !overlapping.is_empty() {
            warn!(
                line,
                id = %example.id,
                pairs = ?overlapping,
                "overlapping entity annotations; only the first-listed entity labels shared tokens"
            );
        }

        Ok(example)
    }
}

fn check_vocabulary<T: std::str::FromStr>(
    line: usize,
    vocabulary: &'static str,
    value: &Value,
    names: &[&str],
) -> Result<()> {
    let Some(name) = value.as_str() else {
        return Err(TaleweaveError::InvalidRecord {
            line,
            message: format!("{vocabulary} must be a string, found {}", json_type(value)),
        });
    };

    match name.parse::<T>() {
        Ok(_) => Ok(()),
        Err(_) => Err(TaleweaveError::UnknownLabel {
            line,
            vocabulary,
            value: name.to_string(),
            expected: names.join(", "),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::json;

    use super::*;
    use crate::record::read_jsonl;

    fn record(text: &str, kinds: &[&str], entities: Value) -> String {
        json!({
            "id": "ex-1",
            "text": text,
            "register": "player",
            "event_kinds": kinds,
            "entities": entities,
        })
        .to_string()
    }

    fn load(lines: &[String]) -> Result<Vec<EventExample>> {
        read_jsonl(Cursor::new(lines.join("\n")))
    }

    #[test]
    fn test_load_valid_records() {
        let lines = vec![
            record(
                "I pick up the stone",
                &["ActionOccurrence"],
                json!([
                    {"start": 0, "end": 1, "text": "I", "category": "CHARACTER", "role": "Actor"},
                    {"start": 10, "end": 19, "text": "the stone",
                     "category": "OBJECT", "role": "Target"}
                ]),
            ),
            String::new(),
            record(
                "The wind rose",
                &["EnvironmentalChange", "StateAssertion"],
                json!([]),
            ),
        ];
        let examples = load(&lines).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].entities[1].category, NerCategory::Object);
        assert_eq!(examples[1].primary_kind(), EventKind::EnvironmentalChange);
        assert_eq!(examples[0].register, TextRegister::Player);
    }

    #[test]
    fn test_missing_top_level_fields() {
        let lines = vec![
            record("ok", &["SpeechAct"], json!([])),
            json!({"id": "1", "text": "hello"}).to_string(),
        ];
        let err = load(&lines).unwrap_err();
        assert_eq!(
            err.to_string(),
            "line 2: missing fields [\"entities\", \"event_kinds\", \"register\"]"
        );
    }

    #[test]
    fn test_missing_entity_fields() {
        let lines = vec![record(
            "hello",
            &["StateAssertion"],
            json!([{"start": 0, "end": 5, "text": "hello"}]),
        )];
        let err = load(&lines).unwrap_err();
        assert_eq!(
            err.to_string(),
            "line 1: entity 0: missing fields [\"category\", \"role\"]"
        );
    }

    #[test]
    fn test_unknown_event_kind_rejected() {
        let lines = vec![record("hello", &["SceneLifecycle"], json!([]))];
        match load(&lines).unwrap_err() {
            TaleweaveError::UnknownLabel {
                line, vocabulary, value, ..
            } => {
                assert_eq!(line, 1);
                assert_eq!(vocabulary, "event kind");
                assert_eq!(value, "SceneLifecycle");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        let lines = vec![record(
            "Sarah walked",
            &["ActionOccurrence"],
            json!([{"start": 0, "end": 5, "text": "Sarah", "category": "PERSON", "role": "Actor"}]),
        )];
        let err = load(&lines).unwrap_err();
        assert!(
            err.to_string()
                .contains("unknown entity category \"PERSON\"")
        );
    }

    #[test]
    fn test_empty_event_kinds_rejected() {
        let lines = vec![record("hello", &[], json!([]))];
        assert!(matches!(
            load(&lines).unwrap_err(),
            TaleweaveError::InvalidRecord { line: 1, .. }
        ));
    }

    #[test]
    fn test_invalid_span_rejected() {
        let lines = vec![record(
            "Adam",
            &["StateAssertion"],
            json!([
                {"start": 0, "end": 9, "text": "Adam", "category": "CHARACTER", "role": "Actor"}
            ]),
        )];
        assert!(matches!(
            load(&lines).unwrap_err(),
            TaleweaveError::InvalidSpan {
                line: 1,
                entity: 0,
                end: 9,
                text_len: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_span_length_counts_chars() {
        // "Zoë" is 3 chars but 4 bytes.
        let lines = vec![record(
            "Zoë ran",
            &["ActionOccurrence"],
            json!([
                {"start": 0, "end": 3, "text": "Zoë", "category": "CHARACTER", "role": "Actor"}
            ]),
        )];
        assert!(load(&lines).is_ok());
    }

    #[test]
    fn test_malformed_json_reports_line() {
        let lines = vec![
            record("ok", &["SpeechAct"], json!([])),
            "{not json".to_string(),
        ];
        let err = load(&lines).unwrap_err();
        assert!(err.to_string().starts_with("line 2: invalid JSON"));
    }

    #[test]
    fn test_multi_hot_encoding() {
        let labels = encode_event_kinds(&[EventKind::SpeechAct, EventKind::StateAssertion]);
        assert_eq!(labels.len(), EventKind::COUNT);
        assert_eq!(labels[EventKind::SpeechAct.index()], 1.0);
        assert_eq!(labels[EventKind::StateAssertion.index()], 1.0);
        assert_eq!(labels.iter().sum::<f32>(), 2.0);
    }

    #[test]
    fn test_find_overlapping_entities() {
        let entities = vec![
            EntityAnnotation::new(0, 11, "The old man", NerCategory::Character, "Actor"),
            EntityAnnotation::new(4, 7, "old", NerCategory::Abstract, "Modifier"),
            EntityAnnotation::new(11, 15, " sat", NerCategory::Gesture, "Action"),
        ];
        assert_eq!(find_overlapping_entities(&entities), vec![(0, 1)]);
    }
}
