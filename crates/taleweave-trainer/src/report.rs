//! Evaluation report and its fixed-width text rendering.

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use taleweave_core::{ClassificationMetrics, TaggingMetrics};

const RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model_dir: String,
    pub num_examples: usize,
    pub event_classification: Option<ClassificationMetrics>,
    pub ner: Option<TaggingMetrics>,
}

impl EvaluationReport {
    pub fn new<P: AsRef<Path>>(model_dir: P, num_examples: usize) -> Self {
        Self {
            model_dir: model_dir.as_ref().display().to_string(),
            num_examples,
            event_classification: None,
            ner: None,
        }
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report: {}", path.display()))
    }
}

/// Render the report as plain text.
pub fn format_report(report: &EvaluationReport) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Model evaluation: {}", report.model_dir);
    let _ = writeln!(out, "Examples evaluated: {}", report.num_examples);
    let _ = writeln!(out, "{rule}");

    if let Some(metrics) = &report.event_classification {
        let _ = writeln!(out);
        let _ = writeln!(out, "EVENT CLASSIFICATION");
        let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
        let _ = writeln!(
            out,
            "{:<25} {:>10} {:>10} {:>10}",
            "Class", "Precision", "Recall", "F1"
        );
        for score in &metrics.per_class {
            let _ = writeln!(
                out,
                "{:<25} {:>10.4} {:>10.4} {:>10.4}",
                score.name, score.precision, score.recall, score.f1
            );
        }
        let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
        let _ = writeln!(
            out,
            "{:<25} {:>10.4} {:>10.4} {:>10.4}",
            "MACRO", metrics.macro_precision, metrics.macro_recall, metrics.macro_f1
        );
    }

    if let Some(metrics) = &report.ner {
        let _ = writeln!(out);
        let _ = writeln!(out, "ENTITY EXTRACTION (NER)");
        let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
        let _ = writeln!(out, "Entity precision: {:.4}", metrics.precision);
        let _ = writeln!(out, "Entity recall:    {:.4}", metrics.recall);
        let _ = writeln!(out, "Entity F1:        {:.4}", metrics.f1);
        let _ = writeln!(out);
        if metrics.has_entities() {
            let _ = writeln!(
                out,
                "{:<25} {:>10} {:>10} {:>10} {:>8}",
                "Category", "Precision", "Recall", "F1", "Support"
            );
            for score in &metrics.per_category {
                let _ = writeln!(
                    out,
                    "{:<25} {:>10.4} {:>10.4} {:>10.4} {:>8}",
                    score.category.as_str(),
                    score.precision,
                    score.recall,
                    score.f1,
                    score.support
                );
            }
        } else {
            let _ = writeln!(out, "(no entities in gold or predictions)");
        }
    }

    if report.event_classification.is_none() && report.ner.is_none() {
        let _ = writeln!(out);
        let _ = writeln!(out, "(no models found)");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{rule}");
    out
}

#[cfg(test)]
mod tests {
    use taleweave_core::NerCategory;
    use taleweave_core::metrics::{CategoryScore, ClassScore};

    use super::*;

    fn classification() -> ClassificationMetrics {
        ClassificationMetrics {
            per_class: vec![
                ClassScore {
                    name: "StateAssertion".into(),
                    precision: 1.0,
                    recall: 0.5,
                    f1: 0.75,
                    support: 2,
                },
                ClassScore {
                    name: "SpatialChange".into(),
                    precision: 0.0,
                    recall: 0.0,
                    f1: 0.0,
                    support: 0,
                },
            ],
            macro_precision: 0.5,
            macro_recall: 0.25,
            macro_f1: 0.375,
        }
    }

    #[test]
    fn test_classification_table() {
        let mut report = EvaluationReport::new("models/v1", 12);
        report.event_classification = Some(classification());
        let text = format_report(&report);

        assert!(text.contains("Examples evaluated: 12"));
        assert!(text.contains(&format!("{:<25} {:>10.4}", "StateAssertion", 1.0)));
        assert!(text.contains(&format!(
            "{:<25} {:>10.4} {:>10.4} {:>10.4}",
            "MACRO", 0.5, 0.25, 0.375
        )));
        assert!(!text.contains("ENTITY EXTRACTION"));
    }

    #[test]
    fn test_no_entities_message() {
        let mut report = EvaluationReport::new("models/v1", 3);
        report.ner = Some(TaggingMetrics::default());
        let text = format_report(&report);
        assert!(text.contains("(no entities in gold or predictions)"));
        assert!(text.contains("Entity F1:        0.0000"));
    }

    #[test]
    fn test_per_category_breakdown() {
        let mut report = EvaluationReport::new("models/v1", 3);
        report.ner = Some(TaggingMetrics {
            precision: 1.0,
            recall: 1.0,
            f1: 1.0,
            gold_entities: 2,
            predicted_entities: 2,
            per_category: vec![CategoryScore {
                category: NerCategory::Character,
                precision: 1.0,
                recall: 1.0,
                f1: 1.0,
                support: 2,
            }],
        });
        let text = format_report(&report);
        assert!(text.contains("CHARACTER"));
        assert!(!text.contains("(no entities"));
    }

    #[test]
    fn test_json_round_trip() {
        let mut report = EvaluationReport::new("models/v1", 5);
        report.event_classification = Some(classification());
        let json = serde_json::to_string(&report).unwrap();
        let parsed: EvaluationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_empty_report() {
        let text = format_report(&EvaluationReport::new("models/none", 0));
        assert!(text.contains("(no models found)"));
    }
}
