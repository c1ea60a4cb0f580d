//! Label-file accuracy scoring.
//!
//! Labels are compared as trimmed tokens, so `"07"` and `"7"` are different
//! labels. Files of unequal length are scored over the shorter one, which
//! lets a partially failed prediction run still produce a partial score.

use crate::error::{BenchError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    #[serde(rename = "correct_predictions")]
    pub correct: usize,
    #[serde(rename = "total_samples")]
    pub total: usize,
    pub accuracy: f64,
}

impl QualityScore {
    pub fn new(correct: usize, total: usize) -> Self {
        let accuracy = if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        };
        Self {
            correct,
            total,
            accuracy,
        }
    }
}

/// Scores keyed by `"<tag> quality"`, in the order they were taken.
pub type QualityMap = IndexMap<String, QualityScore>;

pub fn quality_key(tag: &str) -> String {
    format!("{} quality", tag)
}

/// Non-blank, trimmed lines of a label file.
///
/// Bytes that are not valid UTF-8 decode to replacement characters, so a
/// corrupted line scores as a mismatch instead of failing the run.
pub fn read_labels(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(BenchError::MissingArtifact {
            label: "label file".to_string(),
            path: path.to_path_buf(),
        });
    }
    let raw = fs::read(path)?;
    Ok(String::from_utf8_lossy(&raw)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn compare_labels(ground_truth: &[String], predicted: &[String]) -> QualityScore {
    let pairs = ground_truth.iter().zip(predicted.iter());
    let total = ground_truth.len().min(predicted.len());
    let correct = pairs.filter(|(expected, actual)| expected == actual).count();
    QualityScore::new(correct, total)
}

/// Scores `predicted` against `ground_truth` and records the result under
/// `tag` in `quality`.
pub fn score(
    quality: &mut QualityMap,
    ground_truth: &Path,
    predicted: &Path,
    tag: &str,
) -> Result<QualityScore> {
    let labels = read_labels(ground_truth)?;
    let preds = read_labels(predicted)?;
    let result = compare_labels(&labels, &preds);
    info!(
        tag,
        correct = result.correct,
        total = result.total,
        "{}: {:.4} ({}/{} correct)",
        tag,
        result.accuracy,
        result.correct,
        result.total
    );
    quality.insert(quality_key(tag), result);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partial_match_scores_correct_over_total() {
        let result = compare_labels(&labels(&["0", "1", "2"]), &labels(&["0", "1", "3"]));
        assert_eq!(result.correct, 2);
        assert_eq!(result.total, 3);
        assert!((result.accuracy - 0.6667).abs() < 1e-4);
    }

    #[test]
    fn empty_predictions_yield_zero_accuracy() {
        let result = compare_labels(&labels(&["0", "1", "2"]), &[]);
        assert_eq!(result, QualityScore::new(0, 0));
        assert_eq!(result.accuracy, 0.0);
    }

    #[test]
    fn length_mismatch_is_scored_over_shorter_file() {
        let result = compare_labels(&labels(&["4", "4"]), &labels(&["4", "4", "9", "9"]));
        assert_eq!((result.correct, result.total), (2, 2));
        assert_eq!(result.accuracy, 1.0);
    }

    #[test]
    fn comparison_is_lexical() {
        let result = compare_labels(&labels(&["7", "1"]), &labels(&["07", "1"]));
        assert_eq!((result.correct, result.total), (1, 2));
    }

    #[test]
    fn score_reads_files_and_records_under_tag() {
        let tmp = tempfile::tempdir().expect("tmp");
        let truth = tmp.path().join("test_labels.txt");
        let preds = tmp.path().join("encrypted_model_predictions.txt");
        fs::write(&truth, "0\n1\n\n2\n").expect("write");
        fs::write(&preds, "  0 \n1\n3\n\n").expect("write");

        let mut quality = QualityMap::new();
        let result = score(&mut quality, &truth, &preds, "encrypted model").expect("score");
        assert_eq!((result.correct, result.total), (2, 3));
        assert_eq!(quality.get("encrypted model quality"), Some(&result));
    }

    #[test]
    fn invalid_utf8_line_scores_as_mismatch() {
        let tmp = tempfile::tempdir().expect("tmp");
        let truth = tmp.path().join("test_labels.txt");
        let preds = tmp.path().join("encrypted_model_predictions.txt");
        fs::write(&truth, "0\n1\n2\n").expect("write");
        fs::write(&preds, b"0\n\xFF\n2\n").expect("write");

        let mut quality = QualityMap::new();
        let result = score(&mut quality, &truth, &preds, "encrypted model").expect("score");
        assert_eq!((result.correct, result.total), (2, 3));
    }

    #[test]
    fn missing_prediction_file_names_the_path() {
        let tmp = tempfile::tempdir().expect("tmp");
        let truth = tmp.path().join("test_labels.txt");
        fs::write(&truth, "1\n").expect("write");
        let missing = tmp.path().join("harness_model_predictions.txt");
        let err = score(&mut QualityMap::new(), &truth, &missing, "harness model")
            .expect_err("missing predictions");
        assert!(err.to_string().contains("harness_model_predictions.txt"));
    }

    #[test]
    fn serialized_field_names_follow_report_format() {
        let value = serde_json::to_value(QualityScore::new(14, 15)).expect("json");
        assert_eq!(value["correct_predictions"], 14);
        assert_eq!(value["total_samples"], 15);
        assert!(value["accuracy"].as_f64().expect("accuracy") > 0.93);
    }
}
