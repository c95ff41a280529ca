//! Scoring generated spec sheets against ground truth.
//!
//! Two independent signals are produced for each sheet:
//! 1. A fuzzy string similarity averaged over the attributes both records
//!    share, classified into a [`Verdict`]
//! 2. A judge model's verdict on the same pair of records

use crate::error::{Result, SpecGenieError};
use crate::llm::ChatBackend;
use crate::parse::{JsonObject, extract_json};
use crate::record::{EvaluationRecord, GroundTruthRecord, JudgeVerdict, SheetOutput, SimilarityVerdict};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use tracing::{debug, warn};

/// Field left out of every comparison.
const DESCRIPTION: &str = "description";

/// Indel similarity of two strings on a 0–100 scale: `2 * M / (len_a + len_b)`
/// where `M` is the number of characters in their longest common subsequence.
///
/// Halves round to even.
pub fn fuzzy_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 100.0;
    }

    let diff = TextDiff::from_chars(a, b);
    let matches = diff
        .iter_all_changes()
        .filter(|change| change.tag() == ChangeTag::Equal)
        .count();

    (200.0 * matches as f64 / total as f64).round_ties_even()
}

/// Text used to compare a generated value; non-strings compare as JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Average fuzzy ratio over the keys both mappings share, except `description`.
pub fn similarity(generated: &JsonObject, ground_truth: &JsonObject) -> Result<SimilarityVerdict> {
    let ratios: Vec<f64> = ground_truth
        .iter()
        .filter(|(key, _)| key.as_str() != DESCRIPTION)
        .filter_map(|(key, truth)| {
            generated
                .get(key)
                .map(|value| fuzzy_ratio(&value_text(value), &value_text(truth)))
        })
        .collect();

    if ratios.is_empty() {
        let name = ground_truth
            .get("name")
            .map(value_text)
            .unwrap_or_default();
        return Err(SpecGenieError::NoSharedAttributes(name));
    }

    let average = ratios.iter().sum::<f64>() / ratios.len() as f64;
    Ok(SimilarityVerdict::scored(average))
}

fn without_description(map: &JsonObject) -> JsonObject {
    map.iter()
        .filter(|(key, _)| key.as_str() != DESCRIPTION)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Parse the judge's reply, keeping the raw text when it is not a JSON object.
pub fn parse_judge_reply(reply: &str) -> JudgeVerdict {
    match serde_json::from_str::<Value>(extract_json(reply)) {
        Ok(Value::Object(object)) => JudgeVerdict::from(object),
        Ok(_) => {
            debug!("Judge reply is JSON but not an object");
            JudgeVerdict::unparsed(reply)
        }
        Err(e) => {
            debug!(error = %e, "Judge reply is not JSON");
            JudgeVerdict::unparsed(reply)
        }
    }
}

/// Scores sheets and asks a judge model for a second opinion.
pub struct Evaluator<'a> {
    judge: &'a mut dyn ChatBackend,
}

impl<'a> Evaluator<'a> {
    /// Evaluator using `judge`, whose session must already be started.
    pub fn new(judge: &'a mut dyn ChatBackend) -> Self {
        Self { judge }
    }

    /// Score `generated` against `ground_truth`.
    ///
    /// Fails with `NoSharedAttributes` when the records have no attribute
    /// in common; the judge is not consulted in that case.
    pub async fn evaluate(
        &mut self,
        generated: JsonObject,
        ground_truth: &GroundTruthRecord,
    ) -> Result<EvaluationRecord> {
        let truth = ground_truth.to_mapping();
        let similarity_score = similarity(&generated, &truth)?;

        let message = format!(
            "{}\n{}",
            Value::Object(without_description(&truth)),
            Value::Object(without_description(&generated))
        );
        let reply = self.judge.send_message(&message).await;
        if reply.is_failed() {
            warn!(product = %ground_truth.name, "Judge backend failed");
        }
        let llm_evaluation = parse_judge_reply(reply.text());

        Ok(EvaluationRecord {
            spec_sheet: SheetOutput::Sheet(generated),
            ground_truth: truth,
            similarity_score,
            llm_evaluation,
        })
    }
}
