//! Records flowing through an evaluation run.

use crate::llm::Reply;
use crate::parse::JsonObject;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Curated attribute values for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl GroundTruthRecord {
    /// Flat mapping: `name`, every attribute, and `description`.
    pub fn to_mapping(&self) -> JsonObject {
        let mut map = JsonObject::new();
        map.insert("name".to_string(), Value::String(self.name.clone()));
        for (key, value) in &self.attributes {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        map.insert(
            "description".to_string(),
            Value::String(self.description.clone()),
        );
        map
    }
}

/// Aggregate fuzzy-similarity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Incorrect,
    #[serde(rename = "Inconsistencies found")]
    InconsistenciesFound,
    Correct,
}

impl Verdict {
    /// Classify an averaged ratio: below 50 is incorrect, below 80 inconsistent.
    pub fn classify(score: f64) -> Self {
        if score < 50.0 {
            Verdict::Incorrect
        } else if score < 80.0 {
            Verdict::InconsistenciesFound
        } else {
            Verdict::Correct
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Incorrect => "Incorrect",
            Verdict::InconsistenciesFound => "Inconsistencies found",
            Verdict::Correct => "Correct",
        };
        f.write_str(label)
    }
}

/// Fuzzy-similarity score; both fields are null on degraded rows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimilarityVerdict {
    pub verdict: Option<Verdict>,
    pub score: Option<f64>,
}

impl SimilarityVerdict {
    pub fn scored(score: f64) -> Self {
        Self {
            verdict: Some(Verdict::classify(score)),
            score: Some(score),
        }
    }
}

/// The judge model's opinion of a generated sheet.
///
/// `verdict` and `reasoning` hold the judge's fields when they are strings.
/// Every other field, including a non-string `verdict` or `reasoning`, is
/// kept as returned in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(from = "JsonObject")]
pub struct JudgeVerdict {
    pub verdict: Option<String>,
    pub reasoning: Option<String>,
    pub extra: JsonObject,
}

fn take_string(object: &mut JsonObject, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(text)) => Some(text),
        Some(other) => {
            object.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

impl From<JsonObject> for JudgeVerdict {
    fn from(mut object: JsonObject) -> Self {
        let verdict = take_string(&mut object, "verdict");
        let reasoning = take_string(&mut object, "reasoning");
        Self {
            verdict,
            reasoning,
            extra: object,
        }
    }
}

impl Serialize for JudgeVerdict {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.extra.contains_key("verdict") {
            map.serialize_entry("verdict", &self.verdict)?;
        }
        if !self.extra.contains_key("reasoning") {
            map.serialize_entry("reasoning", &self.reasoning)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl JudgeVerdict {
    /// Verdict for a reply that did not parse: the raw text becomes the reasoning.
    pub fn unparsed(raw: impl Into<String>) -> Self {
        Self {
            verdict: None,
            reasoning: Some(raw.into()),
            extra: JsonObject::new(),
        }
    }
}

/// A generated sheet, or the raw reply when it could not be parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SheetOutput {
    Sheet(JsonObject),
    Raw(Reply),
}

impl SheetOutput {
    pub fn as_sheet(&self) -> Option<&JsonObject> {
        match self {
            SheetOutput::Sheet(sheet) => Some(sheet),
            SheetOutput::Raw(_) => None,
        }
    }
}

/// One evaluated product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    #[serde(rename = "Spec Sheet")]
    pub spec_sheet: SheetOutput,
    #[serde(rename = "Ground Truth")]
    pub ground_truth: JsonObject,
    #[serde(rename = "Similarity Score")]
    pub similarity_score: SimilarityVerdict,
    #[serde(rename = "LLM Evaluation")]
    pub llm_evaluation: JudgeVerdict,
}

impl EvaluationRecord {
    /// Row for output that could not be scored: both verdicts are null.
    pub fn degraded(spec_sheet: SheetOutput, ground_truth: &GroundTruthRecord) -> Self {
        Self {
            spec_sheet,
            ground_truth: ground_truth.to_mapping(),
            similarity_score: SimilarityVerdict::default(),
            llm_evaluation: JudgeVerdict::default(),
        }
    }
}
