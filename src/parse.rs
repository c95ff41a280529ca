//! Pulling JSON out of free-form model replies.

use crate::error::{Result, SpecGenieError};
use serde_json::{Map, Value};

/// A JSON object produced by a model.
pub type JsonObject = Map<String, Value>;

/// Return the span from the first `{` to the last `}`, inclusive.
///
/// The text is returned unchanged when either brace is missing or the last
/// `}` comes before the first `{`. The result is not guaranteed to parse.
pub fn extract_json(text: &str) -> &str {
    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return &text[start..=end];
            }
        }
    }
    text
}

/// Extract and parse a JSON object from a model reply.
pub fn parse_sheet(text: &str) -> Result<JsonObject> {
    let json_str = extract_json(text);
    match serde_json::from_str::<Value>(json_str)? {
        Value::Object(map) => Ok(map),
        other => Err(SpecGenieError::LlmParse(format!(
            "expected a JSON object, got {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
