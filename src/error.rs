//! Error types for specgenie.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, SpecGenieError>;

/// Errors that can occur while generating or evaluating spec sheets.
#[derive(Error, Debug)]
pub enum SpecGenieError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A category, prompt or product row does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// LLM API error.
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// LLM response parsing error.
    #[error("Failed to parse LLM response: {0}")]
    LlmParse(String),

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The generated sheet and the ground truth have no attribute in common.
    #[error("No attributes shared between generated sheet and ground truth for '{0}'")]
    NoSharedAttributes(String),

    /// Web search ran out of results without producing a usable context.
    #[error("No usable search context for '{query}' after {pages} page(s)")]
    ContextExhausted { query: String, pages: usize },
}

impl SpecGenieError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is a missing catalog row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for SpecGenieError {
    fn from(err: reqwest::Error) -> Self {
        SpecGenieError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for SpecGenieError {
    fn from(err: serde_json::Error) -> Self {
        SpecGenieError::LlmParse(err.to_string())
    }
}
