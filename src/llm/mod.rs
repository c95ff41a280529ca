//! LLM integration module.
//!
//! Every provider is reached through [`ChatBackend`], a stateful chat
//! session with its own retry policy and token budgets. Two variants exist:
//! a Gemini-style backend that opens sessions server-side, and a
//! ChatGPT-style backend that keeps the system prompt locally.

mod api;
mod gemini;
mod openai;
mod session;

pub use api::{ChatApi, Message, Role, estimate_tokens};
pub use gemini::{GeminiApi, GeminiChat};
pub use openai::{GptChat, OpenAiApi};
pub use session::ChatSession;

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gemini,
    Gpt,
}

impl BackendKind {
    /// Human-readable provider name.
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Gemini => "Gemini",
            BackendKind::Gpt => "GPT",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Gemini => write!(f, "gemini"),
            BackendKind::Gpt => write!(f, "gpt"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(BackendKind::Gemini),
            "gpt" => Ok(BackendKind::Gpt),
            other => Err(format!("unknown backend '{}' (expected gemini or gpt)", other)),
        }
    }
}

/// Outcome of a model call.
///
/// A backend that gives up after its retries answers with [`Reply::Failed`]
/// instead of an error. Both variants serialize to the bare text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Message(String),
    Failed(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Message(text) | Reply::Failed(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Reply::Message(text) | Reply::Failed(text) => text,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Reply::Failed(_))
    }
}

/// A chat session with one LLM provider.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Session state: history and token counters.
    fn session(&self) -> &ChatSession;

    /// Start (or restart) the session with a system prompt.
    async fn start_session(&mut self, system_prompt: &str) -> Reply;

    /// Send a user message and return the assistant's reply.
    async fn send_message(&mut self, text: &str) -> Reply;

    /// Count the tokens `text` would cost on this backend.
    async fn count_tokens(&self, text: &str) -> usize;

    /// Reset the token count and restart from the original system prompt.
    async fn clear_history(&mut self);
}

/// Creates backends for a run.
pub trait BackendFactory: Send + Sync {
    fn create(&self, kind: BackendKind) -> Result<Box<dyn ChatBackend>>;
}

/// Builds backends that talk to the real provider APIs.
pub struct HttpBackendFactory {
    config: Config,
}

impl HttpBackendFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl BackendFactory for HttpBackendFactory {
    fn create(&self, kind: BackendKind) -> Result<Box<dyn ChatBackend>> {
        create_backend(kind, &self.config)
    }
}

/// Create a backend for `kind` from the configuration.
pub fn create_backend(kind: BackendKind, config: &Config) -> Result<Box<dyn ChatBackend>> {
    config.validate_for(kind)?;
    let provider = config.provider(kind).clone();

    Ok(match kind {
        BackendKind::Gemini => Box::new(GeminiChat::new(provider, &config.session, config.retry)?),
        BackendKind::Gpt => Box::new(GptChat::new(provider, &config.session, config.retry)?),
    })
}
