//! Wire-level chat API seam shared by every backend.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A stateless chat endpoint: takes the whole history, returns the next reply.
///
/// Sessions, retries and token budgets live above this trait, so one
/// implementation per provider only has to speak the provider's protocol.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send the conversation and return the assistant's reply text.
    async fn chat(&self, messages: &[Message]) -> Result<String>;

    /// Count the tokens `text` costs on this provider.
    async fn count_tokens(&self, text: &str) -> Result<usize>;
}

/// Estimate token count from text (rough approximation: words / 0.75).
pub fn estimate_tokens(text: &str) -> usize {
    let word_count = text.split_whitespace().count();
    (word_count as f64 / 0.75) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let sys = Message::system("You are helpful.");
        let user = Message::user("Hello!");
        let assistant = Message::assistant("Hi there!");

        assert_eq!(sys.role, Role::System);
        assert_eq!(user.role, Role::User);
        assert_eq!(assistant.role, Role::Assistant);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }

    #[test]
    fn test_estimate_tokens() {
        let tokens = estimate_tokens("one two three four five six");
        assert_eq!(tokens, 8);
        assert_eq!(estimate_tokens(""), 0);
    }
}
