//! ChatGPT-style backend over the OpenAI chat completions API.
//!
//! The API is stateless, so the whole history is sent with every message.
//! Opening a session makes no request: the system prompt is recorded and
//! counted locally.

use super::api::{ChatApi, Message};
use super::session::{Conversation, SEND_BACKOFF_FACTOR};
use super::{BackendKind, ChatBackend, ChatSession, Reply};
use crate::config::{ProviderConfig, RetryConfig, SessionConfig};
use crate::error::{Result, SpecGenieError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Request body for chat completion.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

/// Response from chat completion.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiApi {
    client: Client,
    config: ProviderConfig,
    bpe: CoreBPE,
}

impl OpenAiApi {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| SpecGenieError::Http(format!("Failed to build HTTP client: {}", e)))?;

        // Unknown models fall back to the newest encoding.
        let bpe = tiktoken_rs::get_bpe_from_model(&config.model)
            .or_else(|_| tiktoken_rs::o200k_base())
            .map_err(|e| SpecGenieError::Config(format!("Failed to load tokenizer: {}", e)))?;

        Ok(Self {
            client,
            config,
            bpe,
        })
    }

    /// Get the API endpoint URL.
    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/chat/completions", base)
    }
}

#[async_trait]
impl ChatApi for OpenAiApi {
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(SpecGenieError::LlmApi(format!(
                    "API error ({}): {}",
                    status, api_error.error.message
                )));
            }
            return Err(SpecGenieError::LlmApi(format!(
                "Request failed ({}): {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = serde_json::from_str(&body)?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SpecGenieError::LlmApi("No choices in response".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }
}

/// ChatGPT-style backend.
pub struct GptChat {
    conversation: Conversation,
}

impl GptChat {
    /// Create a backend talking to the OpenAI API.
    pub fn new(config: ProviderConfig, session: &SessionConfig, retry: RetryConfig) -> Result<Self> {
        Ok(Self::with_api(Box::new(OpenAiApi::new(config)?), session, retry))
    }

    /// Create a backend over any chat API.
    pub fn with_api(api: Box<dyn ChatApi>, session: &SessionConfig, retry: RetryConfig) -> Self {
        Self {
            conversation: Conversation::new(BackendKind::Gpt, api, session, retry),
        }
    }
}

#[async_trait]
impl ChatBackend for GptChat {
    fn session(&self) -> &ChatSession {
        &self.conversation.session
    }

    async fn start_session(&mut self, system_prompt: &str) -> Reply {
        self.conversation.session.reset(system_prompt);
        let tokens = self.conversation.count_tokens(system_prompt).await;
        self.conversation.session.add_tokens(tokens);
        debug!(tokens, "Started GPT session");
        Reply::Message(String::new())
    }

    async fn send_message(&mut self, text: &str) -> Reply {
        self.conversation.round_trip(Some(text), SEND_BACKOFF_FACTOR).await
    }

    async fn count_tokens(&self, text: &str) -> usize {
        self.conversation.count_tokens(text).await
    }

    async fn clear_history(&mut self) {
        let Some(prompt) = self.conversation.session.system_prompt().map(str::to_string) else {
            return;
        };
        self.start_session(&prompt).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::api::Role;

    struct CannedApi;

    #[async_trait]
    impl ChatApi for CannedApi {
        async fn chat(&self, messages: &[Message]) -> Result<String> {
            Ok(format!("reply #{}", messages.len()))
        }

        async fn count_tokens(&self, text: &str) -> Result<usize> {
            Ok(text.len())
        }
    }

    fn backend() -> GptChat {
        GptChat::with_api(
            Box::new(CannedApi),
            &SessionConfig::default(),
            RetryConfig::default(),
        )
    }

    #[test]
    fn test_endpoint_construction() {
        let config = ProviderConfig {
            api_base: "https://api.example.com/".to_string(),
            api_key: "test".to_string(),
            model: "gpt-4o".to_string(),
        };
        let api = OpenAiApi::new(config).unwrap();
        assert_eq!(api.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_start_session_is_local() {
        let mut chat = backend();

        let reply = chat.start_session("prompt").await;

        assert_eq!(reply, Reply::Message(String::new()));
        assert_eq!(chat.session().history(), &[Message::system("prompt")]);
        assert_eq!(chat.session().tokens(), 6);
    }

    #[tokio::test]
    async fn test_send_message_appends_turns() {
        let mut chat = backend();
        chat.start_session("prompt").await;

        let reply = chat.send_message("Acme 42").await;

        assert_eq!(reply.text(), "reply #2");
        let roles: Vec<Role> = chat.session().history().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_clear_history_restarts_from_system_prompt() {
        let mut chat = backend();
        chat.start_session("prompt").await;
        chat.send_message("first").await;
        chat.send_message("second").await;

        chat.clear_history().await;

        assert_eq!(chat.session().history(), &[Message::system("prompt")]);
        assert_eq!(chat.session().tokens(), 6);
    }
}
