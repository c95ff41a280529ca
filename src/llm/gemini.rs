//! Gemini-style backend over the Generative Language REST API.
//!
//! Sessions are opened by sending the system prompt as the first turn and
//! keeping the model's answer in the history. Gemini only knows `user` and
//! `model` roles, so the system prompt travels as a user turn.

use super::api::{ChatApi, Message, Role};
use super::session::{Conversation, SEND_BACKOFF_FACTOR, START_BACKOFF_FACTOR};
use super::{BackendKind, ChatBackend, ChatSession, Reply};
use crate::config::{ProviderConfig, RetryConfig, SessionConfig};
use crate::error::{Result, SpecGenieError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tiktoken_rs::CoreBPE;
use tracing::warn;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountTokensResponse {
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Gemini REST client.
pub struct GeminiApi {
    client: Client,
    config: ProviderConfig,
    /// Local count used when `countTokens` fails.
    fallback: CoreBPE,
}

impl GeminiApi {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SpecGenieError::Http(format!("Failed to build HTTP client: {}", e)))?;
        let fallback = tiktoken_rs::cl100k_base()
            .map_err(|e| SpecGenieError::Config(format!("Failed to load tokenizer: {}", e)))?;
        Ok(Self {
            client,
            config,
            fallback,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/models/{}:{}", base, self.config.model, method)
    }

    fn contents(messages: &[Message]) -> Vec<Content<'_>> {
        messages
            .iter()
            .map(|m| Content {
                role: Some(match m.role {
                    Role::System | Role::User => "user",
                    Role::Assistant => "model",
                }),
                parts: vec![Part { text: &m.content }],
            })
            .collect()
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(&self, method: &str, body: &T) -> Result<R> {
        let response = self
            .client
            .post(self.endpoint(method))
            .query(&[("key", self.config.api_key.as_str())])
            .json(body)
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

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ChatApi for GeminiApi {
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        let request = GenerateRequest {
            contents: Self::contents(messages),
        };
        let response: GenerateResponse = self.post("generateContent", &request).await?;

        let content = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or_else(|| SpecGenieError::LlmApi("No candidates in response".to_string()))?;

        Ok(content
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    async fn count_tokens(&self, text: &str) -> Result<usize> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: None,
                parts: vec![Part { text }],
            }],
        };
        match self.post::<_, CountTokensResponse>("countTokens", &request).await {
            Ok(response) => Ok(response.total_tokens),
            Err(e) => {
                warn!(error = %e, "countTokens failed, counting locally");
                Ok(self.fallback.encode_with_special_tokens(text).len())
            }
        }
    }
}

/// Gemini-style backend.
pub struct GeminiChat {
    conversation: Conversation,
}

impl GeminiChat {
    /// Create a backend talking to the Gemini API.
    pub fn new(config: ProviderConfig, session: &SessionConfig, retry: RetryConfig) -> Result<Self> {
        Ok(Self::with_api(Box::new(GeminiApi::new(config)?), session, retry))
    }

    /// Create a backend over any chat API.
    pub fn with_api(api: Box<dyn ChatApi>, session: &SessionConfig, retry: RetryConfig) -> Self {
        Self {
            conversation: Conversation::new(BackendKind::Gemini, api, session, retry),
        }
    }
}

#[async_trait]
impl ChatBackend for GeminiChat {
    fn session(&self) -> &ChatSession {
        &self.conversation.session
    }

    async fn start_session(&mut self, system_prompt: &str) -> Reply {
        self.conversation.session.reset(system_prompt);
        self.conversation.round_trip(None, START_BACKOFF_FACTOR).await
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
        let reply = self.start_session(&prompt).await;
        if reply.is_failed() {
            warn!(reply = reply.text(), "Gemini session restart failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedApi {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChatApi for ScriptedApi {
        async fn chat(&self, _messages: &[Message]) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(SpecGenieError::LlmApi("503 Service Unavailable".to_string()));
            }
            Ok("Understood.".to_string())
        }

        async fn count_tokens(&self, _text: &str) -> Result<usize> {
            Err(SpecGenieError::Http("count endpoint down".to_string()))
        }
    }

    fn backend(failures: usize) -> (GeminiChat, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let api = ScriptedApi {
            failures,
            calls: calls.clone(),
        };
        let chat = GeminiChat::with_api(
            Box::new(api),
            &SessionConfig::default(),
            RetryConfig::default(),
        );
        (chat, calls)
    }

    #[test]
    fn test_contents_map_roles() {
        let messages = vec![
            Message::system("be brief"),
            Message::assistant("ok"),
            Message::user("Acme 42"),
        ];
        let json = serde_json::to_value(GenerateRequest {
            contents: GeminiApi::contents(&messages),
        })
        .unwrap();

        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][0]["text"], "Acme 42");
    }

    #[test]
    fn test_endpoint_construction() {
        let api = GeminiApi::new(ProviderConfig {
            api_base: "https://example.com/v1beta/".to_string(),
            api_key: "k".to_string(),
            model: "gemini-pro".to_string(),
        })
        .unwrap();
        assert_eq!(
            api.endpoint("generateContent"),
            "https://example.com/v1beta/models/gemini-pro:generateContent"
        );
    }

    #[tokio::test]
    async fn test_count_tokens_falls_back_to_local_encoding() {
        let api = GeminiApi::new(ProviderConfig {
            api_base: "http://127.0.0.1:9/v1beta".to_string(),
            api_key: "k".to_string(),
            model: "gemini-pro".to_string(),
        })
        .unwrap();

        let tokens = api.count_tokens("Output voltage: 5V").await.unwrap();

        assert_eq!(tokens, api.fallback.encode_with_special_tokens("Output voltage: 5V").len());
        assert!(tokens > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_session_sends_prompt_with_retries() {
        let (mut chat, calls) = backend(1);

        let reply = chat.start_session("You write spec sheets.").await;

        assert_eq!(reply, Reply::Message("Understood.".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(chat.session().history().len(), 2);
        // Token counting fell back to the word estimate: 4 words + 1 word.
        assert_eq!(chat.session().tokens(), 5 + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_session_reports_failure_after_attempts() {
        let (mut chat, calls) = backend(10);

        let reply = chat.start_session("prompt").await;

        assert!(reply.is_failed());
        assert!(reply.text().starts_with("An error occurred while communicating with Gemini."));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_clear_history_restarts_session() {
        let (mut chat, _) = backend(0);
        chat.start_session("prompt").await;
        chat.send_message("Acme 42").await;
        assert_eq!(chat.session().history().len(), 4);

        chat.clear_history().await;

        let history = chat.session().history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Message::system("prompt"));
    }
}
