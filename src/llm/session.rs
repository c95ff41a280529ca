//! Chat session state and the request loop shared by the backends.

use super::api::{ChatApi, Message, estimate_tokens};
use super::{BackendKind, Reply};
use crate::config::{RetryConfig, SessionConfig};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Length of the token-rate window.
const MINUTE: Duration = Duration::from_secs(60);

/// Backoff growth when opening a session.
pub(crate) const START_BACKOFF_FACTOR: u32 = 3;

/// Backoff growth when sending a message.
pub(crate) const SEND_BACKOFF_FACTOR: u32 = 2;

/// History and token accounting for one chat session.
///
/// History only grows; the single exception is [`ChatSession::reset`],
/// which restarts the session from its system prompt.
#[derive(Debug, Clone)]
pub struct ChatSession {
    kind: BackendKind,
    history: Vec<Message>,
    tokens: usize,
    max_tokens: usize,
    tokens_per_minute: usize,
    tokens_this_minute: usize,
    last_request: Instant,
}

impl ChatSession {
    pub fn new(kind: BackendKind, config: &SessionConfig) -> Self {
        Self {
            kind,
            history: Vec::new(),
            tokens: 0,
            max_tokens: config.max_tokens,
            tokens_per_minute: config.tokens_per_minute,
            tokens_this_minute: 0,
            last_request: Instant::now(),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Cumulative tokens since the session was last (re)started.
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Ceiling after which callers are expected to clear the history.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn tokens_this_minute(&self) -> usize {
        self.tokens_this_minute
    }

    /// The prompt the session was started with, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.history.first().map(|m| m.content.as_str())
    }

    /// Drop every turn and the token count, keeping only a fresh system message.
    pub fn reset(&mut self, system_prompt: &str) {
        self.history = vec![Message::system(system_prompt)];
        self.tokens = 0;
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn add_tokens(&mut self, tokens: usize) {
        self.tokens += tokens;
    }

    pub fn record_minute_usage(&mut self, tokens: usize) {
        self.tokens_this_minute += tokens;
    }

    /// How long to wait before the next request, if the minute budget is spent.
    pub fn minute_wait(&self, now: Instant) -> Option<Duration> {
        if self.tokens_this_minute > self.tokens_per_minute {
            Some(MINUTE.saturating_sub(now.saturating_duration_since(self.last_request)))
        } else {
            None
        }
    }

    /// Wait out the rest of the minute window when the budget is exceeded.
    pub async fn throttle(&mut self) {
        if let Some(wait) = self.minute_wait(Instant::now()) {
            info!(
                backend = %self.kind,
                used = self.tokens_this_minute,
                budget = self.tokens_per_minute,
                wait_ms = wait.as_millis() as u64,
                "Token budget for this minute exceeded, waiting"
            );
            tokio::time::sleep(wait).await;
            self.tokens_this_minute = 0;
        }
        self.last_request = Instant::now();
    }
}

/// A session bound to a provider API and a retry policy.
///
/// Both backend variants delegate to this; they differ in how a session is
/// opened and how tokens are counted.
pub(crate) struct Conversation {
    api: Box<dyn ChatApi>,
    pub(crate) session: ChatSession,
    retry: RetryConfig,
}

impl Conversation {
    pub(crate) fn new(
        kind: BackendKind,
        api: Box<dyn ChatApi>,
        session: &SessionConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            api,
            session: ChatSession::new(kind, session),
            retry,
        }
    }

    /// Provider token count, falling back to a word-based estimate.
    pub(crate) async fn count_tokens(&self, text: &str) -> usize {
        match self.api.count_tokens(text).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(backend = %self.session.kind(), error = %e, "Token count failed, estimating");
                estimate_tokens(text)
            }
        }
    }

    /// Send the history (plus `user`, when given) and append the reply.
    ///
    /// Retries transport failures with `wait * factor^attempt` between
    /// attempts. Nothing is appended to the history unless a reply arrives.
    pub(crate) async fn round_trip(&mut self, user: Option<&str>, factor: u32) -> Reply {
        let mut messages = self.session.history().to_vec();
        if let Some(text) = user {
            messages.push(Message::user(text));
        }

        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            self.session.throttle().await;

            match self.api.chat(&messages).await {
                Ok(reply) => {
                    let sent = match user {
                        Some(text) => text.to_string(),
                        None => self.session.system_prompt().unwrap_or_default().to_string(),
                    };
                    let sent_tokens = self.count_tokens(&sent).await;
                    let reply_tokens = self.count_tokens(&reply).await;

                    if let Some(text) = user {
                        self.session.push(Message::user(text));
                    }
                    self.session.push(Message::assistant(reply.clone()));
                    self.session.add_tokens(sent_tokens + reply_tokens);
                    self.session.record_minute_usage(sent_tokens + reply_tokens);

                    debug!(
                        backend = %self.session.kind(),
                        attempt = attempt + 1,
                        tokens = self.session.tokens(),
                        "Received reply"
                    );
                    return Reply::Message(reply);
                }
                Err(e) => {
                    if attempt + 1 < attempts {
                        let backoff = self.retry.backoff(factor, attempt);
                        warn!(
                            backend = %self.session.kind(),
                            attempt = attempt + 1,
                            max = attempts,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying after backend error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = last_error.map(|e| e.to_string()).unwrap_or_default();
        warn!(backend = %self.session.kind(), error = %error, "Giving up after {} attempts", attempts);
        Reply::Failed(format!(
            "An error occurred while communicating with {}.\nError: {}",
            self.session.kind().display_name(),
            error
        ))
    }
}
