//! MockView AI Backends
//!
//! Chat-completion backends consumed by the interview engine.
//!
//! This crate defines the [`ChatBackend`] contract the engine streams
//! questions from, an OpenAI-compatible HTTP implementation, and a
//! deterministic [`ScriptedBackend`] used for offline demos and tests.

mod openai;
mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub use openai::OpenAiBackend;
pub use scripted::{ScriptedBackend, ScriptedReply};

/// A specialized `Result` type for backend operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors reported by a chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    /// The provider could not be reached or returned a server error.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider rejected the request because of rate limiting.
    #[error("provider rate limited: {0}")]
    RateLimited(String),

    /// The provider did not answer in time.
    #[error("provider timed out: {0}")]
    Timeout(String),

    /// The provider rejected our credentials.
    #[error("provider authentication failed: {0}")]
    Authentication(String),

    /// The provider returned an error response.
    #[error("provider API error ({status}): {message}")]
    Api {
        /// HTTP status code (0 when the error arrived inside the stream).
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// The provider response could not be decoded.
    #[error("failed to parse provider response: {0}")]
    Parse(String),
}

impl LlmError {
    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions injected by the server.
    System,
    /// The interview candidate.
    User,
    /// The AI interviewer.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message with the given role.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Full conversation, system prompt first.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0-2.0).
    pub temperature: f32,
    /// Maximum tokens in the response (0 = provider default).
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Creates a request with default sampling parameters.
    #[must_use]
    pub const fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 0,
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Sets the response token limit.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Returns the system prompt, if the first message is one.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

/// Token stream events produced by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingToken {
    /// A fragment of the response.
    Token(String),
    /// The response finished normally.
    Complete,
    /// The stream failed; no further tokens follow.
    Error(LlmError),
}

/// Connection settings for an OpenAI-compatible provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSettings {
    /// Base URL of the API (without `/chat/completions`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Connect timeout for provider requests in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_tokens() -> u32 {
    800
}

const fn default_request_timeout() -> u64 {
    10
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// A chat-completion provider.
///
/// Implementations push tokens into a bounded channel from a background
/// task. Dropping the returned receiver is the abort signal: the task must
/// stop reading from the provider as soon as a send fails.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend name for logs (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Starts a streaming completion.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<mpsc::Receiver<StreamingToken>>;

    /// Runs a completion to the end and returns the full text.
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let mut rx = self.stream_chat(request).await?;
        let mut text = String::new();
        while let Some(token) = rx.recv().await {
            match token {
                StreamingToken::Token(t) => text.push_str(&t),
                StreamingToken::Complete => break,
                StreamingToken::Error(e) => return Err(e),
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
        let role: Role = serde_json::from_str(r#""user""#).unwrap();
        assert_eq!(role, Role::User);
    }

    #[test]
    fn chat_request_builder_clamps_temperature() {
        let request = ChatRequest::new(vec![ChatMessage::system("be brief"), ChatMessage::user("hi")])
            .with_temperature(5.0)
            .with_max_tokens(64);

        assert!((request.temperature - 2.0).abs() < f32::EPSILON);
        assert_eq!(request.max_tokens, 64);
        assert_eq!(request.system_prompt(), Some("be brief"));
    }

    #[test]
    fn system_prompt_absent_when_first_message_is_user() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        assert_eq!(request.system_prompt(), None);
    }

    #[test]
    fn transient_errors() {
        assert!(LlmError::RateLimited("slow down".into()).is_transient());
        assert!(LlmError::Timeout("30s".into()).is_transient());
        assert!(!LlmError::Authentication("bad key".into()).is_transient());
        assert!(!LlmError::Parse("garbage".into()).is_transient());
    }

    #[test]
    fn backend_settings_defaults_from_empty_json() {
        let settings: BackendSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, BackendSettings::default());
        assert_eq!(settings.api_key_env, "OPENAI_API_KEY");
    }
}
