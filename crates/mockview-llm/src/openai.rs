//! OpenAI-compatible chat backend.
//!
//! Talks to any provider exposing `POST {base}/chat/completions` with
//! server-sent-event streaming (`stream: true`). Each `data:` line carries a
//! JSON chunk whose `choices[0].delta.content` is the next fragment; the
//! stream ends with `data: [DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::{BackendSettings, ChatBackend, ChatRequest, LlmError, Result, StreamingToken};

/// Capacity of the token channel handed to the engine.
const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// Chat backend for OpenAI-compatible HTTP APIs.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    settings: BackendSettings,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Creates a backend with an explicit API key.
    pub fn new(settings: BackendSettings, api_key: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            settings,
            api_key,
            http_client,
        })
    }

    /// Creates a backend reading the API key from the configured environment variable.
    pub fn from_settings(settings: BackendSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).ok();
        if api_key.is_none() {
            warn!(
                env = %settings.api_key_env,
                "API key variable not set; requests will be sent without credentials"
            );
        }
        Self::new(settings, api_key)
    }

    /// Returns the settings this backend was built with.
    #[must_use]
    pub const fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": stream,
        });
        let max_tokens = if request.max_tokens > 0 {
            request.max_tokens
        } else {
            self.settings.max_tokens
        };
        if max_tokens > 0 {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip_all, fields(model = %self.settings.model, messages = request.messages.len()))]
    async fn stream_chat(&self, request: &ChatRequest) -> Result<mpsc::Receiver<StreamingToken>> {
        let mut builder = self
            .http_client
            .post(self.completions_url())
            .json(&self.request_body(request, true));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(transport_error(e))).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let token = match parse_data_line(&line) {
                        DataLine::Delta(text) => StreamingToken::Token(text),
                        DataLine::Done => {
                            let _ = tx.send(StreamingToken::Complete).await;
                            return;
                        }
                        DataLine::Failed(message) => {
                            let _ = tx
                                .send(StreamingToken::Error(LlmError::Api { status: 0, message }))
                                .await;
                            return;
                        }
                        DataLine::Skip => continue,
                    };
                    if tx.send(token).await.is_err() {
                        // Receiver dropped: dropping `stream` closes the connection.
                        debug!("token receiver dropped, aborting provider stream");
                        return;
                    }
                }
            }

            // Some providers close the connection without a [DONE] line.
            let _ = tx.send(StreamingToken::Complete).await;
        });

        Ok(rx)
    }
}

/// One decoded line of the provider's event stream.
#[derive(Debug, PartialEq, Eq)]
enum DataLine {
    Delta(String),
    Done,
    Failed(String),
    Skip,
}

fn parse_data_line(line: &str) -> DataLine {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return DataLine::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return DataLine::Done;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
        debug!(line = %data, "ignoring undecodable stream line");
        return DataLine::Skip;
    };

    if let Some(message) = value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
    {
        return DataLine::Failed(message.to_string());
    }

    value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map_or(DataLine::Skip, |c| DataLine::Delta(c.to_string()))
}

fn classify_status(status: u16, body: &str) -> LlmError {
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        body.chars().take(500).collect()
    };
    match status {
        401 | 403 => LlmError::Authentication(message),
        408 => LlmError::Timeout(message),
        429 => LlmError::RateLimited(message),
        500..=599 => LlmError::Unavailable(message),
        _ => LlmError::Api { status, message },
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(e.to_string())
    } else {
        LlmError::Unavailable(e.to_string())
    }
}
