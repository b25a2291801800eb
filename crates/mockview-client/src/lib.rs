//! MockView Stream Client
//!
//! Consumes interview turn streams: decodes server-sent events, keeps the
//! visible transcript as a reducer over [`ClientEvent`], retries failed
//! turns with exponential backoff, and grades answers in the background.

pub mod driver;
pub mod evaluation;
pub mod retry;
pub mod sse;
pub mod transcript;

pub use driver::{InterviewClient, TurnOutcome};
pub use evaluation::{EvaluationBook, EvaluationState};
pub use retry::RetryPolicy;
pub use sse::{SseDecoder, SseFrame};
pub use transcript::{ClientEvent, Effect, Transcript, TranscriptMessage};

use mockview_engine::ErrorCode;
use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the stream client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The server could not be reached or the stream broke off.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A `data:` line did not hold a valid event.
    #[error("Malformed stream frame: {0}")]
    Decode(String),

    /// The server rejected the request or failed the turn.
    #[error("{message} ({code})")]
    Server {
        /// Stable error identifier.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },

    /// The client was used out of order.
    #[error("Invalid client state: {0}")]
    State(String),
}

impl ClientError {
    /// Wire code this failure is reported under.
    ///
    /// Transport and decode failures count as `upstream_unavailable` so the
    /// retry policy treats them like a provider outage.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) | Self::Decode(_) => ErrorCode::UpstreamUnavailable,
            Self::Server { code, .. } => *code,
            Self::State(_) => ErrorCode::Internal,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
