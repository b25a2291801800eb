//! Wire protocol shared by the turn endpoint and its consumers.
//!
//! A turn response is a server-sent-event stream. Every frame is a
//! `data: ` line holding one JSON object, and the stream is terminated by a
//! literal `data: [DONE]` line.
//!
//! # Event Shapes
//!
//! - `{"answeredQuestionId": "<uuid>"}` - the previous answer was just persisted
//! - `{"isFollowUp": bool}` - classification of the new question
//! - `{"progress": {"current": n, "total": m}}` - question progress (`total` omitted when unlimited)
//! - `{"content": "..."}` - incremental question text
//! - `{"error": "...", "code": "..."}` - terminal failure of the turn

use mockview_llm::ChatMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of the terminating frame.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Stable error identifiers surfaced to clients.
///
/// The client's retry policy is keyed off these values, so they are part of
/// the protocol contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The AI call exceeded its wall-clock budget.
    Timeout,
    /// The AI provider could not be reached.
    UpstreamUnavailable,
    /// The AI provider rate limited us.
    UpstreamRateLimited,
    /// Any other failure while streaming.
    StreamError,
    /// Caller identity is missing or expired.
    AuthExpired,
    /// Session quota for the tier is exhausted.
    QuotaExceeded,
    /// The session has ended; no further questions.
    SessionEnded,
    /// Malformed request.
    InvalidRequest,
    /// The caller does not own the resource.
    Forbidden,
    /// No such session.
    SessionNotFound,
    /// No such question.
    QuestionNotFound,
    /// The caller has no candidate profile.
    ProfileNotFound,
    /// The session is not in progress.
    SessionNotActive,
    /// The supplied transcript is behind the stored session.
    StaleTranscript,
    /// The question has no answer to evaluate.
    NotAnswered,
    /// The caller sent too many turns.
    RateLimited,
    /// Unexpected server failure.
    Internal,
    /// A code this build does not know.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Returns the wire identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamRateLimited => "upstream_rate_limited",
            Self::StreamError => "stream_error",
            Self::AuthExpired => "auth_expired",
            Self::QuotaExceeded => "quota_exceeded",
            Self::SessionEnded => "session_ended",
            Self::InvalidRequest => "invalid_request",
            Self::Forbidden => "forbidden",
            Self::SessionNotFound => "session_not_found",
            Self::QuestionNotFound => "question_not_found",
            Self::ProfileNotFound => "profile_not_found",
            Self::SessionNotActive => "session_not_active",
            Self::StaleTranscript => "stale_transcript",
            Self::NotAnswered => "not_answered",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Question progress within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// 1-based number of the current main question.
    pub current: u32,
    /// Question limit, absent when unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
}

/// One event of a turn stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEvent {
    /// The user's previous answer was persisted on this question.
    AnsweredQuestion {
        /// Identifier the evaluator uses to grade the answer.
        #[serde(rename = "answeredQuestionId")]
        answered_question_id: Uuid,
    },
    /// Classification of the question being streamed.
    Classification {
        /// `true` for a follow-up, `false` for a new main question.
        #[serde(rename = "isFollowUp")]
        is_follow_up: bool,
    },
    /// Question progress.
    Progress {
        /// Current position and limit.
        progress: Progress,
    },
    /// Incremental question text.
    Content {
        /// Text fragment.
        content: String,
    },
    /// Terminal failure of the turn.
    Error {
        /// Human-readable description.
        error: String,
        /// Stable identifier.
        code: ErrorCode,
    },
}

impl WireEvent {
    /// Creates a `Content` event.
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            content: text.into(),
        }
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
            code,
        }
    }

    /// Returns `true` for the terminal error event.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Body of `POST /api/interview/stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Session the turn belongs to.
    pub session_id: Uuid,
    /// Full visible transcript so far.
    pub messages: Vec<ChatMessage>,
}

/// JSON body of a non-streamed failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Description of the error.
    pub error: String,
    /// Stable identifier.
    pub code: ErrorCode,
}
