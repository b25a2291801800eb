//! Error types for the MockView interview engine.
//!
//! Errors are grouped the way the engine reacts to them: policy rejections
//! (never retried, terminal for the turn), transient upstream failures
//! (retryable by the client), and data errors (fatal for the turn). Every
//! variant maps to a stable [`ErrorCode`] that clients key their behaviour on.

use std::path::PathBuf;

use mockview_llm::LlmError;
use uuid::Uuid;

use crate::session::SessionStatus;
use crate::wire::ErrorCode;

/// A specialized `Result` type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while serving interview sessions.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your mockview.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// An enrichment data file could not be loaded.
    #[error("Failed to load data file '{path}': {message}")]
    DataFileError {
        /// Path to the data file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// The request carried no valid caller identity.
    #[error("Authentication required or expired")]
    Unauthenticated,

    /// The caller exceeded the turn rate limit.
    #[error("Too many requests; retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the caller may retry.
        retry_after_secs: u64,
    },

    /// The request body failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ========================================================================
    // Policy Rejections
    // ========================================================================
    /// The tier's session quota is exhausted.
    #[error("Monthly session quota of {limit} reached for this tier")]
    QuotaExceeded {
        /// The monthly limit that was hit.
        limit: u32,
    },

    /// The session is not in progress.
    #[error("Session {session_id} is not in progress (status: {status})")]
    SessionNotActive {
        /// The session.
        session_id: Uuid,
        /// Its current status.
        status: SessionStatus,
    },

    // ========================================================================
    // Data Errors
    // ========================================================================
    /// No session with this id.
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// No question with this id.
    #[error("Question not found: {0}")]
    QuestionNotFound(Uuid),

    /// The session belongs to someone else.
    #[error("Session {0} belongs to another user")]
    Forbidden(Uuid),

    /// The caller has no candidate profile.
    #[error("No candidate profile for user '{0}'")]
    ProfileNotFound(String),

    /// The transcript is behind the stored session.
    #[error("Transcript is stale: question {order_index} was already answered")]
    StaleTranscript {
        /// Position the transcript would overwrite.
        order_index: u32,
    },

    /// The question has no answer to evaluate.
    #[error("Question {0} has no answer to evaluate")]
    NotAnswered(Uuid),

    // ========================================================================
    // Upstream Errors
    // ========================================================================
    /// The AI provider failed.
    #[error("AI provider error: {0}")]
    Upstream(#[from] LlmError),

    /// The AI call exceeded its wall-clock budget.
    #[error("AI response timed out after {timeout_secs}s")]
    Timeout {
        /// The configured budget.
        timeout_secs: u64,
    },

    /// The AI reply could not be interpreted.
    #[error("Unusable AI reply: {0}")]
    MalformedReply(String),

    // ========================================================================
    // Infrastructure Errors
    // ========================================================================
    /// The session store failed.
    #[error("Session store error: {0}")]
    Store(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `DataFileError`.
    #[must_use]
    pub fn data_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DataFileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Creates a new `Store` error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Returns the stable wire code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::AuthExpired,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::QuotaExceeded { .. } => ErrorCode::QuotaExceeded,
            Self::SessionNotActive { .. } => ErrorCode::SessionNotActive,
            Self::SessionNotFound(_) => ErrorCode::SessionNotFound,
            Self::QuestionNotFound(_) => ErrorCode::QuestionNotFound,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::ProfileNotFound(_) => ErrorCode::ProfileNotFound,
            Self::StaleTranscript { .. } => ErrorCode::StaleTranscript,
            Self::NotAnswered(_) => ErrorCode::NotAnswered,
            Self::Upstream(e) => upstream_code(e),
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::MalformedReply(_) => ErrorCode::StreamError,
            Self::ConfigParseError { .. }
            | Self::ConfigValidationError { .. }
            | Self::DataFileError { .. }
            | Self::Store(_)
            | Self::Io(_)
            | Self::Json(_) => ErrorCode::Internal,
        }
    }

    /// Returns `true` if this error is transient and the turn may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Upstream(e) => e.is_transient(),
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this error is a policy decision rather than a failure.
    #[must_use]
    pub const fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. } | Self::SessionNotActive { .. }
        )
    }
}

/// Maps a provider failure onto the wire vocabulary.
#[must_use]
pub const fn upstream_code(error: &LlmError) -> ErrorCode {
    match error {
        LlmError::Unavailable(_) => ErrorCode::UpstreamUnavailable,
        LlmError::RateLimited(_) => ErrorCode::UpstreamRateLimited,
        LlmError::Timeout(_) => ErrorCode::Timeout,
        LlmError::Authentication(_) | LlmError::Api { .. } | LlmError::Parse(_) => {
            ErrorCode::StreamError
        }
    }
}
