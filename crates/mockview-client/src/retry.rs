//! Turn retry policy.

use std::time::Duration;

use mockview_engine::ErrorCode;
use serde::{Deserialize, Serialize};

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

fn default_retryable_codes() -> Vec<ErrorCode> {
    vec![
        ErrorCode::Timeout,
        ErrorCode::UpstreamUnavailable,
        ErrorCode::UpstreamRateLimited,
        ErrorCode::StreamError,
    ]
}

/// When and how often a failed turn is retried.
///
/// `maxAttempts` counts retries after the first try; the delay before retry
/// `n` is `baseDelayMs * 2^(n-1)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries allowed per turn.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Error codes that trigger a retry.
    #[serde(default = "default_retryable_codes")]
    pub retryable_codes: Vec<ErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            retryable_codes: default_retryable_codes(),
        }
    }
}

impl RetryPolicy {
    /// Returns `true` if `code` may be retried at all.
    ///
    /// Policy rejections are never retried, whatever the configured list says.
    #[must_use]
    pub fn is_retryable(&self, code: ErrorCode) -> bool {
        !matches!(
            code,
            ErrorCode::AuthExpired | ErrorCode::QuotaExceeded | ErrorCode::SessionEnded
        ) && self.retryable_codes.contains(&code)
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Decides whether to retry after `failed` consecutive failures.
    ///
    /// Returns the delay to wait, or `None` to give up.
    #[must_use]
    pub fn next_retry(&self, code: ErrorCode, failed: u32) -> Option<Duration> {
        (failed <= self.max_attempts && failed > 0 && self.is_retryable(code))
            .then(|| self.delay(failed))
    }
}
