//! Caller identity and turn rate limiting.
//!
//! Authentication itself happens upstream; the auth layer forwards the
//! verified user id and subscription tier as request headers.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use crate::api::ApiError;
use crate::error::{EngineError, Result};
use crate::policy::Tier;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's subscription tier.
pub const USER_TIER_HEADER: &str = "x-user-tier";

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// User id.
    pub user_id: String,
    /// Tier snapshot for this request.
    pub tier: Tier,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER).ok_or(EngineError::Unauthenticated)?;
        let tier = header(USER_TIER_HEADER)
            .and_then(Tier::from_str_case_insensitive)
            .ok_or(EngineError::Unauthenticated)?;

        Ok(Self {
            user_id: user_id.to_string(),
            tier,
        })
    }
}

/// Fixed-window limiter keyed by user id.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    /// Allows `turns_per_minute` turns per user per minute.
    #[must_use]
    pub fn per_minute(turns_per_minute: u32) -> Self {
        Self::new(turns_per_minute, Duration::from_secs(60))
    }

    /// Allows `limit` requests per user per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one request for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RateLimited` with the seconds until the window
    /// resets when the user is over the limit.
    pub fn check(&self, user_id: &str) -> Result<()> {
        self.check_at(user_id, Instant::now())
    }

    fn check_at(&self, user_id: &str, now: Instant) -> Result<()> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.len() > 10_000 {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(user_id.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.limit {
            let remaining = self.window.saturating_sub(now.duration_since(entry.started));
            let retry_after_secs = remaining.as_secs().max(1);
            debug!(user_id = %user_id, retry_after_secs, "Rate limited");
            return Err(EngineError::RateLimited { retry_after_secs });
        }

        entry.count += 1;
        Ok(())
    }
}
