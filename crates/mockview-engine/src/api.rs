//! HTTP API for the MockView interview engine.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Liveness probe
//! - `POST /api/sessions` - Create an interview session
//! - `GET /api/sessions/{id}` - Get a session with its questions
//! - `POST /api/sessions/{id}/end` - Complete or abandon a session
//! - `POST /api/interview/stream` - Run one interview turn (server-sent events)
//! - `POST /api/evaluations` - Grade one answered question
//!
//! Every route except `/api/health` requires the `x-user-id` and
//! `x-user-tier` headers set by the upstream auth layer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mockview_engine::{create_router, AppState, Config, MemoryStore, StaticEnrichment};
//! use mockview_llm::ScriptedBackend;
//!
//! # async fn example() {
//! let state = AppState::new(
//!     Config::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ScriptedBackend::demo()),
//!     Arc::new(StaticEnrichment::new()),
//! );
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use mockview_llm::ChatBackend;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{Caller, RateLimiter};
use crate::config::Config;
use crate::enrichment::EnrichmentSource;
use crate::error::EngineError;
use crate::evaluation::{Evaluation, Evaluator};
use crate::session::{
    Difficulty, EndReason, InterviewSession, InterviewType, SessionAggregate, SessionConfig,
    SessionStatus,
};
use crate::store::{transact, SessionStore};
use crate::turn::TurnController;
use crate::wire::{ErrorBody, ErrorCode, TurnRequest, WireEvent, DONE_SENTINEL};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Topics to interview on.
    pub topics: Vec<String>,
    /// Target seniority.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Interview flavour.
    #[serde(default)]
    pub interview_type: InterviewType,
    /// Target position reference.
    #[serde(default)]
    pub position_id: Option<String>,
    /// Company interview style tag.
    #[serde(default)]
    pub company_style: Option<String>,
    /// Resume edit to apply to the profile.
    #[serde(default)]
    pub resume_edit_id: Option<String>,
    /// Abandon any in-progress session first.
    #[serde(default)]
    pub abandon_existing: bool,
}

/// How a session is being ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndAction {
    /// The candidate finished the interview (default).
    #[default]
    Completed,
    /// The candidate gave up.
    Abandoned,
}

/// Request body for ending a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndSessionRequest {
    /// Terminal status to apply.
    #[serde(default)]
    pub status: EndAction,
}

/// Request body for grading an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    /// The answered question.
    pub question_id: Uuid,
}

/// Response body for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Name of the configured AI backend.
    pub backend: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    /// Engine configuration.
    pub config: Arc<Config>,
    /// Session storage.
    pub store: Arc<dyn SessionStore>,
    /// Turn orchestration.
    pub turns: TurnController,
    /// Answer grading.
    pub evaluator: Evaluator,
    /// Per-caller turn limiter.
    pub rate_limiter: Arc<RateLimiter>,
    backend_name: String,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.backend_name)
            .field("turns", &self.turns)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the engine's collaborators together.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn ChatBackend>,
        enrichment: Arc<dyn EnrichmentSource>,
    ) -> Self {
        let config = Arc::new(config);
        let rate_limiter = Arc::new(RateLimiter::per_minute(config.rate_limit.turns_per_minute));
        let evaluator = Evaluator::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            Duration::from_secs(config.stream.timeout_secs),
        );
        let backend_name = backend.name().to_string();
        let turns = TurnController::new(Arc::clone(&store), backend, enrichment, Arc::clone(&config));

        Self {
            config,
            store,
            turns,
            evaluator,
            rate_limiter,
            backend_name,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error returned by API handlers; renders as `{error, code}`.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(EngineError::invalid_request(rejection.body_text()))
    }
}

/// HTTP status for a wire error code.
#[must_use]
pub const fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorCode::AuthExpired => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::SessionNotFound | ErrorCode::QuestionNotFound | ErrorCode::ProfileNotFound => {
            StatusCode::NOT_FOUND
        }
        ErrorCode::SessionNotActive
        | ErrorCode::StaleTranscript
        | ErrorCode::NotAnswered
        | ErrorCode::SessionEnded => StatusCode::CONFLICT,
        ErrorCode::QuotaExceeded | ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::UpstreamUnavailable
        | ErrorCode::UpstreamRateLimited
        | ErrorCode::StreamError => StatusCode::BAD_GATEWAY,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Internal | ErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);
        if status.is_server_error() {
            error!(code = %code, error = %self.0, "Request failed");
        } else {
            warn!(code = %code, error = %self.0, "Request rejected");
        }

        let retry_after = match &self.0 {
            EngineError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = Json(ErrorBody {
            error: self.0.to_string(),
            code,
        });
        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// All routes live under `/api`, with permissive CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route("/sessions/:id", get(handle_get_session))
        .route("/sessions/:id/end", post(handle_end_session))
        .route("/interview/stream", post(handle_stream))
        .route("/evaluations", post(handle_evaluate));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.backend_name.clone(),
    })
}

/// Handler for `POST /api/sessions`.
///
/// Validates the requested topics and company style against the caller's
/// tier, then creates the session under the monthly quota.
async fn handle_create_session(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InterviewSession>), ApiError> {
    let Json(request) = payload?;
    let policy = state.config.tiers.resolve(caller.tier);

    let topics: Vec<String> = request
        .topics
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if topics.is_empty() {
        return Err(EngineError::invalid_request("at least one topic is required").into());
    }
    if let Some(topic) = policy.allowed_topics.first_disallowed(&topics) {
        return Err(EngineError::invalid_request(format!(
            "topic '{topic}' is not available on the {} tier",
            caller.tier
        ))
        .into());
    }
    if let Some(style) = &request.company_style {
        if !policy.allowed_company_styles.allows(style) {
            return Err(EngineError::invalid_request(format!(
                "company style '{style}' is not available on the {} tier",
                caller.tier
            ))
            .into());
        }
    }

    let session = InterviewSession::new(
        caller.user_id.clone(),
        SessionConfig {
            topics,
            difficulty: request.difficulty,
            interview_type: request.interview_type,
            position_id: request.position_id,
            company_style: request.company_style,
            resume_edit_id: request.resume_edit_id,
        },
        Utc::now(),
    );

    let session = state
        .store
        .create_session(session, policy.monthly_session_limit, request.abandon_existing)
        .await?;

    info!(
        session_id = %session.id,
        user_id = %caller.user_id,
        tier = %caller.tier,
        "Session created"
    );
    Ok((StatusCode::CREATED, Json(session)))
}

/// Handler for `GET /api/sessions/{id}`.
async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionAggregate>, ApiError> {
    let aggregate = state
        .store
        .load(session_id)
        .await?
        .ok_or(EngineError::SessionNotFound(session_id))?;
    if aggregate.session.user_id != caller.user_id {
        return Err(EngineError::Forbidden(session_id).into());
    }
    Ok(Json(aggregate))
}

/// Handler for `POST /api/sessions/{id}/end`.
async fn handle_end_session(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(session_id): Path<Uuid>,
    payload: Option<Json<EndSessionRequest>>,
) -> Result<Json<InterviewSession>, ApiError> {
    let action = payload.map(|Json(r)| r.status).unwrap_or_default();
    let (status, reason) = match action {
        EndAction::Completed => (SessionStatus::Completed, EndReason::UserEnded),
        EndAction::Abandoned => (SessionStatus::Abandoned, EndReason::Abandoned),
    };

    let (aggregate, ()) = transact(state.store.as_ref(), session_id, |agg| {
        if agg.session.user_id != caller.user_id {
            return Err(EngineError::Forbidden(session_id));
        }
        agg.finish(status, reason, Utc::now())
    })
    .await?;

    info!(
        session_id = %session_id,
        status = %aggregate.session.status,
        questions = aggregate.session.question_count,
        "Session ended"
    );
    Ok(Json(aggregate.session))
}

/// Handler for `POST /api/interview/stream`.
///
/// Admission failures are returned as JSON errors. Once admitted, the turn is
/// streamed as server-sent events terminated by `data: [DONE]`.
async fn handle_stream(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    payload: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    state.rate_limiter.check(&caller.user_id)?;
    let Json(request) = payload?;

    let handle = state
        .turns
        .start_turn(
            &caller.user_id,
            caller.tier,
            request.session_id,
            request.messages,
        )
        .await?;

    let events = ReceiverStream::new(handle.events)
        .map(|event| Ok::<_, Infallible>(wire_event(&event)))
        .chain(tokio_stream::once(Ok(Event::default().data(DONE_SENTINEL))));

    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn wire_event(event: &WireEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            error!(error = %e, "Failed to encode stream event");
            let fallback = ErrorBody {
                error: "failed to encode event".to_string(),
                code: ErrorCode::Internal,
            };
            Event::default().data(serde_json::to_string(&fallback).unwrap_or_default())
        }
    }
}

/// Handler for `POST /api/evaluations`.
async fn handle_evaluate(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    payload: Result<Json<EvaluateRequest>, JsonRejection>,
) -> Result<Json<Evaluation>, ApiError> {
    let Json(request) = payload?;
    let evaluation = state
        .evaluator
        .evaluate(&caller.user_id, request.question_id)
        .await?;
    Ok(Json(evaluation))
}

// ============================================================================
// Tests
// ============================================================================
