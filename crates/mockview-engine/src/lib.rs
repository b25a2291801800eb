//! MockView Interview Engine
//!
//! Runs streaming mock-interview turns: admits a candidate's reply against
//! the session, asks the AI backend for the next question, frames the
//! reply into wire events, and persists what was asked.

pub mod adaptive;
pub mod api;
pub mod auth;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod evaluation;
pub mod framer;
pub mod policy;
pub mod prompt;
pub mod session;
pub mod store;
pub mod turn;
pub mod wire;

pub use api::{
    create_router, status_for, ApiError, AppState, CreateSessionRequest, EndAction,
    EndSessionRequest, EvaluateRequest, HealthResponse,
};
pub use auth::{Caller, RateLimiter, USER_ID_HEADER, USER_TIER_HEADER};
pub use config::{Config, DataFiles, RateLimitSettings, StreamSettings, Triggers};
pub use enrichment::{
    CandidateProfile, CompanyStyle, EnrichmentSource, Experience, KnowledgeSnippet, Project,
    ResumeEdit, SectionEdit, StaticEnrichment,
};
pub use error::{EngineError, Result};
pub use evaluation::{Evaluation, Evaluator};
pub use framer::MarkerFramer;
pub use policy::{Allowance, FollowUpContext, PolicyTable, Tier, TierPolicy};
pub use session::{
    Admission, Difficulty, EndReason, InterviewSession, InterviewType, Question, QuestionDraft,
    QuestionStatus, Resolution, SessionAggregate, SessionConfig, SessionStatus, TurnSlot,
};
pub use store::{transact, MemoryStore, SessionStore};
pub use turn::{TurnController, TurnHandle, TurnKind};
pub use wire::{ErrorBody, ErrorCode, Progress, TurnRequest, WireEvent, DONE_SENTINEL};
