//! Session and question types for the interview engine.
//!
//! This module defines the persistent entities ([`InterviewSession`],
//! [`Question`]) and the [`SessionAggregate`] state machine that applies
//! turn transitions to a session and its questions. Aggregate methods are
//! pure: the store runs them inside a transaction and commits the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

// ============================================================================
// Enumerations
// ============================================================================

/// Target seniority of the interview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Entry level.
    Junior,
    /// Mid level (default).
    #[default]
    Mid,
    /// Senior level.
    Senior,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Junior => write!(f, "junior"),
            Self::Mid => write!(f, "mid"),
            Self::Senior => write!(f, "senior"),
        }
    }
}

/// Flavour of interview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewType {
    /// Technical questions only (default).
    #[default]
    Technical,
    /// Behavioral questions only.
    Behavioral,
    /// A mix of both.
    Mixed,
}

impl std::fmt::Display for InterviewType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Technical => write!(f, "technical"),
            Self::Behavioral => write!(f, "behavioral"),
            Self::Mixed => write!(f, "mixed"),
        }
    }
}

/// Lifecycle status of a session.
///
/// `InProgress` -> `Completed` (limit reached or ended by the caller)
/// `InProgress` -> `Abandoned` (explicit abandonment or superseded)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting turns.
    #[default]
    InProgress,
    /// Finished normally.
    Completed,
    /// Given up or replaced by a newer session.
    Abandoned,
}

impl SessionStatus {
    /// Returns `true` if the session no longer accepts turns.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The tier's question limit was reached.
    QuestionLimit,
    /// The candidate finished the interview.
    UserEnded,
    /// The candidate abandoned the interview.
    Abandoned,
    /// A new session replaced this one.
    Superseded,
}

/// Status of a single question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    /// Awaiting the candidate's reply.
    #[default]
    Pending,
    /// The candidate replied.
    Answered,
    /// The candidate skipped it.
    Skipped,
    /// The session ended before a reply.
    Unanswered,
    /// The reply has been scored.
    Evaluated,
}

// ============================================================================
// InterviewSession
// ============================================================================

/// Immutable configuration chosen when the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Knowledge topics covered by the interview.
    pub topics: Vec<String>,
    /// Target seniority.
    pub difficulty: Difficulty,
    /// Interview flavour.
    pub interview_type: InterviewType,
    /// Target position reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    /// Company interview style tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_style: Option<String>,
    /// Position-specific resume coaching edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_edit_id: Option<String>,
}

/// One mock interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewSession {
    /// Session identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Configuration fixed at creation.
    pub config: SessionConfig,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Number of main (non-follow-up) questions.
    pub question_count: u32,
    /// Mean score of evaluated questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<f32>,
    /// Why the session ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl InterviewSession {
    /// Creates an in-progress session.
    #[must_use]
    pub fn new(user_id: impl Into<String>, config: SessionConfig, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            config,
            status: SessionStatus::InProgress,
            question_count: 0,
            total_score: None,
            end_reason: None,
            created_at: now,
            completed_at: None,
        }
    }
}

// ============================================================================
// Question
// ============================================================================

/// One AI emission of a session (main question or follow-up).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Evaluation reference.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Position among all AI emissions of the session.
    pub order_index: u32,
    /// AI-authored text.
    pub content: String,
    /// Topic the question belongs to.
    pub category: String,
    /// Difficulty it was asked at.
    pub difficulty: Difficulty,
    /// `true` for follow-ups.
    pub is_follow_up: bool,
    /// Current status.
    pub status: QuestionStatus,
    /// The candidate's reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_answer: Option<String>,
    /// When the reply was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    /// Evaluation score (0-10).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Evaluation feedback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// `true` when the content was cut short by an aborted stream.
    #[serde(default)]
    pub truncated: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Content of a question produced by one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionDraft {
    /// Question text.
    pub content: String,
    /// Topic.
    pub category: String,
    /// Difficulty.
    pub difficulty: Difficulty,
    /// Follow-up classification.
    pub is_follow_up: bool,
    /// Whether the stream was cut short.
    pub truncated: bool,
}

// ============================================================================
// Turn admission
// ============================================================================

/// What the incoming message does to the pending question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Record the text as the answer.
    Answer(String),
    /// Mark the question skipped.
    Skip,
    /// Leave it untouched.
    Leave,
}

/// Outcome of admitting a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Generate the next question.
    Proceed(TurnSlot),
    /// The question limit was reached and the session has been completed.
    SessionEnded {
        /// Question that received the final answer, if one was recorded.
        answered_question_id: Option<Uuid>,
    },
}

/// Where the turn's question goes and what came before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSlot {
    /// Index the new question will be upserted at.
    pub order_index: u32,
    /// Main questions asked before this slot.
    pub main_questions_before: u32,
    /// Question whose answer was just recorded.
    pub answered_question_id: Option<Uuid>,
}

// ============================================================================
// SessionAggregate
// ============================================================================

/// A session together with all of its questions; the unit of a store transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    /// The session row.
    pub session: InterviewSession,
    /// Question rows ordered by `order_index`, with no gaps.
    pub questions: Vec<Question>,
}

impl SessionAggregate {
    /// Wraps a new session with no questions.
    #[must_use]
    pub const fn new(session: InterviewSession) -> Self {
        Self {
            session,
            questions: Vec::new(),
        }
    }

    /// The question currently awaiting a reply.
    #[must_use]
    pub fn pending_question(&self) -> Option<&Question> {
        self.questions
            .iter()
            .rev()
            .find(|q| q.status == QuestionStatus::Pending)
    }

    /// Number of main questions in the session.
    #[must_use]
    pub fn main_question_count(&self) -> u32 {
        self.main_questions_before(u32::MAX)
    }

    /// Number of main questions with `order_index < index`.
    #[must_use]
    pub fn main_questions_before(&self, index: u32) -> u32 {
        let count = self
            .questions
            .iter()
            .filter(|q| q.order_index < index && !q.is_follow_up)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Follow-ups asked after the most recent main question before `index`.
    #[must_use]
    pub fn follow_ups_since_main(&self, index: u32) -> u32 {
        let count = self
            .questions
            .iter()
            .filter(|q| q.order_index < index)
            .rev()
            .take_while(|q| q.is_follow_up)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Category of the most recent main question before `index`.
    #[must_use]
    pub fn current_category(&self, index: u32) -> Option<&str> {
        self.questions
            .iter()
            .filter(|q| q.order_index < index && !q.is_follow_up)
            .last()
            .map(|q| q.category.as_str())
    }

    /// `(category, score)` of evaluated questions before `index`, oldest first.
    #[must_use]
    pub fn evaluated_scores(&self, index: u32) -> Vec<(&str, f32)> {
        self.questions
            .iter()
            .filter(|q| q.order_index < index && q.status == QuestionStatus::Evaluated)
            .filter_map(|q| q.score.map(|s| (q.category.as_str(), s)))
            .collect()
    }

    fn question_count(&self) -> u32 {
        u32::try_from(self.questions.len()).unwrap_or(u32::MAX)
    }

    fn ensure_in_progress(&self) -> Result<()> {
        if self.session.status == SessionStatus::InProgress {
            Ok(())
        } else {
            Err(EngineError::SessionNotActive {
                session_id: self.session.id,
                status: self.session.status,
            })
        }
    }

    /// Admits a turn: validates ownership and status, applies the resolution
    /// to the pending question, and enforces the question limit.
    ///
    /// `assistant_messages` is the number of AI emissions in the caller's
    /// transcript; it becomes the order index of the new question (capped at
    /// the stored row count), so a retried turn targets the same row.
    pub fn admit_turn(
        &mut self,
        user_id: &str,
        resolution: Resolution,
        assistant_messages: u32,
        question_limit: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        if self.session.user_id != user_id {
            return Err(EngineError::Forbidden(self.session.id));
        }
        self.ensure_in_progress()?;

        let order_index = assistant_messages.min(self.question_count());
        if let Some(existing) = self.questions.get(order_index as usize) {
            if existing.status != QuestionStatus::Pending {
                return Err(EngineError::StaleTranscript { order_index });
            }
        }

        let mut answered_question_id = None;
        let pending = self
            .questions
            .iter()
            .rposition(|q| q.order_index < order_index && q.status == QuestionStatus::Pending);
        if let Some(position) = pending {
            let question = &mut self.questions[position];
            match &resolution {
                Resolution::Answer(text) => {
                    question.status = QuestionStatus::Answered;
                    question.user_answer = Some(text.clone());
                    question.answered_at = Some(now);
                    question.updated_at = now;
                    answered_question_id = Some(question.id);
                }
                Resolution::Skip => {
                    question.status = QuestionStatus::Skipped;
                    question.updated_at = now;
                }
                Resolution::Leave => {}
            }
        } else if let Resolution::Answer(text) = &resolution {
            // A retried answer turn: the answer was stored by an earlier attempt.
            answered_question_id = self
                .questions
                .iter()
                .rev()
                .find(|q| q.order_index < order_index)
                .filter(|q| {
                    matches!(q.status, QuestionStatus::Answered | QuestionStatus::Evaluated)
                        && q.user_answer.as_deref() == Some(text.as_str())
                })
                .map(|q| q.id);
        }

        let main_questions_before = self.main_questions_before(order_index);
        if let Some(limit) = question_limit {
            if main_questions_before >= limit {
                self.finish(SessionStatus::Completed, EndReason::QuestionLimit, now)?;
                return Ok(Admission::SessionEnded {
                    answered_question_id,
                });
            }
        }

        Ok(Admission::Proceed(TurnSlot {
            order_index,
            main_questions_before,
            answered_question_id,
        }))
    }

    /// Inserts or overwrites the question at `order_index` as pending.
    ///
    /// Any other pending question is resolved to `unanswered`, so at most one
    /// question is pending afterwards.
    pub fn upsert_question(
        &mut self,
        order_index: u32,
        draft: QuestionDraft,
        now: DateTime<Utc>,
    ) -> Result<&Question> {
        self.ensure_in_progress()?;

        let len = self.question_count();
        if order_index > len {
            return Err(EngineError::invalid_request(format!(
                "question index {order_index} skips ahead of {len} stored questions"
            )));
        }

        if order_index == len {
            self.questions.push(Question {
                id: Uuid::new_v4(),
                session_id: self.session.id,
                order_index,
                content: String::new(),
                category: String::new(),
                difficulty: draft.difficulty,
                is_follow_up: false,
                status: QuestionStatus::Pending,
                user_answer: None,
                answered_at: None,
                score: None,
                feedback: None,
                truncated: false,
                created_at: now,
                updated_at: now,
            });
        } else if self.questions[order_index as usize].status != QuestionStatus::Pending {
            return Err(EngineError::StaleTranscript { order_index });
        }

        for question in &mut self.questions {
            if question.order_index != order_index && question.status == QuestionStatus::Pending {
                question.status = QuestionStatus::Unanswered;
                question.updated_at = now;
            }
        }

        let question = &mut self.questions[order_index as usize];
        question.content = draft.content;
        question.category = draft.category;
        question.difficulty = draft.difficulty;
        question.is_follow_up = draft.is_follow_up;
        question.truncated = draft.truncated;
        question.updated_at = now;

        self.session.question_count = self.main_question_count();
        Ok(&self.questions[order_index as usize])
    }

    /// Ends the session, resolving any pending question to `unanswered` and
    /// reconciling the denormalized question count.
    pub fn finish(
        &mut self,
        status: SessionStatus,
        reason: EndReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_in_progress()?;
        if !status.is_terminal() {
            return Err(EngineError::invalid_request(format!(
                "cannot end a session as {status}"
            )));
        }

        for question in &mut self.questions {
            if question.status == QuestionStatus::Pending {
                question.status = QuestionStatus::Unanswered;
                question.updated_at = now;
            }
        }
        self.session.status = status;
        self.session.end_reason = Some(reason);
        self.session.completed_at = Some(now);
        self.session.question_count = self.main_question_count();
        Ok(())
    }

    /// Records an evaluation and recomputes the session's total score.
    pub fn record_evaluation(
        &mut self,
        question_id: Uuid,
        score: f32,
        feedback: String,
        now: DateTime<Utc>,
    ) -> Result<&Question> {
        let index = self
            .questions
            .iter()
            .position(|q| q.id == question_id)
            .ok_or(EngineError::QuestionNotFound(question_id))?;

        let question = &mut self.questions[index];
        if !matches!(
            question.status,
            QuestionStatus::Answered | QuestionStatus::Evaluated
        ) {
            return Err(EngineError::NotAnswered(question_id));
        }
        question.status = QuestionStatus::Evaluated;
        question.score = Some(score.clamp(0.0, 10.0));
        question.feedback = Some(feedback);
        question.updated_at = now;

        let scores: Vec<f32> = self.questions.iter().filter_map(|q| q.score).collect();
        #[allow(clippy::cast_precision_loss)]
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;
        self.session.total_score = Some(mean);

        Ok(&self.questions[index])
    }
}

// ============================================================================
// Tests
// ============================================================================
