//! Answer evaluation.
//!
//! Grades one answered question with a non-streaming AI call and records
//! the score on the question and the session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mockview_llm::{ChatBackend, ChatMessage, ChatRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::session::{Question, QuestionStatus};
use crate::store::{transact, SessionStore};

const GRADER_PROMPT: &str = "You are grading a candidate's answer in a mock interview. \
Score it from 0 to 10 for correctness, depth, and clarity. \
Reply with JSON only: {\"score\": <number 0-10>, \"feedback\": \"<two or three sentences>\"}";

/// Result of grading one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// The graded question.
    pub question_id: Uuid,
    /// Score from 0 to 10.
    pub score: f32,
    /// Feedback for the candidate.
    pub feedback: String,
    /// Mean score of the session's evaluated questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_score: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct Grade {
    score: f32,
    #[serde(default)]
    feedback: String,
}

/// Grades answers through the chat backend.
#[derive(Clone)]
pub struct Evaluator {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn ChatBackend>,
    timeout: Duration,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    /// Creates an evaluator whose AI call is bounded by `timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, backend: Arc<dyn ChatBackend>, timeout: Duration) -> Self {
        Self {
            store,
            backend,
            timeout,
        }
    }

    /// Grades the answer to `question_id` on behalf of `user_id`.
    ///
    /// An already evaluated question returns its stored result without
    /// calling the AI again.
    pub async fn evaluate(&self, user_id: &str, question_id: Uuid) -> Result<Evaluation> {
        let (session_id, question) = self
            .store
            .find_question(question_id)
            .await?
            .ok_or(EngineError::QuestionNotFound(question_id))?;

        let aggregate = self
            .store
            .load(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))?;
        if aggregate.session.user_id != user_id {
            return Err(EngineError::Forbidden(session_id));
        }

        match question.status {
            QuestionStatus::Evaluated => {
                debug!(question_id = %question_id, "Returning stored evaluation");
                return Ok(Evaluation {
                    question_id,
                    score: question.score.unwrap_or_default(),
                    feedback: question.feedback.clone().unwrap_or_default(),
                    session_score: aggregate.session.total_score,
                });
            }
            QuestionStatus::Answered => {}
            _ => return Err(EngineError::NotAnswered(question_id)),
        }

        let request = grading_request(&question);
        let reply = tokio::time::timeout(self.timeout, self.backend.complete(&request))
            .await
            .map_err(|_| EngineError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })??;
        let grade = parse_grade(&reply)?;

        let (committed, _) = transact(self.store.as_ref(), session_id, |agg| {
            agg.record_evaluation(question_id, grade.score, grade.feedback.clone(), Utc::now())
                .map(|_| ())
        })
        .await?;

        let stored = committed
            .questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or(EngineError::QuestionNotFound(question_id))?;
        info!(
            question_id = %question_id,
            score = stored.score.unwrap_or_default(),
            "Answer evaluated"
        );

        Ok(Evaluation {
            question_id,
            score: stored.score.unwrap_or_default(),
            feedback: stored.feedback.clone().unwrap_or_default(),
            session_score: committed.session.total_score,
        })
    }
}

fn grading_request(question: &Question) -> ChatRequest {
    let answer = question.user_answer.as_deref().unwrap_or_default();
    ChatRequest::new(vec![
        ChatMessage::system(GRADER_PROMPT),
        ChatMessage::user(format!(
            "Topic: {}\nDifficulty: {}\n\nQuestion:\n{}\n\nAnswer:\n{}",
            question.category, question.difficulty, question.content, answer
        )),
    ])
    .with_temperature(0.2)
}

/// Extracts the grade object from a reply that may wrap it in prose or fences.
fn parse_grade(reply: &str) -> Result<Grade> {
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        return Err(EngineError::MalformedReply(
            "evaluation reply contains no JSON object".to_string(),
        ));
    };
    if end < start {
        return Err(EngineError::MalformedReply(
            "evaluation reply contains no JSON object".to_string(),
        ));
    }
    let grade: Grade = serde_json::from_str(&reply[start..=end])
        .map_err(|e| EngineError::MalformedReply(format!("invalid evaluation JSON: {e}")))?;
    if !grade.score.is_finite() {
        return Err(EngineError::MalformedReply("score is not a number".to_string()));
    }
    Ok(grade)
}
