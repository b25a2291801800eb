//! Per-answer evaluation state.

use std::collections::HashMap;

use mockview_engine::Evaluation;
use uuid::Uuid;

/// Evaluation progress for one answer.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationState {
    /// Request in flight.
    Pending {
        /// Question being graded.
        question_id: Uuid,
    },
    /// Graded.
    Done(Evaluation),
    /// Grading failed; the caller may retry it.
    Failed {
        /// Question being graded.
        question_id: Uuid,
        /// Failure description.
        error: String,
    },
}

/// Evaluation results keyed by the user message that held the answer.
///
/// Results may finish in any order; keying by message id keeps each grade
/// attached to its own answer.
#[derive(Debug, Clone, Default)]
pub struct EvaluationBook {
    entries: HashMap<Uuid, EvaluationState>,
}

impl EvaluationBook {
    /// Creates an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that grading started for `message_id`.
    pub fn start(&mut self, message_id: Uuid, question_id: Uuid) {
        self.entries
            .insert(message_id, EvaluationState::Pending { question_id });
    }

    /// Records a finished grade.
    pub fn complete(&mut self, message_id: Uuid, evaluation: Evaluation) {
        self.entries
            .insert(message_id, EvaluationState::Done(evaluation));
    }

    /// Records a failed grade.
    pub fn fail(&mut self, message_id: Uuid, question_id: Uuid, error: impl Into<String>) {
        self.entries.insert(
            message_id,
            EvaluationState::Failed {
                question_id,
                error: error.into(),
            },
        );
    }

    /// State for one answer.
    #[must_use]
    pub fn get(&self, message_id: Uuid) -> Option<&EvaluationState> {
        self.entries.get(&message_id)
    }

    /// Whether grading for `message_id` is in flight or finished.
    #[must_use]
    pub fn is_settled_or_running(&self, message_id: Uuid) -> bool {
        matches!(
            self.entries.get(&message_id),
            Some(EvaluationState::Pending { .. } | EvaluationState::Done(_))
        )
    }

    /// Question to re-grade for a failed answer.
    #[must_use]
    pub fn retry_target(&self, message_id: Uuid) -> Option<Uuid> {
        match self.entries.get(&message_id) {
            Some(EvaluationState::Failed { question_id, .. }) => Some(*question_id),
            _ => None,
        }
    }

    /// Number of evaluations still in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.entries
            .values()
            .filter(|s| matches!(s, EvaluationState::Pending { .. }))
            .count()
    }

    /// Number of tracked answers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
