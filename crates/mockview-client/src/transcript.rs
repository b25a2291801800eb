//! Client-side transcript state.
//!
//! The transcript is a pure reducer: every change arrives as a
//! [`ClientEvent`] and [`Transcript::apply`] folds it in, returning any side
//! effect the caller must run.

use mockview_engine::{ErrorCode, Progress, WireEvent};
use mockview_llm::{ChatMessage, Role};
use uuid::Uuid;

/// One visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptMessage {
    /// Client-side identifier.
    pub id: Uuid,
    /// Author.
    pub role: Role,
    /// Text so far.
    pub content: String,
}

/// Everything that can change the transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The candidate sent a message (an answer or a trigger).
    UserMessage {
        /// Client-side identifier.
        id: Uuid,
        /// Message text.
        content: String,
    },
    /// A turn request is about to be sent.
    TurnStarted,
    /// A frame from the turn stream.
    Wire(WireEvent),
    /// The stream ended with `[DONE]`.
    TurnCompleted,
    /// The turn failed outside the stream (HTTP error or broken connection).
    TurnFailed {
        /// Stable error identifier.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },
    /// The failed turn will be resent.
    RetryScheduled {
        /// 1-based retry number.
        attempt: u32,
    },
}

/// Side effect requested by the reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Grade the answer held in `message_id`.
    Evaluate {
        /// User message holding the answer.
        message_id: Uuid,
        /// Question the answer was recorded on.
        question_id: Uuid,
    },
}

/// Transcript of one interview as the candidate sees it.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<TranscriptMessage>,
    in_flight: Option<Uuid>,
    partial: Option<Uuid>,
    last_user_message: Option<Uuid>,
    is_follow_up: Option<bool>,
    progress: Option<Progress>,
    error: Option<(ErrorCode, String)>,
    retry_attempt: u32,
    ended: bool,
}

impl Transcript {
    /// Creates an empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the transcript.
    pub fn apply(&mut self, event: ClientEvent) -> Option<Effect> {
        match event {
            ClientEvent::UserMessage { id, content } => {
                self.messages.push(TranscriptMessage {
                    id,
                    role: Role::User,
                    content,
                });
                self.last_user_message = Some(id);
                self.retry_attempt = 0;
            }
            ClientEvent::TurnStarted => {
                self.discard_in_flight();
                self.discard_partial();
                let id = Uuid::new_v4();
                self.messages.push(TranscriptMessage {
                    id,
                    role: Role::Assistant,
                    content: String::new(),
                });
                self.in_flight = Some(id);
                self.is_follow_up = None;
                self.error = None;
            }
            ClientEvent::Wire(event) => return self.apply_wire(event),
            ClientEvent::TurnCompleted => self.end_turn(),
            ClientEvent::TurnFailed { code, message } => {
                self.fail(code, message);
                self.end_turn();
            }
            ClientEvent::RetryScheduled { attempt } => {
                self.discard_partial();
                self.retry_attempt = attempt;
            }
        }
        None
    }

    fn apply_wire(&mut self, event: WireEvent) -> Option<Effect> {
        match event {
            WireEvent::AnsweredQuestion {
                answered_question_id,
            } => {
                return self.last_user_message.map(|message_id| Effect::Evaluate {
                    message_id,
                    question_id: answered_question_id,
                });
            }
            WireEvent::Classification { is_follow_up } => self.is_follow_up = Some(is_follow_up),
            WireEvent::Progress { progress } => self.progress = Some(progress),
            WireEvent::Content { content } => {
                if let Some(id) = self.in_flight {
                    if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
                        message.content.push_str(&content);
                    }
                }
            }
            WireEvent::Error { error, code } => self.fail(code, error),
        }
        None
    }

    fn fail(&mut self, code: ErrorCode, message: String) {
        if code == ErrorCode::SessionEnded {
            self.ended = true;
        }
        self.error = Some((code, message));
    }

    /// Closes the streaming message. An empty one is dropped; after a
    /// failure a non-empty one is kept as the partial until a retry.
    fn end_turn(&mut self) {
        if self.in_flight_message().is_some_and(|m| m.content.is_empty()) {
            self.discard_in_flight();
            return;
        }
        if self.error.is_some() {
            self.partial = self.in_flight.take();
        } else {
            self.retry_attempt = 0;
            self.in_flight = None;
        }
    }

    fn discard_partial(&mut self) {
        if let Some(id) = self.partial.take() {
            self.messages.retain(|m| m.id != id);
        }
    }

    fn in_flight_message(&self) -> Option<&TranscriptMessage> {
        let id = self.in_flight?;
        self.messages.iter().find(|m| m.id == id)
    }

    fn discard_in_flight(&mut self) {
        if let Some(id) = self.in_flight.take() {
            self.messages.retain(|m| m.id != id);
        }
    }

    /// Messages to send with the next turn request.
    #[must_use]
    pub fn outgoing(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| Some(m.id) != self.in_flight && Some(m.id) != self.partial)
            .map(|m| ChatMessage::new(m.role, m.content.clone()))
            .collect()
    }

    /// Visible messages.
    #[must_use]
    pub fn messages(&self) -> &[TranscriptMessage] {
        &self.messages
    }

    /// Latest assistant message.
    #[must_use]
    pub fn last_question(&self) -> Option<&TranscriptMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    /// Classification of the latest question.
    #[must_use]
    pub const fn is_follow_up(&self) -> Option<bool> {
        self.is_follow_up
    }

    /// Latest progress report.
    #[must_use]
    pub const fn progress(&self) -> Option<Progress> {
        self.progress
    }

    /// Error of the latest turn, if it failed.
    #[must_use]
    pub fn error(&self) -> Option<(ErrorCode, &str)> {
        self.error.as_ref().map(|(code, msg)| (*code, msg.as_str()))
    }

    /// Current retry number, 0 when not retrying.
    #[must_use]
    pub const fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    /// Returns `true` once the server reported the session over.
    #[must_use]
    pub const fn is_ended(&self) -> bool {
        self.ended
    }

    /// Returns `true` while a turn is streaming.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.in_flight.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(t: &mut Transcript, content: &str) -> Uuid {
        let id = Uuid::new_v4();
        t.apply(ClientEvent::UserMessage {
            id,
            content: content.to_string(),
        });
        id
    }

    #[test]
    fn test_placeholder_is_filled_in_place() {
        let mut t = Transcript::new();
        user(&mut t, "__START_INTERVIEW__");
        t.apply(ClientEvent::TurnStarted);
        assert_eq!(t.messages().len(), 2);
        assert!(t.is_streaming());
        assert_eq!(t.outgoing().len(), 1);

        t.apply(ClientEvent::Wire(WireEvent::Classification {
            is_follow_up: false,
        }));
        t.apply(ClientEvent::Wire(WireEvent::Progress {
            progress: Progress {
                current: 1,
                total: Some(5),
            },
        }));
        t.apply(ClientEvent::Wire(WireEvent::content("What is ")));
        t.apply(ClientEvent::Wire(WireEvent::content("a closure?")));
        t.apply(ClientEvent::TurnCompleted);

        assert!(!t.is_streaming());
        assert_eq!(t.last_question().map(|m| m.content.as_str()), Some("What is a closure?"));
        assert_eq!(t.is_follow_up(), Some(false));
        assert_eq!(t.progress().map(|p| p.current), Some(1));
        assert_eq!(t.outgoing().len(), 2);
    }

    #[test]
    fn test_answered_question_requests_evaluation_for_the_answer() {
        let mut t = Transcript::new();
        let answer = user(&mut t, "A closure captures its environment.");
        t.apply(ClientEvent::TurnStarted);
        let question_id = Uuid::new_v4();
        let effect = t.apply(ClientEvent::Wire(WireEvent::AnsweredQuestion {
            answered_question_id: question_id,
        }));
        assert_eq!(
            effect,
            Some(Effect::Evaluate {
                message_id: answer,
                question_id
            })
        );
    }

    #[test]
    fn test_retry_discards_partial_message() {
        let mut t = Transcript::new();
        user(&mut t, "my answer");
        t.apply(ClientEvent::TurnStarted);
        t.apply(ClientEvent::Wire(WireEvent::content("Half a quest")));
        t.apply(ClientEvent::Wire(WireEvent::error(ErrorCode::Timeout, "timed out")));
        t.apply(ClientEvent::TurnCompleted);
        assert_eq!(t.error().map(|(c, _)| c), Some(ErrorCode::Timeout));

        assert_eq!(t.messages().len(), 2);
        assert_eq!(t.outgoing(), vec![ChatMessage::user("my answer")]);

        t.apply(ClientEvent::RetryScheduled { attempt: 1 });
        assert_eq!(t.messages().len(), 1);
        assert_eq!(t.retry_attempt(), 1);

        t.apply(ClientEvent::TurnStarted);
        t.apply(ClientEvent::Wire(WireEvent::content("A whole question?")));
        t.apply(ClientEvent::TurnCompleted);
        assert_eq!(t.messages().len(), 2);
        assert_eq!(t.error(), None);
        assert_eq!(t.retry_attempt(), 0);
    }

    #[test]
    fn test_session_ended() {
        let mut t = Transcript::new();
        user(&mut t, "last answer");
        t.apply(ClientEvent::TurnStarted);
        t.apply(ClientEvent::Wire(WireEvent::error(
            ErrorCode::SessionEnded,
            "interview complete",
        )));
        t.apply(ClientEvent::TurnCompleted);
        assert!(t.is_ended());
        assert_eq!(t.messages().len(), 1);
    }
}
