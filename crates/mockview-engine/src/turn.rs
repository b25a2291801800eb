//! Turn controller.
//!
//! One call to [`TurnController::start_turn`] is one interview turn: the
//! caller's last message is classified, the pending question is resolved and
//! the question limit enforced in a single store transaction, then the AI
//! reply is streamed through the [`MarkerFramer`] into a bounded channel of
//! [`WireEvent`]s. The generated question is upserted when the reply ends.
//!
//! Completion, provider failure, timeout, and client disconnect all end in
//! the same finalize step, which decides whether partial output is saved.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mockview_llm::{ChatBackend, ChatMessage, ChatRequest, LlmError, Role, StreamingToken};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adaptive::difficulty_hint;
use crate::config::{Config, Triggers};
use crate::enrichment::EnrichmentSource;
use crate::error::{EngineError, Result};
use crate::framer::MarkerFramer;
use crate::policy::{FollowUpContext, Tier};
use crate::prompt::{self, TurnContext};
use crate::session::{
    Admission, Difficulty, QuestionDraft, Resolution, SessionAggregate, TurnSlot,
};
use crate::store::{transact, SessionStore};
use crate::wire::{ErrorCode, WireEvent};

/// Stand-in sent to the AI in place of the start trigger.
const START_STAND_IN: &str = "I'm ready. Please begin the interview with your first question.";

/// Stand-in sent to the AI in place of the skip trigger.
const SKIP_STAND_IN: &str = "I'd like to skip this question. Please move on to a new question.";

// ============================================================================
// Classification
// ============================================================================

/// What the caller's last message means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// The start trigger: open the interview.
    Start,
    /// The skip trigger: skip the pending question.
    Skip,
    /// A real answer to the pending question.
    Answer,
    /// No new user input; generate the next question.
    Resume,
}

impl TurnKind {
    /// Returns the lowercase name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Skip => "skip",
            Self::Answer => "answer",
            Self::Resume => "resume",
        }
    }
}

/// Classifies the last message of a transcript.
#[must_use]
pub fn classify(messages: &[ChatMessage], triggers: &Triggers) -> (TurnKind, Resolution) {
    match messages.last() {
        Some(m) if m.role == Role::User && m.content == triggers.start => {
            (TurnKind::Start, Resolution::Leave)
        }
        Some(m) if m.role == Role::User && m.content == triggers.skip => {
            (TurnKind::Skip, Resolution::Skip)
        }
        Some(m) if m.role == Role::User => {
            (TurnKind::Answer, Resolution::Answer(m.content.clone()))
        }
        _ => (TurnKind::Resume, Resolution::Leave),
    }
}

/// Number of AI emissions in a transcript.
#[must_use]
pub fn assistant_count(messages: &[ChatMessage]) -> u32 {
    let count = messages.iter().filter(|m| m.role == Role::Assistant).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Builds the conversation sent to the AI.
///
/// Client-supplied system messages are dropped, reserved triggers are
/// replaced with natural-language stand-ins, and the server prompt leads.
#[must_use]
pub fn prepare_transcript(
    system_prompt: String,
    messages: &[ChatMessage],
    triggers: &Triggers,
) -> Vec<ChatMessage> {
    let mut prepared = Vec::with_capacity(messages.len() + 1);
    prepared.push(ChatMessage::system(system_prompt));
    for message in messages {
        match message.role {
            Role::System => {}
            Role::User if message.content == triggers.start => {
                prepared.push(ChatMessage::user(START_STAND_IN));
            }
            Role::User if message.content == triggers.skip => {
                prepared.push(ChatMessage::user(SKIP_STAND_IN));
            }
            _ => prepared.push(message.clone()),
        }
    }
    prepared
}

// ============================================================================
// TurnController
// ============================================================================

/// A running turn.
#[derive(Debug)]
pub struct TurnHandle {
    /// Framed events, closed when the turn is finished.
    pub events: mpsc::Receiver<WireEvent>,
    /// The generation task, absent when the turn ended during admission.
    pub task: Option<JoinHandle<()>>,
}

/// Orchestrates interview turns.
#[derive(Clone)]
pub struct TurnController {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn ChatBackend>,
    enrichment: Arc<dyn EnrichmentSource>,
    config: Arc<Config>,
}

impl std::fmt::Debug for TurnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnController")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl TurnController {
    /// Creates a controller.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn ChatBackend>,
        enrichment: Arc<dyn EnrichmentSource>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            backend,
            enrichment,
            config,
        }
    }

    /// Admits a turn and starts streaming the next question.
    ///
    /// Failures before streaming starts (unknown or foreign session, session
    /// not in progress, stale transcript, missing profile) are returned as
    /// errors. Everything after admission is reported as events.
    pub async fn start_turn(
        &self,
        user_id: &str,
        tier: Tier,
        session_id: Uuid,
        messages: Vec<ChatMessage>,
    ) -> Result<TurnHandle> {
        let policy = self.config.tiers.resolve(tier);
        let (kind, resolution) = classify(&messages, &self.config.triggers);
        let emitted = assistant_count(&messages);

        let (aggregate, admission) = transact(self.store.as_ref(), session_id, |agg| {
            agg.admit_turn(
                user_id,
                resolution.clone(),
                emitted,
                policy.question_limit,
                Utc::now(),
            )
        })
        .await?;

        let capacity = self.config.stream.channel_capacity;
        let slot = match admission {
            Admission::Proceed(slot) => slot,
            Admission::SessionEnded {
                answered_question_id,
            } => {
                info!(
                    session_id = %session_id,
                    limit = ?policy.question_limit,
                    "Question limit reached, session completed"
                );
                return Ok(ended_turn(answered_question_id, capacity.max(2)));
            }
        };

        debug!(
            session_id = %session_id,
            kind = kind.as_str(),
            order_index = slot.order_index,
            "Turn admitted"
        );

        let follow_up =
            policy.follow_up_context(aggregate.follow_ups_since_main(slot.order_index));
        let hint = difficulty_hint(&aggregate.evaluated_scores(slot.order_index));
        let current_topic = aggregate.current_category(slot.order_index);
        let stream = &self.config.stream;
        let ctx = TurnContext {
            session: &aggregate.session,
            policy: &policy,
            main_questions_before: slot.main_questions_before,
            follow_up,
            current_topic,
            difficulty_hint: &hint,
            main_marker: &stream.main_marker,
            follow_up_marker: &stream.follow_up_marker,
        };

        let parts = prompt::gather(self.enrichment.as_ref(), &ctx).await?;
        let system_prompt = prompt::render(&ctx, &parts);
        let request = ChatRequest::new(prepare_transcript(
            system_prompt,
            &messages,
            &self.config.triggers,
        ))
        .with_temperature(self.config.llm.temperature)
        .with_max_tokens(self.config.llm.max_tokens);

        let plan = GenerationPlan {
            session_id,
            slot,
            follow_up,
            main_category: ctx.next_topic().to_string(),
            follow_up_category: current_topic.map(String::from),
            difficulty: aggregate.session.config.difficulty,
            total: policy.question_limit,
        };

        let (tx, rx) = mpsc::channel(capacity);
        let controller = self.clone();
        let task = tokio::spawn(async move { controller.generate(plan, request, tx).await });

        Ok(TurnHandle {
            events: rx,
            task: Some(task),
        })
    }

    async fn generate(&self, plan: GenerationPlan, request: ChatRequest, tx: mpsc::Sender<WireEvent>) {
        if let Some(id) = plan.slot.answered_question_id {
            let event = WireEvent::AnsweredQuestion {
                answered_question_id: id,
            };
            if tx.send(event).await.is_err() {
                debug!(session_id = %plan.session_id, "Client left before the stream started");
            }
        }

        let settings = &self.config.stream;
        let mut framer = MarkerFramer::new(
            settings.main_marker.clone(),
            settings.follow_up_marker.clone(),
            settings.marker_buffer_bytes,
            plan.slot.main_questions_before,
            plan.total,
        );
        let mut text = String::new();
        let deadline = Instant::now() + Duration::from_secs(settings.timeout_secs);

        let outcome = self
            .relay(&request, &mut framer, &mut text, &tx, deadline)
            .await;
        self.finalize(&plan, outcome, &mut framer, &mut text, &tx).await;
    }

    /// Pumps provider tokens through the framer until the reply ends.
    ///
    /// Returning drops the token receiver, which stops the provider stream.
    async fn relay(
        &self,
        request: &ChatRequest,
        framer: &mut MarkerFramer,
        text: &mut String,
        tx: &mpsc::Sender<WireEvent>,
        deadline: Instant,
    ) -> Outcome {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let mut tokens = tokio::select! {
            () = tx.closed() => return Outcome::Disconnected,
            () = &mut sleep => return Outcome::TimedOut,
            started = self.backend.stream_chat(request) => match started {
                Ok(tokens) => tokens,
                Err(e) => return Outcome::Failed(e),
            },
        };

        loop {
            tokio::select! {
                biased;
                () = tx.closed() => return Outcome::Disconnected,
                () = &mut sleep => return Outcome::TimedOut,
                token = tokens.recv() => match token {
                    Some(StreamingToken::Token(chunk)) => {
                        for event in framer.push(&chunk) {
                            if !forward(event, text, tx).await {
                                return Outcome::Disconnected;
                            }
                        }
                    }
                    Some(StreamingToken::Complete) | None => return Outcome::Completed,
                    Some(StreamingToken::Error(e)) => return Outcome::Failed(e),
                },
            }
        }
    }

    async fn finalize(
        &self,
        plan: &GenerationPlan,
        outcome: Outcome,
        framer: &mut MarkerFramer,
        text: &mut String,
        tx: &mpsc::Sender<WireEvent>,
    ) {
        let outcome_name = outcome.as_str();
        let connected = !matches!(outcome, Outcome::Disconnected);
        let completed = matches!(outcome, Outcome::Completed);
        for event in framer.finish() {
            if connected {
                forward(event, text, tx).await;
            } else {
                collect(&event, text);
            }
        }

        let is_follow_up = framer.is_follow_up().unwrap_or(false);
        if is_follow_up && !plan.follow_up.can_ask_follow_up {
            warn!(
                session_id = %plan.session_id,
                follow_ups = plan.follow_up.follow_ups_since_main,
                "AI asked a follow-up beyond the tier budget"
            );
        }

        let settings = &self.config.stream;
        let mut failure = match outcome {
            Outcome::Completed if framer.is_follow_up().is_none() => {
                Some(EngineError::MalformedReply("the AI returned an empty reply".to_string()))
            }
            Outcome::Completed => None,
            Outcome::Failed(e) => Some(EngineError::Upstream(e)),
            Outcome::TimedOut => Some(EngineError::Timeout {
                timeout_secs: settings.timeout_secs,
            }),
            Outcome::Disconnected => None,
        };
        let complete = completed && failure.is_none();

        let content = if complete {
            Some(std::mem::take(text))
        } else if text.chars().count() > settings.partial_save_min_chars {
            warn!(
                session_id = %plan.session_id,
                order_index = plan.slot.order_index,
                chars = text.chars().count(),
                outcome = outcome_name,
                "Saving partial question"
            );
            Some(format!("{text}{}", settings.truncation_marker))
        } else {
            if !text.is_empty() {
                debug!(session_id = %plan.session_id, "Discarding short partial output");
            }
            None
        };

        if let Some(content) = content {
            let draft = QuestionDraft {
                content,
                category: plan.category(is_follow_up),
                difficulty: plan.difficulty,
                is_follow_up,
                truncated: !complete,
            };
            if let Err(e) = self.save(plan, draft).await {
                error!(session_id = %plan.session_id, error = %e, "Failed to save question");
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) if connected => {
                warn!(session_id = %plan.session_id, error = %e, "Turn failed");
                let _ = tx.send(WireEvent::error(e.code(), e.to_string())).await;
            }
            Some(e) => warn!(session_id = %plan.session_id, error = %e, "Turn failed after disconnect"),
            None if connected => {
                info!(session_id = %plan.session_id, order_index = plan.slot.order_index, "Turn complete");
            }
            None => info!(session_id = %plan.session_id, "Client disconnected mid-turn"),
        }
    }

    async fn save(&self, plan: &GenerationPlan, draft: QuestionDraft) -> Result<()> {
        let order_index = plan.slot.order_index;
        self.store
            .transaction(plan.session_id, &mut |agg: &mut SessionAggregate| {
                agg.upsert_question(order_index, draft.clone(), Utc::now())
                    .map(|_| ())
            })
            .await
            .map(|_| ())
    }
}

/// Events for a turn refused because the question limit was reached.
fn ended_turn(answered_question_id: Option<Uuid>, capacity: usize) -> TurnHandle {
    let (tx, rx) = mpsc::channel(capacity);
    if let Some(id) = answered_question_id {
        let _ = tx.try_send(WireEvent::AnsweredQuestion {
            answered_question_id: id,
        });
    }
    let _ = tx.try_send(WireEvent::error(
        ErrorCode::SessionEnded,
        "The interview has reached its question limit",
    ));
    TurnHandle {
        events: rx,
        task: None,
    }
}

/// Sends a framed event, recording its content. Returns `false` if the client is gone.
async fn forward(event: WireEvent, text: &mut String, tx: &mpsc::Sender<WireEvent>) -> bool {
    collect(&event, text);
    tx.send(event).await.is_ok()
}

fn collect(event: &WireEvent, text: &mut String) {
    if let WireEvent::Content { content } = event {
        text.push_str(content);
    }
}

/// How the AI reply ended.
#[derive(Debug)]
enum Outcome {
    Completed,
    Failed(LlmError),
    TimedOut,
    Disconnected,
}

impl Outcome {
    const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Everything the generation task needs after admission.
#[derive(Debug, Clone)]
struct GenerationPlan {
    session_id: Uuid,
    slot: TurnSlot,
    follow_up: FollowUpContext,
    main_category: String,
    follow_up_category: Option<String>,
    difficulty: Difficulty,
    total: Option<u32>,
}

impl GenerationPlan {
    fn category(&self, is_follow_up: bool) -> String {
        if is_follow_up {
            self.follow_up_category
                .clone()
                .unwrap_or_else(|| self.main_category.clone())
        } else {
            self.main_category.clone()
        }
    }
}
