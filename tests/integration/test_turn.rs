//! End-to-end tests for interview turns through the HTTP router.
//!
//! Each test drives `POST /api/interview/stream` with a scripted AI backend
//! and checks both the streamed events and what the store committed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use mockview_client::{SseDecoder, SseFrame};
use mockview_engine::{
    create_router, AppState, CandidateProfile, Config, EndReason, ErrorBody, ErrorCode,
    MemoryStore, QuestionStatus, SessionAggregate, SessionStatus, SessionStore, StaticEnrichment,
    WireEvent, USER_ID_HEADER, USER_TIER_HEADER,
};
use mockview_llm::{ChatMessage, LlmError, ScriptedBackend, ScriptedReply};
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

const USER: &str = "candidate-1";
const START: &str = "__START_INTERVIEW__";
const SKIP: &str = "__SKIP_QUESTION__";

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    backend: ScriptedBackend,
    tier: &'static str,
}

fn app_with(config: Config, backend: ScriptedBackend, tier: &'static str) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let enrichment = StaticEnrichment::new().with_profile(CandidateProfile {
        user_id: USER.to_string(),
        name: "Sam Rivera".to_string(),
        skills: vec!["python".to_string(), "sql".to_string()],
        ..CandidateProfile::default()
    });
    let state = AppState::new(
        config,
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::new(backend.clone()),
        Arc::new(enrichment),
    );
    TestApp {
        router: create_router(state),
        store,
        backend,
        tier,
    }
}

fn app(backend: ScriptedBackend) -> TestApp {
    app_with(Config::default(), backend, "free")
}

fn main_question(text: &str) -> ScriptedReply {
    ScriptedReply::chunks(["[MAIN_QUESTION]\n".to_string(), text.to_string()])
}

impl TestApp {
    fn request(&self, method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_ID_HEADER, USER)
            .header(USER_TIER_HEADER, self.tier)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("Failed to build request")
    }

    async fn create_session(&self) -> Uuid {
        let response = self
            .router
            .clone()
            .oneshot(self.request(
                Method::POST,
                "/api/sessions",
                json!({"topics": ["python", "sql"], "difficulty": "mid"}),
            ))
            .await
            .expect("Request failed");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = read_json(response.into_body()).await;
        body["id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("Session id missing")
    }

    fn turn_request(&self, session_id: Uuid, messages: &[ChatMessage]) -> Request<Body> {
        self.request(
            Method::POST,
            "/api/interview/stream",
            json!({"sessionId": session_id, "messages": messages}),
        )
    }

    /// Runs one turn to completion and returns its events.
    async fn turn(&self, session_id: Uuid, messages: &[ChatMessage]) -> Vec<WireEvent> {
        let response = self
            .router
            .clone()
            .oneshot(self.turn_request(session_id, messages))
            .await
            .expect("Request failed");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        let mut frames = SseDecoder::new().push(&bytes).expect("Malformed stream");
        assert_eq!(frames.pop(), Some(SseFrame::Done), "stream must end with [DONE]");
        frames
            .into_iter()
            .map(|frame| match frame {
                SseFrame::Event(event) => event,
                SseFrame::Done => panic!("[DONE] before the end of the stream"),
            })
            .collect()
    }

    /// Runs a turn that is rejected before streaming.
    async fn rejected_turn(&self, session_id: Uuid, messages: &[ChatMessage]) -> (StatusCode, ErrorBody) {
        let response = self
            .router
            .clone()
            .oneshot(self.turn_request(session_id, messages))
            .await
            .expect("Request failed");
        let status = response.status();
        (status, read_json(response.into_body()).await)
    }

    async fn load(&self, session_id: Uuid) -> SessionAggregate {
        self.store
            .load(session_id)
            .await
            .expect("Store failed")
            .expect("Session missing")
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Invalid JSON body")
}

fn content(events: &[WireEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            WireEvent::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect()
}

fn answered_id(events: &[WireEvent]) -> Option<Uuid> {
    events.iter().find_map(|e| match e {
        WireEvent::AnsweredQuestion {
            answered_question_id,
        } => Some(*answered_question_id),
        _ => None,
    })
}

fn error_code(events: &[WireEvent]) -> Option<ErrorCode> {
    events.iter().find_map(|e| match e {
        WireEvent::Error { code, .. } => Some(*code),
        _ => None,
    })
}

/// A free-tier interview ends after five main questions without asking the AI for a sixth.
#[tokio::test]
async fn test_question_limit_ends_session_without_ai_call() {
    let app = app(ScriptedBackend::cycling([main_question(
        "How does a B-tree index speed up lookups?",
    )]));
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];

    for i in 0..5u32 {
        let events = app.turn(session_id, &messages).await;
        assert_eq!(error_code(&events), None);
        assert!(events.contains(&WireEvent::Progress {
            progress: mockview_engine::Progress {
                current: i + 1,
                total: Some(5)
            }
        }));
        messages.push(ChatMessage::assistant(content(&events)));
        messages.push(ChatMessage::user(format!("Answer number {i}")));
    }

    let events = app.turn(session_id, &messages).await;
    assert_eq!(events.len(), 2);
    assert!(answered_id(&events).is_some());
    assert_eq!(error_code(&events), Some(ErrorCode::SessionEnded));
    assert_eq!(app.backend.calls(), 5);

    let stored = app.load(session_id).await;
    assert_eq!(stored.session.status, SessionStatus::Completed);
    assert_eq!(stored.session.end_reason, Some(EndReason::QuestionLimit));
    assert_eq!(stored.session.question_count, 5);
    assert!(stored
        .questions
        .iter()
        .all(|q| q.status == QuestionStatus::Answered));
    assert_eq!(stored.questions[4].user_answer.as_deref(), Some("Answer number 4"));

    // The ended session rejects further turns.
    let (status, body) = app.rejected_turn(session_id, &messages).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.code, ErrorCode::SessionNotActive);
}

/// A follow-up marker split across chunks is still recognized.
#[tokio::test]
async fn test_split_follow_up_marker() {
    let app = app(ScriptedBackend::new([
        main_question("How would you design a job queue?"),
        ScriptedReply::chunks(["[FOLLOW", "_UP]\nWhat about concurrency?"]),
    ]));
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];
    let events = app.turn(session_id, &messages).await;
    messages.push(ChatMessage::assistant(content(&events)));
    messages.push(ChatMessage::user("A table with a status column and SKIP LOCKED."));

    let events = app.turn(session_id, &messages).await;
    let classifications: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            WireEvent::Classification { is_follow_up } => Some(*is_follow_up),
            _ => None,
        })
        .collect();
    assert_eq!(classifications, vec![true]);
    assert_eq!(content(&events), "What about concurrency?");

    let first_content = events
        .iter()
        .position(|e| matches!(e, WireEvent::Content { .. }))
        .expect("No content");
    let classification = events
        .iter()
        .position(|e| matches!(e, WireEvent::Classification { .. }))
        .expect("No classification");
    assert!(classification < first_content);

    let stored = app.load(session_id).await;
    assert_eq!(stored.questions.len(), 2);
    assert!(stored.questions[1].is_follow_up);
    assert_eq!(stored.questions[1].category, stored.questions[0].category);
    assert_eq!(stored.questions[1].content, "What about concurrency?");
    assert_eq!(stored.session.question_count, 1);
}

/// A client that disconnects mid-question leaves a truncated pending question behind.
#[tokio::test]
async fn test_disconnect_saves_truncated_partial() {
    let app = app(ScriptedBackend::new([ScriptedReply::chunks([
        "Describe how you would ",
        "shard a write-heavy Postgres ",
        "table across several nodes ",
        "without downtime, and ",
        "what you would monitor.",
    ])
    .with_delay(Duration::from_millis(10))
    .then_stall()]));
    let session_id = app.create_session().await;

    let response = app
        .router
        .clone()
        .oneshot(app.turn_request(session_id, &[ChatMessage::user(START)]))
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let mut decoder = SseDecoder::new();
    let mut received = String::new();
    while received.chars().count() < 80 {
        let chunk = body
            .next()
            .await
            .expect("Stream ended early")
            .expect("Body error");
        for frame in decoder.push(&chunk).expect("Malformed stream") {
            if let SseFrame::Event(WireEvent::Content { content }) = frame {
                received.push_str(&content);
            }
        }
    }
    drop(body);

    let marker = Config::default().stream.truncation_marker;
    let mut stored = None;
    for _ in 0..100 {
        let aggregate = app.load(session_id).await;
        if !aggregate.questions.is_empty() {
            stored = Some(aggregate);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stored = stored.expect("Partial question was not saved");

    let question = &stored.questions[0];
    assert_eq!(question.status, QuestionStatus::Pending);
    assert!(question.truncated);
    assert!(!question.is_follow_up);
    assert!(question.content.starts_with(&received));
    assert!(question.content.ends_with(&marker));

    // The provider stream is released once the turn ends.
    for _ in 0..100 {
        if app.backend.aborted_streams() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(app.backend.aborted_streams(), 1);
}

/// A real answer is persisted even when generating the next question times out.
#[tokio::test]
async fn test_answer_survives_timeout() {
    let mut config = Config::default();
    config.stream.timeout_secs = 1;
    let app = app_with(
        config,
        ScriptedBackend::new([
            main_question("What does the GIL protect?"),
            ScriptedReply::chunks(["[MAIN"]).then_stall(),
        ]),
        "free",
    );
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];
    let events = app.turn(session_id, &messages).await;
    messages.push(ChatMessage::assistant(content(&events)));
    messages.push(ChatMessage::user("Interpreter state during bytecode execution."));

    let events = app.turn(session_id, &messages).await;
    let question_id = answered_id(&events).expect("Answer was not acknowledged");
    assert!(matches!(events.first(), Some(WireEvent::AnsweredQuestion { .. })));
    assert_eq!(error_code(&events), Some(ErrorCode::Timeout));
    assert!(events.last().is_some_and(WireEvent::is_error));

    let stored = app.load(session_id).await;
    assert_eq!(stored.questions.len(), 1);
    assert_eq!(stored.questions[0].id, question_id);
    assert_eq!(stored.questions[0].status, QuestionStatus::Answered);
    assert_eq!(
        stored.questions[0].user_answer.as_deref(),
        Some("Interpreter state during bytecode execution.")
    );
}

/// Resending a turn targets the same question row.
#[tokio::test]
async fn test_retried_turn_is_idempotent() {
    let app = app(ScriptedBackend::new([
        main_question("What is a context manager?"),
        ScriptedReply::refuse(LlmError::Unavailable("connection reset".to_string())),
        main_question("How do generators differ from lists?"),
        main_question("When would you reach for a generator?"),
    ]));
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];
    let events = app.turn(session_id, &messages).await;
    messages.push(ChatMessage::assistant(content(&events)));
    messages.push(ChatMessage::user("An object with __enter__ and __exit__."));

    let failed = app.turn(session_id, &messages).await;
    let answered = answered_id(&failed).expect("Answer was not acknowledged");
    assert_eq!(error_code(&failed), Some(ErrorCode::UpstreamUnavailable));
    assert_eq!(app.load(session_id).await.questions.len(), 1);

    // The retry acknowledges the answer saved by the first attempt again.
    let retried = app.turn(session_id, &messages).await;
    assert_eq!(answered_id(&retried), Some(answered));
    assert_eq!(content(&retried), "How do generators differ from lists?");

    // Replaying a turn that already succeeded overwrites the same row.
    let replayed = app.turn(session_id, &messages).await;
    assert_eq!(error_code(&replayed), None);

    let stored = app.load(session_id).await;
    assert_eq!(stored.questions.len(), 2);
    assert_eq!(stored.questions[1].content, "When would you reach for a generator?");
    assert_eq!(stored.questions[1].status, QuestionStatus::Pending);
    assert_eq!(
        stored.questions[0].user_answer.as_deref(),
        Some("An object with __enter__ and __exit__.")
    );
    let pending = stored
        .questions
        .iter()
        .filter(|q| q.status == QuestionStatus::Pending)
        .count();
    assert_eq!(pending, 1);
}

/// A transcript that lags behind the stored questions is rejected.
#[tokio::test]
async fn test_stale_transcript_is_rejected() {
    let app = app(ScriptedBackend::cycling([main_question("Explain ACID.")]));
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];
    for answer in ["Atomicity and friends.", "Isolation levels."] {
        let events = app.turn(session_id, &messages).await;
        messages.push(ChatMessage::assistant(content(&events)));
        messages.push(ChatMessage::user(answer));
    }
    app.turn(session_id, &messages).await;

    let (status, body) = app.rejected_turn(session_id, &messages[..3]).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.code, ErrorCode::StaleTranscript);
    assert_eq!(app.backend.calls(), 3);
}

/// Skipping marks the question skipped; it cannot be evaluated.
#[tokio::test]
async fn test_skip_then_evaluation_is_refused() {
    let app = app(ScriptedBackend::cycling([main_question("What is a window function?")]));
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];
    let events = app.turn(session_id, &messages).await;
    messages.push(ChatMessage::assistant(content(&events)));
    messages.push(ChatMessage::user(SKIP));

    let events = app.turn(session_id, &messages).await;
    assert_eq!(answered_id(&events), None);
    assert_eq!(error_code(&events), None);

    let stored = app.load(session_id).await;
    assert_eq!(stored.questions[0].status, QuestionStatus::Skipped);
    assert_eq!(stored.questions[1].status, QuestionStatus::Pending);

    // The AI saw a plain-language stand-in, not the trigger.
    let request = app.backend.requests().pop().expect("No AI request");
    assert!(request.messages.iter().all(|m| m.content != SKIP));

    let response = app
        .router
        .clone()
        .oneshot(app.request(
            Method::POST,
            "/api/evaluations",
            json!({"questionId": stored.questions[0].id}),
        ))
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: ErrorBody = read_json(response.into_body()).await;
    assert_eq!(body.code, ErrorCode::NotAnswered);
}

/// An acknowledged answer can be graded, and the grade is stored.
#[tokio::test]
async fn test_answer_then_evaluate() {
    let app = app(ScriptedBackend::new([
        main_question("How do you find slow queries?"),
        main_question("What does EXPLAIN ANALYZE show?"),
        ScriptedReply::text(r#"Here you go: {"score": 7, "feedback": "Mentions the slow log."}"#),
    ]));
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];
    let events = app.turn(session_id, &messages).await;
    messages.push(ChatMessage::assistant(content(&events)));
    messages.push(ChatMessage::user("Turn on the slow query log."));
    let events = app.turn(session_id, &messages).await;
    let question_id = answered_id(&events).expect("Answer was not acknowledged");

    let response = app
        .router
        .clone()
        .oneshot(app.request(
            Method::POST,
            "/api/evaluations",
            json!({"questionId": question_id}),
        ))
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = read_json(response.into_body()).await;
    assert_eq!(body["score"], 7.0);
    assert_eq!(body["sessionScore"], 7.0);

    let stored = app.load(session_id).await;
    assert_eq!(stored.questions[0].status, QuestionStatus::Evaluated);
    assert_eq!(stored.session.total_score, Some(7.0));
}

/// Unlimited tiers report progress without a total.
#[tokio::test]
async fn test_premium_progress_has_no_total() {
    let app = app_with(
        Config::default(),
        ScriptedBackend::new([main_question("Design a URL shortener.")]),
        "premium",
    );
    let session_id = app.create_session().await;
    let events = app.turn(session_id, &[ChatMessage::user(START)]).await;
    assert!(events.contains(&WireEvent::Progress {
        progress: mockview_engine::Progress {
            current: 1,
            total: None
        }
    }));
}

/// Two submissions of the same turn at once leave a single pending question.
#[tokio::test]
async fn test_concurrent_double_submit_claims_one_row() {
    let app = app(ScriptedBackend::cycling([main_question(
        "How would you paginate a large result set?",
    )]));
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];
    for i in 0..4u32 {
        let events = app.turn(session_id, &messages).await;
        messages.push(ChatMessage::assistant(content(&events)));
        messages.push(ChatMessage::user(format!("Answer number {i}")));
    }
    assert_eq!(app.load(session_id).await.questions.len(), 4);

    let (first, second) = tokio::join!(
        app.turn(session_id, &messages),
        app.turn(session_id, &messages)
    );
    assert_eq!(error_code(&first), None);
    assert_eq!(error_code(&second), None);
    assert_eq!(answered_id(&first), answered_id(&second));

    let stored = app.load(session_id).await;
    assert_eq!(stored.questions.len(), 5);
    let pending = stored
        .questions
        .iter()
        .filter(|q| q.status == QuestionStatus::Pending)
        .count();
    assert_eq!(pending, 1);
    assert_eq!(stored.questions[4].status, QuestionStatus::Pending);
    assert!(stored.session.question_count <= 5);
    assert_eq!(stored.session.status, SessionStatus::InProgress);
}

/// Two submissions past the question limit end the session exactly once.
#[tokio::test]
async fn test_concurrent_submits_at_limit_end_session_once() {
    let app = app(ScriptedBackend::cycling([main_question("What is a covering index?")]));
    let session_id = app.create_session().await;
    let mut messages = vec![ChatMessage::user(START)];
    for i in 0..5u32 {
        let events = app.turn(session_id, &messages).await;
        messages.push(ChatMessage::assistant(content(&events)));
        messages.push(ChatMessage::user(format!("Answer number {i}")));
    }

    let (first, second) = tokio::join!(
        app.router.clone().oneshot(app.turn_request(session_id, &messages)),
        app.router.clone().oneshot(app.turn_request(session_id, &messages))
    );
    let mut statuses = [
        first.expect("Request failed").status(),
        second.expect("Request failed").status(),
    ];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
    assert_eq!(app.backend.calls(), 5);

    let stored = app.load(session_id).await;
    assert_eq!(stored.session.status, SessionStatus::Completed);
    assert_eq!(stored.session.end_reason, Some(EndReason::QuestionLimit));
    assert_eq!(stored.session.question_count, 5);
    assert_eq!(stored.questions.len(), 5);
}
