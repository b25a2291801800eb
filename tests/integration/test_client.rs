//! Integration tests for the stream client against a live server.
//!
//! These tests bind a real socket, serve the router, and drive interviews
//! through `InterviewClient` the way a front end would.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockview_client::{ClientError, EvaluationState, InterviewClient, RetryPolicy, TurnOutcome};
use mockview_engine::{
    create_router, AppState, CandidateProfile, Config, CreateSessionRequest, Difficulty,
    EndAction, ErrorCode, InterviewType, MemoryStore, QuestionStatus, SessionStatus, SessionStore,
    StaticEnrichment, Tier, USER_ID_HEADER, USER_TIER_HEADER,
};
use mockview_llm::{
    ChatBackend, ChatMessage, ChatRequest, LlmError, Result as LlmResult, ScriptedBackend,
    ScriptedReply, StreamingToken,
};
use serde_json::json;
use tokio::sync::mpsc;

const USER: &str = "candidate-1";

/// Serves interview questions and grades from separate scripts.
#[derive(Clone, Default)]
struct RoutingBackend {
    questions: ScriptedBackend,
    grades: ScriptedBackend,
}

#[async_trait]
impl ChatBackend for RoutingBackend {
    fn name(&self) -> &str {
        "routing"
    }

    async fn stream_chat(&self, request: &ChatRequest) -> LlmResult<mpsc::Receiver<StreamingToken>> {
        let grading = request
            .system_prompt()
            .is_some_and(|p| p.starts_with("You are grading"));
        if grading {
            self.grades.stream_chat(request).await
        } else {
            self.questions.stream_chat(request).await
        }
    }
}

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns the test server and returns its base URL.
async fn spawn_test_server(
    config: Config,
    backend: RoutingBackend,
    store: Arc<MemoryStore>,
) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let enrichment = StaticEnrichment::new().with_profile(CandidateProfile {
        user_id: USER.to_string(),
        name: "Sam Rivera".to_string(),
        ..CandidateProfile::default()
    });
    let state = AppState::new(
        config,
        store as Arc<dyn SessionStore>,
        Arc::new(backend),
        Arc::new(enrichment),
    );
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), handle)
}

fn session_request() -> CreateSessionRequest {
    CreateSessionRequest {
        topics: vec!["python".to_string()],
        difficulty: Difficulty::Mid,
        interview_type: InterviewType::Technical,
        position_id: None,
        company_style: None,
        resume_edit_id: None,
        abandon_existing: false,
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: 5,
        ..RetryPolicy::default()
    }
}

fn main_question(text: &str) -> ScriptedReply {
    ScriptedReply::chunks(["[MAIN_QUESTION]\n".to_string(), text.to_string()])
}

/// A full interview: questions stream in and answers are graded in the background.
#[tokio::test]
async fn test_interview_with_background_grading() {
    let backend = RoutingBackend {
        questions: ScriptedBackend::new([
            main_question("What is a decorator?"),
            ScriptedReply::chunks(["[FOLLOW_UP]\n", "Can decorators take arguments?"]),
        ]),
        grades: ScriptedBackend::new([ScriptedReply::text(
            r#"{"score": 6, "feedback": "Correct but brief."}"#,
        )]),
    };
    let store = Arc::new(MemoryStore::new());
    let (url, server) = spawn_test_server(Config::default(), backend, Arc::clone(&store)).await;

    let mut client = InterviewClient::new(&url, USER, Tier::Free).expect("Client");
    let session = client
        .create_session(&session_request())
        .await
        .expect("Failed to create session");

    let first = client.start().await.expect("Start failed");
    assert_eq!(
        first,
        TurnOutcome::Question {
            content: "What is a decorator?".to_string(),
            is_follow_up: false,
            progress: Some(mockview_engine::Progress {
                current: 1,
                total: Some(5)
            }),
        }
    );

    let second = client
        .answer("A function that wraps another function.")
        .await
        .expect("Answer failed");
    assert!(matches!(second, TurnOutcome::Question { is_follow_up: true, .. }));

    client.settle_evaluations().await;
    let answer_id = client.transcript().messages()[2].id;
    match client.evaluations().get(answer_id) {
        Some(EvaluationState::Done(evaluation)) => {
            assert!((evaluation.score - 6.0).abs() < f32::EPSILON);
            assert_eq!(evaluation.feedback, "Correct but brief.");
        }
        other => panic!("Unexpected evaluation state: {other:?}"),
    }

    let stored = store
        .load(session.id)
        .await
        .expect("Store failed")
        .expect("Session missing");
    assert_eq!(stored.questions[0].status, QuestionStatus::Evaluated);
    assert_eq!(stored.questions[1].status, QuestionStatus::Pending);

    let ended = client
        .end_session(EndAction::Completed)
        .await
        .expect("End failed");
    assert_eq!(ended.status, SessionStatus::Completed);

    server.abort();
}

/// A turn that fails mid-stream is retried, replacing the saved partial.
#[tokio::test]
async fn test_retry_replaces_partial_question() {
    let questions = ScriptedBackend::new([
        ScriptedReply::chunks([
            "[MAIN_QUESTION]\n",
            "Explain how asyncio schedules coroutines ",
        ])
        .then_fail(LlmError::Unavailable("connection reset".to_string())),
        main_question("Explain how asyncio schedules coroutines on the event loop."),
    ]);
    let backend = RoutingBackend {
        questions: questions.clone(),
        grades: ScriptedBackend::default(),
    };
    let store = Arc::new(MemoryStore::new());
    let (url, server) = spawn_test_server(Config::default(), backend, Arc::clone(&store)).await;

    let mut client = InterviewClient::new(&url, USER, Tier::Free)
        .expect("Client")
        .with_retry_policy(fast_retries());
    let session = client
        .create_session(&session_request())
        .await
        .expect("Failed to create session");

    let outcome = client.start().await.expect("Start failed");
    assert!(matches!(outcome, TurnOutcome::Question { .. }));
    assert_eq!(questions.calls(), 2);

    // The failed partial was discarded on the client.
    let messages = client.transcript().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1].content,
        "Explain how asyncio schedules coroutines on the event loop."
    );
    assert_eq!(client.transcript().retry_attempt(), 0);

    // And overwritten on the server.
    let stored = store
        .load(session.id)
        .await
        .expect("Store failed")
        .expect("Session missing");
    assert_eq!(stored.questions.len(), 1);
    assert!(!stored.questions[0].truncated);

    server.abort();
}

/// Non-retryable failures surface immediately.
#[tokio::test]
async fn test_quota_and_session_end_are_not_retried() {
    let mut config = Config::default();
    config.tiers.free.question_limit = Some(1);
    config.tiers.free.monthly_session_limit = Some(1);
    let questions = ScriptedBackend::new([main_question("What is a tuple?")]);
    let backend = RoutingBackend {
        questions: questions.clone(),
        grades: ScriptedBackend::cycling([ScriptedReply::text(r#"{"score": 5}"#)]),
    };
    let (url, server) =
        spawn_test_server(config, backend, Arc::new(MemoryStore::new())).await;

    let mut client = InterviewClient::new(&url, USER, Tier::Free)
        .expect("Client")
        .with_retry_policy(fast_retries());
    client
        .create_session(&session_request())
        .await
        .expect("Failed to create session");

    client.start().await.expect("Start failed");
    let outcome = client.answer("An immutable sequence.").await.expect("Answer failed");
    assert_eq!(outcome, TurnOutcome::SessionEnded);
    assert!(client.transcript().is_ended());
    assert_eq!(questions.calls(), 1);

    // The last answer is still graded.
    client.settle_evaluations().await;
    let answer_id = client.transcript().messages()[2].id;
    assert!(matches!(
        client.evaluations().get(answer_id),
        Some(EvaluationState::Done(_))
    ));

    let err = client
        .create_session(&session_request())
        .await
        .expect_err("Quota should be exhausted");
    assert!(matches!(
        err,
        ClientError::Server {
            code: ErrorCode::QuotaExceeded,
            ..
        }
    ));

    server.abort();
}

/// Retries stop after the configured number of attempts.
#[tokio::test]
async fn test_retries_are_bounded() {
    let questions = ScriptedBackend::cycling([ScriptedReply::refuse(LlmError::RateLimited(
        "slow down".to_string(),
    ))]);
    let backend = RoutingBackend {
        questions: questions.clone(),
        grades: ScriptedBackend::default(),
    };
    let (url, server) =
        spawn_test_server(Config::default(), backend, Arc::new(MemoryStore::new())).await;

    let mut client = InterviewClient::new(&url, USER, Tier::Free)
        .expect("Client")
        .with_retry_policy(RetryPolicy {
            max_attempts: 2,
            ..fast_retries()
        });
    client
        .create_session(&session_request())
        .await
        .expect("Failed to create session");

    let err = client.start().await.expect_err("Turn should fail");
    assert_eq!(err.code(), ErrorCode::UpstreamRateLimited);
    assert_eq!(questions.calls(), 3);
    assert_eq!(
        client.transcript().error().map(|(code, _)| code),
        Some(ErrorCode::UpstreamRateLimited)
    );

    server.abort();
}

/// An answer whose acknowledgement was lost is still graded after the retry.
#[tokio::test]
async fn test_lost_acknowledgement_is_repeated_on_retry() {
    let grades = ScriptedBackend::new([ScriptedReply::text(
        r#"{"score": 8, "feedback": "Clear explanation."}"#,
    )]);
    let backend = RoutingBackend {
        questions: ScriptedBackend::new([
            main_question("What is a decorator?"),
            main_question("When does a decorator run?"),
            main_question("What does functools.wraps preserve?"),
        ]),
        grades: grades.clone(),
    };
    let store = Arc::new(MemoryStore::new());
    let (url, server) = spawn_test_server(Config::default(), backend, Arc::clone(&store)).await;

    let mut client = InterviewClient::new(&url, USER, Tier::Free).expect("Client");
    let session = client
        .create_session(&session_request())
        .await
        .expect("Failed to create session");
    client.start().await.expect("Start failed");

    // An earlier attempt of the same turn reached the server, but its
    // stream never made it back to this client.
    let answer = "A function that wraps another function.";
    let messages = [
        ChatMessage::user("__START_INTERVIEW__"),
        ChatMessage::assistant("What is a decorator?"),
        ChatMessage::user(answer),
    ];
    let lost = reqwest::Client::new()
        .post(format!("{url}/api/interview/stream"))
        .header(USER_ID_HEADER, USER)
        .header(USER_TIER_HEADER, "free")
        .json(&json!({"sessionId": session.id, "messages": messages}))
        .send()
        .await
        .expect("Request failed");
    assert!(lost.status().is_success());
    lost.text().await.expect("Failed to read stream");

    let outcome = client.answer(answer).await.expect("Answer failed");
    assert_eq!(
        outcome,
        TurnOutcome::Question {
            content: "What does functools.wraps preserve?".to_string(),
            is_follow_up: false,
            progress: Some(mockview_engine::Progress {
                current: 2,
                total: Some(5)
            }),
        }
    );

    client.settle_evaluations().await;
    let answer_id = client.transcript().messages()[2].id;
    assert!(matches!(
        client.evaluations().get(answer_id),
        Some(EvaluationState::Done(evaluation)) if (evaluation.score - 8.0).abs() < f32::EPSILON
    ));
    assert_eq!(grades.calls(), 1);

    let stored = store
        .load(session.id)
        .await
        .expect("Store failed")
        .expect("Session missing");
    assert_eq!(stored.questions.len(), 2);
    assert_eq!(stored.questions[0].status, QuestionStatus::Evaluated);

    server.abort();
}

/// A stalled grading request fails on the client and can be retried.
#[tokio::test]
async fn test_stalled_evaluation_times_out_and_retries() {
    let grades = ScriptedBackend::new([
        ScriptedReply::chunks([r#"{"score": "#]).then_stall(),
        ScriptedReply::text(r#"{"score": 4, "feedback": "Missing the trade-offs."}"#),
    ]);
    let backend = RoutingBackend {
        questions: ScriptedBackend::cycling([main_question("What is a generator?")]),
        grades: grades.clone(),
    };
    let (url, server) =
        spawn_test_server(Config::default(), backend, Arc::new(MemoryStore::new())).await;

    let mut client = InterviewClient::new(&url, USER, Tier::Free)
        .expect("Client")
        .with_evaluation_timeout(Duration::from_millis(200));
    client
        .create_session(&session_request())
        .await
        .expect("Failed to create session");
    client.start().await.expect("Start failed");
    client
        .answer("A lazily evaluated iterator.")
        .await
        .expect("Answer failed");

    client.settle_evaluations().await;
    let answer_id = client.transcript().messages()[2].id;
    assert!(matches!(
        client.evaluations().get(answer_id),
        Some(EvaluationState::Failed { .. })
    ));

    client.retry_evaluation(answer_id).expect("Nothing to retry");
    client.settle_evaluations().await;
    assert!(matches!(
        client.evaluations().get(answer_id),
        Some(EvaluationState::Done(evaluation)) if (evaluation.score - 4.0).abs() < f32::EPSILON
    ));
    assert_eq!(grades.calls(), 2);

    server.abort();
}
