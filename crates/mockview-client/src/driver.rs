//! HTTP driver for interview turns.
//!
//! [`InterviewClient`] sends turns to a MockView server, feeds the SSE
//! stream through the [`Transcript`] reducer, retries retryable failures,
//! and grades answers in background tasks.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use mockview_engine::{
    CreateSessionRequest, EndAction, EndSessionRequest, ErrorBody, ErrorCode, EvaluateRequest,
    Evaluation, InterviewSession, Progress, Tier, Triggers, TurnRequest, WireEvent,
    USER_ID_HEADER, USER_TIER_HEADER,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::evaluation::EvaluationBook;
use crate::retry::RetryPolicy;
use crate::sse::{SseDecoder, SseFrame};
use crate::transcript::{ClientEvent, Effect, Transcript};
use crate::{ClientError, Result};

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A new question was streamed.
    Question {
        /// Full question text.
        content: String,
        /// `true` for a follow-up.
        is_follow_up: bool,
        /// Progress reported with the question.
        progress: Option<Progress>,
    },
    /// The server ended the session instead of asking another question.
    SessionEnded,
}

#[derive(Clone)]
struct Connection {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    tier: Tier,
}

impl Connection {
    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.base_url.trim_end_matches('/'))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.url(path))
            .header(USER_ID_HEADER, &self.user_id)
            .header(USER_TIER_HEADER, self.tier.as_str())
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        receive_json(self.post(path).json(body)).await
    }
}

async fn receive_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(server_error(response).await);
    }
    Ok(response.json().await?)
}

async fn server_error(response: reqwest::Response) -> ClientError {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => ClientError::Server {
            code: body.code,
            message: body.error,
        },
        Err(_) => ClientError::Server {
            code: ErrorCode::Unknown,
            message: format!("HTTP {status}"),
        },
    }
}

/// Upper bound on one grading request.
const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for one candidate's interview.
pub struct InterviewClient {
    conn: Connection,
    retry: RetryPolicy,
    evaluation_timeout: Duration,
    triggers: Triggers,
    session_id: Option<Uuid>,
    transcript: Transcript,
    evaluations: Arc<Mutex<EvaluationBook>>,
    tasks: JoinSet<()>,
}

impl std::fmt::Debug for InterviewClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterviewClient")
            .field("base_url", &self.conn.base_url)
            .field("user_id", &self.conn.user_id)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl InterviewClient {
    /// Creates a client talking to the server at `base_url`.
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>, tier: Tier) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            conn: Connection {
                http,
                base_url: base_url.into(),
                user_id: user_id.into(),
                tier,
            },
            retry: RetryPolicy::default(),
            evaluation_timeout: DEFAULT_EVALUATION_TIMEOUT,
            triggers: Triggers::default(),
            session_id: None,
            transcript: Transcript::new(),
            evaluations: Arc::new(Mutex::new(EvaluationBook::new())),
            tasks: JoinSet::new(),
        })
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bounds each grading request; a request that runs longer is marked failed.
    #[must_use]
    pub const fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    /// Replaces the start and skip triggers.
    #[must_use]
    pub fn with_triggers(mut self, triggers: Triggers) -> Self {
        self.triggers = triggers;
        self
    }

    /// Attaches to an existing session with a fresh transcript.
    pub fn attach(&mut self, session_id: Uuid) {
        self.session_id = Some(session_id);
        self.transcript = Transcript::new();
    }

    /// Creates a session and attaches to it.
    pub async fn create_session(&mut self, request: &CreateSessionRequest) -> Result<InterviewSession> {
        let session: InterviewSession = self.conn.post_json("/sessions", request).await?;
        info!(session_id = %session.id, "Session created");
        self.attach(session.id);
        Ok(session)
    }

    /// Ends the attached session.
    pub async fn end_session(&self, status: EndAction) -> Result<InterviewSession> {
        let session_id = self.session_id()?;
        self.conn
            .post_json(&format!("/sessions/{session_id}/end"), &EndSessionRequest { status })
            .await
    }

    /// Opens the interview and streams the first question.
    pub async fn start(&mut self) -> Result<TurnOutcome> {
        let trigger = self.triggers.start.clone();
        self.send(trigger).await
    }

    /// Answers the current question and streams the next one.
    pub async fn answer(&mut self, text: impl Into<String>) -> Result<TurnOutcome> {
        self.send(text.into()).await
    }

    /// Skips the current question and streams the next one.
    pub async fn skip(&mut self) -> Result<TurnOutcome> {
        let trigger = self.triggers.skip.clone();
        self.send(trigger).await
    }

    /// The visible transcript.
    #[must_use]
    pub const fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Snapshot of the evaluation results.
    #[must_use]
    pub fn evaluations(&self) -> EvaluationBook {
        self.evaluations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits for every background evaluation to finish.
    pub async fn settle_evaluations(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Re-grades an answer whose evaluation failed.
    pub fn retry_evaluation(&mut self, message_id: Uuid) -> Result<()> {
        let question_id = self
            .evaluations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retry_target(message_id)
            .ok_or_else(|| ClientError::State(format!("no failed evaluation for {message_id}")))?;
        self.spawn_evaluation(message_id, question_id);
        Ok(())
    }

    fn session_id(&self) -> Result<Uuid> {
        self.session_id
            .ok_or_else(|| ClientError::State("no session attached".to_string()))
    }

    async fn send(&mut self, content: String) -> Result<TurnOutcome> {
        let session_id = self.session_id()?;
        if self.transcript.is_ended() {
            return Ok(TurnOutcome::SessionEnded);
        }
        self.transcript.apply(ClientEvent::UserMessage {
            id: Uuid::new_v4(),
            content,
        });

        let mut failures = 0;
        loop {
            match self.stream_turn(session_id).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) => {
                    failures += 1;
                    let code = error.code();
                    let Some(delay) = self.retry.next_retry(code, failures) else {
                        warn!(code = %code, failures, error = %error, "Turn failed");
                        return Err(error);
                    };
                    warn!(
                        code = %code,
                        attempt = failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Retrying turn"
                    );
                    self.transcript
                        .apply(ClientEvent::RetryScheduled { attempt: failures });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn stream_turn(&mut self, session_id: Uuid) -> Result<TurnOutcome> {
        let request = TurnRequest {
            session_id,
            messages: self.transcript.outgoing(),
        };
        self.transcript.apply(ClientEvent::TurnStarted);

        let response = match self.conn.post("/interview/stream").json(&request).send().await {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e.into())),
        };
        if !response.status().is_success() {
            let error = server_error(response).await;
            return Err(self.fail(error));
        }

        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();
        let mut done = false;
        let mut stream_error = None;

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return Err(self.fail(e.into())),
            };
            let frames = match decoder.push(&bytes) {
                Ok(frames) => frames,
                Err(e) => return Err(self.fail(e)),
            };
            for frame in frames {
                done |= self.handle_frame(frame, &mut stream_error);
            }
        }
        match decoder.finish() {
            Ok(Some(frame)) => done |= self.handle_frame(frame, &mut stream_error),
            Ok(None) => {}
            Err(e) => return Err(self.fail(e)),
        }

        if !done {
            return Err(self.fail(ClientError::Transport(
                "stream ended without [DONE]".to_string(),
            )));
        }
        self.transcript.apply(ClientEvent::TurnCompleted);

        match stream_error {
            Some((ErrorCode::SessionEnded, _)) => Ok(TurnOutcome::SessionEnded),
            Some((code, message)) => Err(ClientError::Server { code, message }),
            None => {
                let content = self
                    .transcript
                    .last_question()
                    .map(|m| m.content.clone())
                    .unwrap_or_default();
                Ok(TurnOutcome::Question {
                    content,
                    is_follow_up: self.transcript.is_follow_up().unwrap_or(false),
                    progress: self.transcript.progress(),
                })
            }
        }
    }

    /// Applies one frame; returns `true` for the terminator.
    fn handle_frame(&mut self, frame: SseFrame, stream_error: &mut Option<(ErrorCode, String)>) -> bool {
        match frame {
            SseFrame::Done => true,
            SseFrame::Event(event) => {
                if let WireEvent::Error { error, code } = &event {
                    *stream_error = Some((*code, error.clone()));
                }
                if let Some(Effect::Evaluate {
                    message_id,
                    question_id,
                }) = self.transcript.apply(ClientEvent::Wire(event))
                {
                    // A retried turn acknowledges the same answer again.
                    let known = self
                        .evaluations
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .is_settled_or_running(message_id);
                    if !known {
                        self.spawn_evaluation(message_id, question_id);
                    }
                }
                false
            }
        }
    }

    fn fail(&mut self, error: ClientError) -> ClientError {
        self.transcript.apply(ClientEvent::TurnFailed {
            code: error.code(),
            message: error.to_string(),
        });
        error
    }

    fn spawn_evaluation(&mut self, message_id: Uuid, question_id: Uuid) {
        self.evaluations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .start(message_id, question_id);

        let request = self
            .conn
            .post("/evaluations")
            .timeout(self.evaluation_timeout)
            .json(&EvaluateRequest { question_id });
        let book = Arc::clone(&self.evaluations);
        self.tasks.spawn(async move {
            let result: Result<Evaluation> = receive_json(request).await;
            let mut book = book.lock().unwrap_or_else(PoisonError::into_inner);
            match result {
                Ok(evaluation) => {
                    debug!(question_id = %question_id, score = evaluation.score, "Answer graded");
                    book.complete(message_id, evaluation);
                }
                Err(e) => {
                    warn!(question_id = %question_id, error = %e, "Evaluation failed");
                    book.fail(message_id, question_id, e.to_string());
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_and_state() {
        let client = InterviewClient::new("http://localhost:3000/", "u1", Tier::Free).unwrap();
        assert_eq!(
            client.conn.url("/interview/stream"),
            "http://localhost:3000/api/interview/stream"
        );
        assert!(matches!(client.session_id(), Err(ClientError::State(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried_then_surfaced() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = InterviewClient::new(format!("http://{addr}"), "u1", Tier::Free)
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
                ..RetryPolicy::default()
            });
        client.attach(Uuid::new_v4());

        let err = client.start().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);
        assert_eq!(client.transcript().retry_attempt(), 2);
        assert_eq!(client.transcript().messages().len(), 1);
    }
}
