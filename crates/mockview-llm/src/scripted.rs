//! Deterministic backend that replays scripted replies.
//!
//! Used by `mockview --offline` and by tests that need exact control over
//! chunk boundaries, delays, and failures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{ChatBackend, ChatRequest, LlmError, Result, StreamingToken};

/// How a scripted reply ends after its chunks are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ending {
    Complete,
    Fail(LlmError),
    Stall,
}

/// One scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedReply {
    /// Refuse the request before streaming anything.
    refuse: Option<LlmError>,
    chunks: Vec<String>,
    delay: Duration,
    ending: Ending,
}

impl ScriptedReply {
    /// A reply streamed as the given chunks.
    #[must_use]
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            refuse: None,
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            ending: Ending::Complete,
        }
    }

    /// A reply streamed as a single chunk.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::chunks([text.into()])
    }

    /// A request the provider refuses outright.
    #[must_use]
    pub fn refuse(error: LlmError) -> Self {
        Self {
            refuse: Some(error),
            ..Self::chunks(Vec::<String>::new())
        }
    }

    /// Waits `delay` before each chunk.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Ends the stream with an error after the chunks.
    #[must_use]
    pub fn then_fail(mut self, error: LlmError) -> Self {
        self.ending = Ending::Fail(error);
        self
    }

    /// Keeps the stream open after the chunks until the receiver is dropped.
    #[must_use]
    pub fn then_stall(mut self) -> Self {
        self.ending = Ending::Stall;
        self
    }
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    cycle: bool,
    requests: Vec<ChatRequest>,
}

/// Chat backend replaying a queue of [`ScriptedReply`] values.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    aborted: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    /// Replays `replies` once each, in order; further requests fail as unavailable.
    #[must_use]
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self::build(replies, false)
    }

    /// Replays `replies` in a loop.
    #[must_use]
    pub fn cycling(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self::build(replies, true)
    }

    /// A looping set of canned interview questions for offline demos.
    #[must_use]
    pub fn demo() -> Self {
        Self::cycling([
            ScriptedReply::chunks([
                "[MAIN_QUESTION]\n",
                "Walk me through how you would design ",
                "a rate limiter for a public API.",
            ])
            .with_delay(Duration::from_millis(40)),
            ScriptedReply::chunks([
                "[FOLLOW",
                "_UP]\nHow would that design change ",
                "when the API runs on several instances?",
            ])
            .with_delay(Duration::from_millis(40)),
            ScriptedReply::chunks([
                "[MAIN_QUESTION]\n",
                "Tell me about a time you had to debug ",
                "a production incident under pressure.",
            ])
            .with_delay(Duration::from_millis(40)),
        ])
    }

    fn build(replies: impl IntoIterator<Item = ScriptedReply>, cycle: bool) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: replies.into_iter().collect(),
                cycle,
                requests: Vec::new(),
            })),
            aborted: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Appends a reply to the queue.
    pub fn push(&self, reply: ScriptedReply) {
        self.lock().replies.push_back(reply);
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.lock().requests.len()
    }

    /// Copies of every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.lock().requests.clone()
    }

    /// Number of streams whose receiver was dropped before the reply ended.
    #[must_use]
    pub fn aborted_streams(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, request: &ChatRequest) -> Option<ScriptedReply> {
        let mut script = self.lock();
        script.requests.push(request.clone());
        let reply = script.replies.pop_front()?;
        if script.cycle {
            script.replies.push_back(reply.clone());
        }
        Some(reply)
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: &ChatRequest) -> Result<mpsc::Receiver<StreamingToken>> {
        let reply = self
            .next_reply(request)
            .ok_or_else(|| LlmError::Unavailable("script exhausted".to_string()))?;
        if let Some(error) = reply.refuse {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(16);
        let aborted = Arc::clone(&self.aborted);

        tokio::spawn(async move {
            for chunk in reply.chunks {
                if !reply.delay.is_zero() {
                    tokio::time::sleep(reply.delay).await;
                }
                if tx.send(StreamingToken::Token(chunk)).await.is_err() {
                    aborted.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
            match reply.ending {
                Ending::Complete => {
                    let _ = tx.send(StreamingToken::Complete).await;
                }
                Ending::Fail(error) => {
                    let _ = tx.send(StreamingToken::Error(error)).await;
                }
                Ending::Stall => {
                    tx.closed().await;
                    debug!("stalled scripted stream released by receiver");
                    aborted.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        Ok(rx)
    }
}
