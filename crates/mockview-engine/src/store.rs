//! Session storage.
//!
//! The [`SessionStore`] trait is the only way the engine reads or writes
//! sessions. All mutation goes through [`SessionStore::transaction`], which
//! runs a closure against a private copy of the session aggregate and
//! commits it atomically when the closure succeeds.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Datelike;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::session::{EndReason, InterviewSession, Question, SessionAggregate, SessionStatus};

/// Unit of work run inside a store transaction.
pub type Work<'a> = dyn FnMut(&mut SessionAggregate) -> Result<()> + Send + 'a;

/// Persistence contract for interview sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new session after enforcing the monthly quota.
    ///
    /// Counting the caller's sessions for the calendar month of
    /// `session.created_at`, abandoning existing in-progress sessions (when
    /// `abandon_existing` is set), and inserting happen atomically.
    async fn create_session(
        &self,
        session: InterviewSession,
        monthly_limit: Option<u32>,
        abandon_existing: bool,
    ) -> Result<InterviewSession>;

    /// Loads a session and its questions.
    async fn load(&self, session_id: Uuid) -> Result<Option<SessionAggregate>>;

    /// Runs `work` against the session atomically and returns the committed state.
    ///
    /// `work` may be invoked more than once if the store retries on conflict.
    /// Returning `Err` discards every change made by `work`.
    async fn transaction(&self, session_id: Uuid, work: &mut Work<'_>) -> Result<SessionAggregate>;

    /// Finds a question by its evaluation reference, returning it with its session id.
    async fn find_question(&self, question_id: Uuid) -> Result<Option<(Uuid, Question)>>;

    /// Lists a user's sessions, newest first.
    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<InterviewSession>>;
}

/// Runs `work` in a transaction and returns its output along with the committed state.
pub async fn transact<T, F>(
    store: &dyn SessionStore,
    session_id: Uuid,
    mut work: F,
) -> Result<(SessionAggregate, T)>
where
    T: Send,
    F: FnMut(&mut SessionAggregate) -> Result<T> + Send,
{
    let mut output = None;
    let committed = store
        .transaction(session_id, &mut |aggregate: &mut SessionAggregate| {
            output = Some(work(aggregate)?);
            Ok(())
        })
        .await?;
    let output =
        output.ok_or_else(|| EngineError::store("transaction committed without running"))?;
    Ok((committed, output))
}

/// In-process store backed by a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, SessionAggregate>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        session: InterviewSession,
        monthly_limit: Option<u32>,
        abandon_existing: bool,
    ) -> Result<InterviewSession> {
        let mut sessions = self.sessions.lock().await;
        let created = session.created_at;

        if let Some(limit) = monthly_limit {
            let this_month = sessions
                .values()
                .filter(|a| a.session.user_id == session.user_id)
                .filter(|a| {
                    a.session.created_at.year() == created.year()
                        && a.session.created_at.month() == created.month()
                })
                .count();
            if this_month >= limit as usize {
                return Err(EngineError::QuotaExceeded { limit });
            }
        }

        if abandon_existing {
            for aggregate in sessions.values_mut().filter(|a| {
                a.session.user_id == session.user_id
                    && a.session.status == SessionStatus::InProgress
            }) {
                aggregate.finish(SessionStatus::Abandoned, EndReason::Superseded, created)?;
                info!(session_id = %aggregate.session.id, "Superseded in-progress session");
            }
        }

        debug!(session_id = %session.id, user_id = %session.user_id, "Inserting session");
        sessions.insert(session.id, SessionAggregate::new(session.clone()));
        Ok(session)
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<SessionAggregate>> {
        Ok(self.sessions.lock().await.get(&session_id).cloned())
    }

    async fn transaction(&self, session_id: Uuid, work: &mut Work<'_>) -> Result<SessionAggregate> {
        let mut sessions = self.sessions.lock().await;
        let stored = sessions
            .get_mut(&session_id)
            .ok_or(EngineError::SessionNotFound(session_id))?;

        let mut draft = stored.clone();
        work(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    async fn find_question(&self, question_id: Uuid) -> Result<Option<(Uuid, Question)>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.values().find_map(|a| {
            a.questions
                .iter()
                .find(|q| q.id == question_id)
                .map(|q| (a.session.id, q.clone()))
        }))
    }

    async fn sessions_for_user(&self, user_id: &str) -> Result<Vec<InterviewSession>> {
        let sessions = self.sessions.lock().await;
        let mut owned: Vec<InterviewSession> = sessions
            .values()
            .filter(|a| a.session.user_id == user_id)
            .map(|a| a.session.clone())
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}
