//! Session store
//!
//! One `Session` per conversation: its `ConversationState` and transcript.
//! Sessions never share state with each other. In-memory only; a session
//! lives as long as the process.

use crate::error::AdvisorError;
use crate::memory::Transcript;
use crate::models::{ConversationState, Stage};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug)]
pub struct Session {
    pub session_id: Uuid,
    pub state: ConversationState,
    pub transcript: Transcript,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            state: ConversationState::new(),
            transcript: Transcript::default(),
            created_at: Utc::now(),
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id,
            stage: self.state.stage(),
            state: self.state.clone(),
            transcript: self.transcript.clone(),
            created_at: self.created_at,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub stage: Stage,
    pub state: ConversationState,
    pub transcript: Transcript,
    pub created_at: DateTime<Utc>,
}

/// Locked per session so one slow turn never blocks other sessions
pub type SessionHandle = Arc<Mutex<Session>>;

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self) -> Result<(Uuid, SessionHandle)>;
    async fn get(&self, session_id: Uuid) -> Result<SessionHandle>;
    async fn remove(&self, session_id: Uuid) -> Result<()>;
    async fn count(&self) -> usize;
}

/// In-memory session store
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self) -> Result<(Uuid, SessionHandle)> {
        let session = Session::new();
        let session_id = session.session_id;
        let handle = Arc::new(Mutex::new(session));

        self.sessions
            .write()
            .await
            .insert(session_id, Arc::clone(&handle));

        Ok((session_id, handle))
    }

    async fn get(&self, session_id: Uuid) -> Result<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| AdvisorError::SessionNotFound(session_id.to_string()))
    }

    async fn remove(&self, session_id: Uuid) -> Result<()> {
        self.sessions
            .write()
            .await
            .remove(&session_id)
            .map(|_| ())
            .ok_or_else(|| AdvisorError::SessionNotFound(session_id.to_string()))
    }

    async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemorySessionStore::new();
        let (id, handle) = store.create().await.unwrap();

        handle.lock().await.transcript.user("hi");

        let fetched = store.get(id).await.unwrap();
        let session = fetched.lock().await;
        assert_eq!(session.session_id, id);
        assert_eq!(session.state.stage(), Stage::Greeting);
        assert_eq!(session.transcript.len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemorySessionStore::new();
        let (a, handle_a) = store.create().await.unwrap();
        let (b, _) = store.create().await.unwrap();

        handle_a.lock().await.transcript.user("only in a");

        assert_ne!(a, b);
        assert_eq!(store.count().await, 2);
        assert!(store.get(b).await.unwrap().lock().await.transcript.is_empty());
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = InMemorySessionStore::new();
        assert!(matches!(
            store.get(Uuid::new_v4()).await,
            Err(AdvisorError::SessionNotFound(_))
        ));
        assert!(store.remove(Uuid::new_v4()).await.is_err());
    }
}
