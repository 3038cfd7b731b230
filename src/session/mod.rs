//! Session persistence
//!
//! One session per user identity, holding the agent state and the
//! conversation history. Sessions expire after a TTL that is refreshed on
//! every save; an expired session behaves exactly like a missing one.

mod postgres;

pub use postgres::PostgresSessionStore;

use crate::memory::ConversationHistory;
use crate::state::AgentState;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub state: AgentState,
    pub history: ConversationHistory,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, state: AgentState, ttl: chrono::Duration) -> Self {
        let session_id = session_id.into();
        Self {
            history: ConversationHistory::new(session_id.clone()),
            session_id,
            state,
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Turn-scoped flags do not survive a reload.
    fn reset_on_load(mut self) -> Self {
        self.state.suggested_responses.clear();
        self.state.order_submitted = false;
        self
    }
}

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn has(&self, session_id: &str) -> Result<bool>;
    async fn load(&self, session_id: &str) -> Result<Option<Session>>;
    async fn create(&self, session_id: &str, initial_state: AgentState) -> Result<Session>;
    /// Persist the session and push its expiry out by the TTL.
    async fn save(&self, session: &mut Session) -> Result<()>;
    /// Delete the session. True when a record was removed.
    async fn clear(&self, session_id: &str) -> Result<bool>;
    /// Drop every session expired at `now`, returning their ids.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>>;
}

/// In-memory session store for development and tests
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: chrono::Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(chrono::Duration::hours(24))
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn has(&self, session_id: &str) -> Result<bool> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|s| !s.is_expired(Utc::now()))
            .unwrap_or(false))
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|s| !s.is_expired(Utc::now()))
            .cloned()
            .map(Session::reset_on_load))
    }

    async fn create(&self, session_id: &str, initial_state: AgentState) -> Result<Session> {
        let session = Session::new(session_id, initial_state, self.ttl);

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), session.clone());
        debug!(session_id, "Created session");

        Ok(session)
    }

    async fn save(&self, session: &mut Session) -> Result<()> {
        session.expires_at = Utc::now() + self.ttl;

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.is_expired(now))
            .map(|s| s.session_id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
        }
        Ok(expired)
    }
}

/// Postgres when a database URL is configured and the pool can be created,
/// in-memory otherwise.
pub fn build_session_store(
    database_url: Option<&str>,
    ttl: chrono::Duration,
) -> Arc<dyn SessionStore> {
    if let Some(url) = database_url {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
        {
            Ok(pool) => {
                info!("Session backend: postgres");
                return Arc::new(PostgresSessionStore::new(pool, ttl));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres session backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Session backend: in-memory");
    Arc::new(InMemorySessionStore::new(ttl))
}

/// One async mutex per session id, so only one turn runs per identity.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let session_lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        session_lock.lock_owned().await
    }

    /// Forget locks nobody holds or waits on.
    pub async fn prune(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }
}
