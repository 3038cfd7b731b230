use super::{Session, SessionStore};
use crate::error::OrchestrationError;
use crate::memory::ConversationHistory;
use crate::state::AgentState;
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Sessions stored as one row per identity, state and history as JSONB.
pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    ttl: chrono::Duration,
}

fn db_error(context: &str, e: sqlx::Error) -> OrchestrationError {
    OrchestrationError::PersistenceError(format!("{}: {}", context, e))
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool, ttl: chrono::Duration) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            ttl,
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS agent_sessions (
                      session_id TEXT PRIMARY KEY,
                      state JSONB NOT NULL,
                      history JSONB NOT NULL,
                      expires_at TIMESTAMPTZ NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_agent_sessions_expiry
                    ON agent_sessions (expires_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| db_error("Failed to initialize session schema", e))?;

        Ok(())
    }

    async fn upsert(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_sessions (session_id, state, history, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (session_id) DO UPDATE
            SET state = EXCLUDED.state,
                history = EXCLUDED.history,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(&session.session_id)
        .bind(Json(&session.state))
        .bind(Json(&session.history))
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save session", e))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    async fn has(&self, session_id: &str) -> Result<bool> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT 1 AS present FROM agent_sessions WHERE session_id = $1 AND expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to look up session", e))?;

        Ok(row.is_some())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT state, history, expires_at
            FROM agent_sessions
            WHERE session_id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load session", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state: Json<AgentState> = row
            .try_get("state")
            .map_err(|e| db_error("Corrupt session state", e))?;
        let history: Json<ConversationHistory> = row
            .try_get("history")
            .map_err(|e| db_error("Corrupt session history", e))?;
        let expires_at: DateTime<Utc> = row
            .try_get("expires_at")
            .map_err(|e| db_error("Corrupt session expiry", e))?;

        let session = Session {
            session_id: session_id.to_string(),
            state: state.0,
            history: history.0,
            expires_at,
        };
        Ok(Some(session.reset_on_load()))
    }

    async fn create(&self, session_id: &str, initial_state: AgentState) -> Result<Session> {
        self.ensure_schema().await?;

        let session = Session::new(session_id, initial_state, self.ttl);
        self.upsert(&session).await?;
        debug!(session_id, "Created session");
        Ok(session)
    }

    async fn save(&self, session: &mut Session) -> Result<()> {
        self.ensure_schema().await?;

        session.expires_at = Utc::now() + self.ttl;
        self.upsert(session).await
    }

    async fn clear(&self, session_id: &str) -> Result<bool> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM agent_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to clear session", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.ensure_schema().await?;

        let rows = sqlx::query("DELETE FROM agent_sessions WHERE expires_at <= $1 RETURNING session_id")
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to purge expired sessions", e))?;

        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("session_id").ok())
            .collect())
    }
}
