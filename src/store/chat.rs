//! Chat session and message persistence.
//!
//! Contract highlights:
//! - `ensure_session` is idempotent on id and returns the existing session
//!   when present, enforcing ownership.
//! - `append_messages` is transactional: all messages insert, then the
//!   session row updates `updated_at`, `last_preview`, and optionally
//!   `model`. A session update that matches no row signals `forbidden`.
//! - A session with a `user_id` is only visible to that user.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::message::Role;

use super::db::Db;

/// Bound on one append transaction.
const APPEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Session id (UUID string).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owner; `None` for anonymous sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Advances on any append or rename.
    pub updated_at: DateTime<Utc>,
    /// Preview of the newest message.
    #[serde(default)]
    pub last_preview: String,
    /// Model last used in this session.
    #[serde(default)]
    pub model: String,
    /// Rolling summary of older turns.
    #[serde(default)]
    pub summary: String,
    /// How many messages the summary covers.
    #[serde(default)]
    pub summarized_count: i64,
}

/// A persisted message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message id.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Speaker role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A message to append; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Speaker role.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl NewMessage {
    /// Convenience constructor.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

fn check_owner(session_user: Option<&str>, caller: Option<&str>) -> Result<()> {
    match session_user {
        Some(owner) if caller != Some(owner) => {
            Err(Error::forbidden(format!("session belongs to {owner}")))
        }
        _ => Ok(()),
    }
}

/// Persisted conversations.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Get or create a session by id. Idempotent; ownership enforced.
    async fn ensure_session(
        &self,
        user_id: Option<&str>,
        id: &str,
        name: &str,
    ) -> Result<ChatSession>;

    /// Fetch a session, enforcing ownership.
    async fn get_session(&self, user_id: Option<&str>, id: &str) -> Result<ChatSession>;

    /// Sessions visible to the caller, newest update first.
    async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<ChatSession>>;

    /// Append messages and advance the session row transactionally.
    async fn append_messages(
        &self,
        user_id: Option<&str>,
        session_id: &str,
        messages: &[NewMessage],
        preview: &str,
        model: Option<&str>,
    ) -> Result<()>;

    /// All messages of a session in insertion order.
    async fn list_messages(&self, user_id: Option<&str>, session_id: &str)
    -> Result<Vec<ChatMessage>>;

    /// Rename a session; advances `updated_at`.
    async fn rename_session(&self, user_id: Option<&str>, id: &str, name: &str) -> Result<()>;

    /// Delete a session and its messages.
    async fn delete_session(&self, user_id: Option<&str>, id: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryChatState {
    sessions: HashMap<String, ChatSession>,
    messages: HashMap<String, Vec<ChatMessage>>,
}

/// In-memory chat store for tests and dev.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    state: RwLock<MemoryChatState>,
}

impl MemoryChatStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn ensure_session(
        &self,
        user_id: Option<&str>,
        id: &str,
        name: &str,
    ) -> Result<ChatSession> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.sessions.get(id) {
            check_owner(existing.user_id.as_deref(), user_id)?;
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let session = ChatSession {
            id: id.to_owned(),
            name: name.to_owned(),
            user_id: user_id.map(str::to_owned),
            created_at: now,
            updated_at: now,
            last_preview: String::new(),
            model: String::new(),
            summary: String::new(),
            summarized_count: 0,
        };
        state.sessions.insert(id.to_owned(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, user_id: Option<&str>, id: &str) -> Result<ChatSession> {
        let state = self.state.read().await;
        let session = state
            .sessions
            .get(id)
            .ok_or_else(|| Error::not_found(format!("session {id}")))?;
        check_owner(session.user_id.as_deref(), user_id)?;
        Ok(session.clone())
    }

    async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<ChatSession>> {
        let state = self.state.read().await;
        let mut sessions: Vec<ChatSession> = state
            .sessions
            .values()
            .filter(|s| check_owner(s.user_id.as_deref(), user_id).is_ok())
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(sessions)
    }

    async fn append_messages(
        &self,
        user_id: Option<&str>,
        session_id: &str,
        messages: &[NewMessage],
        preview: &str,
        model: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::not_found(format!("session {session_id}")))?;
        check_owner(session.user_id.as_deref(), user_id)?;

        let now = Utc::now();
        session.updated_at = now;
        session.last_preview = preview.to_owned();
        if let Some(model) = model {
            session.model = model.to_owned();
        }

        let rows = state.messages.entry(session_id.to_owned()).or_default();
        for message in messages {
            rows.push(ChatMessage {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.to_owned(),
                role: message.role,
                content: message.content.clone(),
                created_at: now,
            });
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        user_id: Option<&str>,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let state = self.state.read().await;
        let session = state
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::not_found(format!("session {session_id}")))?;
        check_owner(session.user_id.as_deref(), user_id)?;
        Ok(state.messages.get(session_id).cloned().unwrap_or_default())
    }

    async fn rename_session(&self, user_id: Option<&str>, id: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("session {id}")))?;
        check_owner(session.user_id.as_deref(), user_id)?;
        session.name = name.to_owned();
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_session(&self, user_id: Option<&str>, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get(id)
            .ok_or_else(|| Error::not_found(format!("session {id}")))?;
        check_owner(session.user_id.as_deref(), user_id)?;
        state.sessions.remove(id);
        state.messages.remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// SQLite-backed chat store.
#[derive(Debug, Clone)]
pub struct SqliteChatStore {
    db: Db,
}

impl SqliteChatStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS chat_sessions (
                id               TEXT PRIMARY KEY,
                name             TEXT NOT NULL,
                user_id          TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                last_preview     TEXT NOT NULL DEFAULT '',
                model            TEXT NOT NULL DEFAULT '',
                summary          TEXT NOT NULL DEFAULT '',
                summarized_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id         TEXT NOT NULL,
                session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL,
                seq        INTEGER PRIMARY KEY AUTOINCREMENT
            );

            CREATE INDEX IF NOT EXISTS idx_chat_messages_session
            ON chat_messages (session_id, seq);",
        )?;
        Ok(Self { db })
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSession> {
        let created: String = row.get(3)?;
        let updated: String = row.get(4)?;
        Ok(ChatSession {
            id: row.get(0)?,
            name: row.get(1)?,
            user_id: row.get(2)?,
            created_at: created.parse().unwrap_or_else(|_| Utc::now()),
            updated_at: updated.parse().unwrap_or_else(|_| Utc::now()),
            last_preview: row.get(5)?,
            model: row.get(6)?,
            summary: row.get(7)?,
            summarized_count: row.get(8)?,
        })
    }

    const SESSION_COLS: &'static str =
        "id, name, user_id, created_at, updated_at, last_preview, model, summary, summarized_count";

    /// Fetch a session row and enforce ownership inside the closure.
    fn fetch_session(
        conn: &rusqlite::Connection,
        id: &str,
        caller: Option<&str>,
    ) -> Result<ChatSession> {
        let session = conn
            .query_row(
                &format!("SELECT {} FROM chat_sessions WHERE id = ?1", Self::SESSION_COLS),
                params![id],
                Self::row_to_session,
            )
            .optional()?
            .ok_or_else(|| Error::not_found(format!("session {id}")))?;
        check_owner(session.user_id.as_deref(), caller)?;
        Ok(session)
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn ensure_session(
        &self,
        user_id: Option<&str>,
        id: &str,
        name: &str,
    ) -> Result<ChatSession> {
        let id = id.to_owned();
        let name = name.to_owned();
        let user = user_id.map(str::to_owned);
        self.db
            .blocking_app(move |conn| {
                if let Ok(existing) = Self::fetch_session(conn, &id, user.as_deref()) {
                    return Ok(existing);
                }
                // Re-check for ownership mismatch rather than racing a create.
                let exists: Option<String> = conn
                    .query_row(
                        "SELECT id FROM chat_sessions WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if exists.is_some() {
                    return Err(Error::forbidden(format!("session {id}")));
                }

                let now = Utc::now();
                conn.execute(
                    "INSERT INTO chat_sessions (id, name, user_id, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![id, name, user, now.to_rfc3339()],
                )?;
                Ok(ChatSession {
                    id,
                    name,
                    user_id: user,
                    created_at: now,
                    updated_at: now,
                    last_preview: String::new(),
                    model: String::new(),
                    summary: String::new(),
                    summarized_count: 0,
                })
            })
            .await
    }

    async fn get_session(&self, user_id: Option<&str>, id: &str) -> Result<ChatSession> {
        let id = id.to_owned();
        let user = user_id.map(str::to_owned);
        self.db
            .blocking_app(move |conn| Self::fetch_session(conn, &id, user.as_deref()))
            .await
    }

    async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<ChatSession>> {
        let user = user_id.map(str::to_owned);
        self.db
            .blocking_app(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM chat_sessions \
                     WHERE user_id IS NULL OR user_id = ?1 \
                     ORDER BY updated_at DESC, id ASC",
                    Self::SESSION_COLS
                ))?;
                let rows = stmt.query_map(params![user], Self::row_to_session)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    async fn append_messages(
        &self,
        user_id: Option<&str>,
        session_id: &str,
        messages: &[NewMessage],
        preview: &str,
        model: Option<&str>,
    ) -> Result<()> {
        let session_id = session_id.to_owned();
        let user = user_id.map(str::to_owned);
        let messages = messages.to_vec();
        let preview = preview.to_owned();
        let model = model.map(str::to_owned);

        let append = self.db.blocking_app(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let now = Utc::now();
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO chat_messages (id, session_id, role, content, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for message in &messages {
                    stmt.execute(params![
                        Uuid::new_v4().to_string(),
                        session_id,
                        message.role.as_str(),
                        message.content,
                        now.to_rfc3339(),
                    ])?;
                }
            }

            // Zero rows affected means the caller does not own the session
            // (or it does not exist); the transaction rolls back either way.
            let now_text = now.to_rfc3339();
            let affected = if let Some(model) = &model {
                tx.execute(
                    "UPDATE chat_sessions \
                     SET updated_at = ?1, last_preview = ?2, model = ?5 \
                     WHERE id = ?3 AND (user_id IS NULL OR user_id = ?4)",
                    params![now_text, preview, session_id, user, model],
                )?
            } else {
                tx.execute(
                    "UPDATE chat_sessions \
                     SET updated_at = ?1, last_preview = ?2 \
                     WHERE id = ?3 AND (user_id IS NULL OR user_id = ?4)",
                    params![now_text, preview, session_id, user],
                )?
            };
            if affected == 0 {
                return Err(Error::forbidden(format!("session {session_id}")));
            }
            tx.commit()?;
            Ok(())
        });

        tokio::time::timeout(APPEND_TIMEOUT, append)
            .await
            .map_err(|_| Error::timeout("append messages"))?
    }

    async fn list_messages(
        &self,
        user_id: Option<&str>,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let session_id = session_id.to_owned();
        let user = user_id.map(str::to_owned);
        self.db
            .blocking_app(move |conn| {
                Self::fetch_session(conn, &session_id, user.as_deref())?;
                let mut stmt = conn.prepare(
                    "SELECT id, session_id, role, content, created_at \
                     FROM chat_messages WHERE session_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt.query_map(params![session_id], |row| {
                    let role: String = row.get(2)?;
                    let created: String = row.get(4)?;
                    Ok(ChatMessage {
                        id: row.get(0)?,
                        session_id: row.get(1)?,
                        role: match role.as_str() {
                            "system" => Role::System,
                            "assistant" => Role::Assistant,
                            "tool" => Role::Tool,
                            _ => Role::User,
                        },
                        content: row.get(3)?,
                        created_at: created.parse().unwrap_or_else(|_| Utc::now()),
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    async fn rename_session(&self, user_id: Option<&str>, id: &str, name: &str) -> Result<()> {
        let id = id.to_owned();
        let name = name.to_owned();
        let user = user_id.map(str::to_owned);
        self.db
            .blocking_app(move |conn| {
                Self::fetch_session(conn, &id, user.as_deref())?;
                conn.execute(
                    "UPDATE chat_sessions SET name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![name, Utc::now().to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await
    }

    async fn delete_session(&self, user_id: Option<&str>, id: &str) -> Result<()> {
        let id = id.to_owned();
        let user = user_id.map(str::to_owned);
        self.db
            .blocking_app(move |conn| {
                Self::fetch_session(conn, &id, user.as_deref())?;
                conn.execute("DELETE FROM chat_sessions WHERE id = ?1", params![id])?;
                conn.execute("DELETE FROM chat_messages WHERE session_id = ?1", params![id])?;
                Ok(())
            })
            .await
    }
}
