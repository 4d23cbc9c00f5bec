//! Long-term evolving memory.
//!
//! Entries are loaded and saved per `(user_id, session_id)` as a whole
//! slice. Save deletes all prior rows and re-inserts the provided list in a
//! single transaction, so the persisted state is exactly the in-memory
//! state. Saves are bounded by a short timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::store::db::Db;

/// Bound on one save transaction.
const SAVE_TIMEOUT: Duration = Duration::from_secs(5);

/// One long-term memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolvingMemoryEntry {
    /// Entry id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Owning session.
    pub session_id: String,
    /// The user input that produced this trace.
    pub input: String,
    /// The final output.
    pub output: String,
    /// Optional user feedback.
    #[serde(default)]
    pub feedback: String,
    /// Distilled summary used as recall context.
    #[serde(default)]
    pub summary: String,
    /// Raw serialized trace.
    #[serde(default)]
    pub raw_trace: String,
    /// Optional embedding of the summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Per-`(user, session)` load/save of the whole entry slice.
#[async_trait]
pub trait EvolvingMemoryStore: Send + Sync {
    /// Load all entries for the pair, oldest first.
    async fn load(&self, user_id: &str, session_id: &str) -> Result<Vec<EvolvingMemoryEntry>>;

    /// Atomically replace all entries for the pair.
    async fn save(
        &self,
        user_id: &str,
        session_id: &str,
        entries: Vec<EvolvingMemoryEntry>,
    ) -> Result<()>;
}

/// In-memory implementation for tests and dev.
#[derive(Debug, Default)]
pub struct MemoryEvolvingStore {
    entries: RwLock<HashMap<(String, String), Vec<EvolvingMemoryEntry>>>,
}

impl MemoryEvolvingStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvolvingMemoryStore for MemoryEvolvingStore {
    async fn load(&self, user_id: &str, session_id: &str) -> Result<Vec<EvolvingMemoryEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(user_id.to_owned(), session_id.to_owned()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save(
        &self,
        user_id: &str,
        session_id: &str,
        entries: Vec<EvolvingMemoryEntry>,
    ) -> Result<()> {
        self.entries
            .write()
            .await
            .insert((user_id.to_owned(), session_id.to_owned()), entries);
        Ok(())
    }
}

/// SQLite implementation.
#[derive(Debug, Clone)]
pub struct SqliteEvolvingStore {
    db: Db,
}

impl SqliteEvolvingStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS evolving_memory (
                id         TEXT NOT NULL,
                user_id    TEXT NOT NULL,
                session_id TEXT NOT NULL,
                input      TEXT NOT NULL,
                output     TEXT NOT NULL,
                feedback   TEXT NOT NULL DEFAULT '',
                summary    TEXT NOT NULL DEFAULT '',
                raw_trace  TEXT NOT NULL DEFAULT '',
                embedding  TEXT,
                metadata   TEXT NOT NULL DEFAULT 'null',
                created_at TEXT NOT NULL,
                seq        INTEGER PRIMARY KEY AUTOINCREMENT
            );

            CREATE INDEX IF NOT EXISTS idx_evolving_scope
            ON evolving_memory (user_id, session_id, seq);",
        )?;
        Ok(Self { db })
    }
}

#[async_trait]
impl EvolvingMemoryStore for SqliteEvolvingStore {
    async fn load(&self, user_id: &str, session_id: &str) -> Result<Vec<EvolvingMemoryEntry>> {
        let user_id = user_id.to_owned();
        let session_id = session_id.to_owned();
        self.db
            .blocking(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, session_id, input, output, feedback, summary, \
                            raw_trace, embedding, metadata, created_at \
                     FROM evolving_memory \
                     WHERE user_id = ?1 AND session_id = ?2 \
                     ORDER BY seq ASC",
                )?;
                let rows = stmt.query_map(params![user_id, session_id], |row| {
                    let embedding: Option<String> = row.get(8)?;
                    let metadata: String = row.get(9)?;
                    let created_at: String = row.get(10)?;
                    Ok(EvolvingMemoryEntry {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        session_id: row.get(2)?,
                        input: row.get(3)?,
                        output: row.get(4)?,
                        feedback: row.get(5)?,
                        summary: row.get(6)?,
                        raw_trace: row.get(7)?,
                        embedding: embedding
                            .and_then(|text| serde_json::from_str(&text).ok()),
                        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
                        created_at: created_at
                            .parse()
                            .unwrap_or_else(|_| Utc::now()),
                    })
                })?;
                rows.collect()
            })
            .await
    }

    async fn save(
        &self,
        user_id: &str,
        session_id: &str,
        entries: Vec<EvolvingMemoryEntry>,
    ) -> Result<()> {
        let user_id = user_id.to_owned();
        let session_id = session_id.to_owned();
        let save = self.db.blocking_app(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM evolving_memory WHERE user_id = ?1 AND session_id = ?2",
                params![user_id, session_id],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO evolving_memory \
                     (id, user_id, session_id, input, output, feedback, summary, \
                      raw_trace, embedding, metadata, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for entry in &entries {
                    let embedding = entry
                        .embedding
                        .as_ref()
                        .map(|e| serde_json::to_string(e))
                        .transpose()?;
                    stmt.execute(params![
                        entry.id,
                        user_id,
                        session_id,
                        entry.input,
                        entry.output,
                        entry.feedback,
                        entry.summary,
                        entry.raw_trace,
                        embedding,
                        serde_json::to_string(&entry.metadata)?,
                        entry.created_at.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        });

        tokio::time::timeout(SAVE_TIMEOUT, save)
            .await
            .map_err(|_| Error::timeout("evolving memory save"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: &str, user: &str, session: &str) -> EvolvingMemoryEntry {
        EvolvingMemoryEntry {
            id: id.to_owned(),
            user_id: user.to_owned(),
            session_id: session.to_owned(),
            input: format!("input-{id}"),
            output: format!("output-{id}"),
            feedback: String::new(),
            summary: format!("summary-{id}"),
            raw_trace: "{}".to_owned(),
            embedding: Some(vec![0.25, 0.5]),
            metadata: json!({"k": id}),
            created_at: Utc::now(),
        }
    }

    async fn save_load_round_trip(store: &dyn EvolvingMemoryStore) {
        let entries = vec![entry("a", "u1", "s1"), entry("b", "u1", "s1")];
        store.save("u1", "s1", entries.clone()).await.unwrap();

        let loaded = store.load("u1", "s1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "a");
        assert_eq!(loaded[1].id, "b");
        assert_eq!(loaded[0].summary, entries[0].summary);
        assert_eq!(loaded[0].embedding, entries[0].embedding);
        assert_eq!(loaded[0].metadata, entries[0].metadata);
    }

    async fn save_replaces_everything(store: &dyn EvolvingMemoryStore) {
        store
            .save("u1", "s1", vec![entry("old1", "u1", "s1"), entry("old2", "u1", "s1")])
            .await
            .unwrap();
        store
            .save("u1", "s1", vec![entry("new", "u1", "s1")])
            .await
            .unwrap();

        let loaded = store.load("u1", "s1").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "new");
    }

    async fn scopes_are_isolated(store: &dyn EvolvingMemoryStore) {
        store
            .save("u1", "s1", vec![entry("x", "u1", "s1")])
            .await
            .unwrap();
        store
            .save("u2", "s1", vec![entry("y", "u2", "s1")])
            .await
            .unwrap();

        assert_eq!(store.load("u1", "s1").await.unwrap().len(), 1);
        assert_eq!(store.load("u2", "s1").await.unwrap()[0].id, "y");
        assert!(store.load("u1", "s2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_contract() {
        let store = MemoryEvolvingStore::new();
        save_load_round_trip(&store).await;
        save_replaces_everything(&store).await;
        scopes_are_isolated(&store).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        let store = SqliteEvolvingStore::new(Db::in_memory().unwrap()).unwrap();
        save_load_round_trip(&store).await;
        save_replaces_everything(&store).await;
        scopes_are_isolated(&store).await;
    }

    #[tokio::test]
    async fn empty_save_clears_scope() {
        let store = SqliteEvolvingStore::new(Db::in_memory().unwrap()).unwrap();
        store
            .save("u1", "s1", vec![entry("a", "u1", "s1")])
            .await
            .unwrap();
        store.save("u1", "s1", vec![]).await.unwrap();
        assert!(store.load("u1", "s1").await.unwrap().is_empty());
    }
}
