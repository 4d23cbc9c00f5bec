//! Workflow definition persistence, unique by `(user_id, intent)`.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::{OptionalExtension as _, params};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::warpp::WarppWorkflow;

use super::db::Db;

/// Persisted WARPP workflows.
#[async_trait]
pub trait WarppStore: Send + Sync {
    /// Insert or replace by `(user_id, intent)`.
    async fn upsert(&self, workflow: WarppWorkflow) -> Result<()>;

    /// Fetch one workflow.
    async fn get(&self, user_id: &str, intent: &str) -> Result<WarppWorkflow>;

    /// Delete one workflow.
    async fn delete(&self, user_id: &str, intent: &str) -> Result<()>;

    /// The user's workflows, case-insensitively sorted by intent.
    async fn list(&self, user_id: &str) -> Result<Vec<WarppWorkflow>>;
}

/// In-memory workflow store for tests and dev.
#[derive(Debug, Default)]
pub struct MemoryWarppStore {
    rows: RwLock<HashMap<(String, String), WarppWorkflow>>,
}

impl MemoryWarppStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WarppStore for MemoryWarppStore {
    async fn upsert(&self, workflow: WarppWorkflow) -> Result<()> {
        self.rows.write().await.insert(
            (workflow.user_id.clone(), workflow.intent.clone()),
            workflow,
        );
        Ok(())
    }

    async fn get(&self, user_id: &str, intent: &str) -> Result<WarppWorkflow> {
        self.rows
            .read()
            .await
            .get(&(user_id.to_owned(), intent.to_owned()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("workflow '{intent}'")))
    }

    async fn delete(&self, user_id: &str, intent: &str) -> Result<()> {
        self.rows
            .write()
            .await
            .remove(&(user_id.to_owned(), intent.to_owned()))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("workflow '{intent}'")))
    }

    async fn list(&self, user_id: &str) -> Result<Vec<WarppWorkflow>> {
        let mut rows: Vec<WarppWorkflow> = self
            .rows
            .read()
            .await
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|w| w.intent.to_lowercase());
        Ok(rows)
    }
}

/// SQLite-backed workflow store.
#[derive(Debug, Clone)]
pub struct SqliteWarppStore {
    db: Db,
}

impl SqliteWarppStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS warpp_workflows (
                user_id TEXT NOT NULL,
                intent  TEXT NOT NULL,
                data    TEXT NOT NULL,
                PRIMARY KEY (user_id, intent)
            );",
        )?;
        Ok(Self { db })
    }
}

#[async_trait]
impl WarppStore for SqliteWarppStore {
    async fn upsert(&self, workflow: WarppWorkflow) -> Result<()> {
        let data = serde_json::to_string(&workflow)?;
        self.db
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO warpp_workflows (user_id, intent, data) VALUES (?1, ?2, ?3) \
                     ON CONFLICT (user_id, intent) DO UPDATE SET data = excluded.data",
                    params![workflow.user_id, workflow.intent, data],
                )
                .map(|_| ())
            })
            .await
    }

    async fn get(&self, user_id: &str, intent: &str) -> Result<WarppWorkflow> {
        let user_id = user_id.to_owned();
        let intent = intent.to_owned();
        self.db
            .blocking_app(move |conn| {
                let data: Option<String> = conn
                    .query_row(
                        "SELECT data FROM warpp_workflows WHERE user_id = ?1 AND intent = ?2",
                        params![user_id, intent],
                        |row| row.get(0),
                    )
                    .optional()?;
                let data = data.ok_or_else(|| Error::not_found(format!("workflow '{intent}'")))?;
                Ok(serde_json::from_str(&data)?)
            })
            .await
    }

    async fn delete(&self, user_id: &str, intent: &str) -> Result<()> {
        let user_id = user_id.to_owned();
        let intent = intent.to_owned();
        self.db
            .blocking_app(move |conn| {
                let affected = conn.execute(
                    "DELETE FROM warpp_workflows WHERE user_id = ?1 AND intent = ?2",
                    params![user_id, intent],
                )?;
                if affected == 0 {
                    return Err(Error::not_found(format!("workflow '{intent}'")));
                }
                Ok(())
            })
            .await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<WarppWorkflow>> {
        let user_id = user_id.to_owned();
        self.db
            .blocking_app(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM warpp_workflows WHERE user_id = ?1 \
                     ORDER BY intent COLLATE NOCASE ASC",
                )?;
                let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
                rows.map(|r| Ok(serde_json::from_str(&r?)?))
                    .collect::<Result<Vec<_>>>()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(user: &str, intent: &str) -> WarppWorkflow {
        WarppWorkflow {
            user_id: user.to_owned(),
            intent: intent.to_owned(),
            description: String::new(),
            keywords: vec![intent.to_owned()],
            steps: Vec::new(),
            ui: None,
            max_concurrency: 1,
            fail_fast: false,
        }
    }

    async fn contract(store: &dyn WarppStore) {
        store.upsert(workflow("u1", "updateAddress")).await.unwrap();
        store.upsert(workflow("u1", "cancelOrder")).await.unwrap();
        store.upsert(workflow("u2", "other")).await.unwrap();

        let intents: Vec<String> = store
            .list("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.intent)
            .collect();
        assert_eq!(intents, vec!["cancelOrder", "updateAddress"]);

        let mut replacement = workflow("u1", "cancelOrder");
        replacement.fail_fast = true;
        store.upsert(replacement).await.unwrap();
        assert!(store.get("u1", "cancelOrder").await.unwrap().fail_fast);

        assert_eq!(store.get("u2", "cancelOrder").await.unwrap_err().kind(), "not_found");
        store.delete("u1", "cancelOrder").await.unwrap();
        assert_eq!(
            store.delete("u1", "cancelOrder").await.unwrap_err().kind(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn memory_contract() {
        contract(&MemoryWarppStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_contract() {
        let store = SqliteWarppStore::new(Db::in_memory().unwrap()).unwrap();
        contract(&store).await;
    }
}
