//! User preference persistence.
//!
//! `get` never fails for a missing user; it returns a zero value carrying
//! the user id so callers can treat preferences as always-present.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::{OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;

use super::db::Db;

/// Per-user preferences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Owning user.
    pub user_id: String,
    /// The project new requests default to.
    #[serde(default)]
    pub active_project: String,
    /// Free-form UI settings.
    #[serde(default)]
    pub settings: Value,
}

/// Persisted preferences.
#[async_trait]
pub trait UserPreferencesStore: Send + Sync {
    /// Fetch preferences; a zero value with the user id when absent.
    async fn get(&self, user_id: &str) -> Result<UserPreferences>;

    /// Upsert the active project.
    async fn set_active_project(&self, user_id: &str, project_id: &str) -> Result<()>;

    /// Replace the whole preference row.
    async fn put(&self, prefs: UserPreferences) -> Result<()>;
}

/// In-memory preferences store for tests and dev.
#[derive(Debug, Default)]
pub struct MemoryPreferencesStore {
    rows: RwLock<HashMap<String, UserPreferences>>,
}

impl MemoryPreferencesStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserPreferencesStore for MemoryPreferencesStore {
    async fn get(&self, user_id: &str) -> Result<UserPreferences> {
        Ok(self
            .rows
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserPreferences {
                user_id: user_id.to_owned(),
                ..UserPreferences::default()
            }))
    }

    async fn set_active_project(&self, user_id: &str, project_id: &str) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.entry(user_id.to_owned())
            .or_insert_with(|| UserPreferences {
                user_id: user_id.to_owned(),
                ..UserPreferences::default()
            })
            .active_project = project_id.to_owned();
        Ok(())
    }

    async fn put(&self, prefs: UserPreferences) -> Result<()> {
        self.rows.write().await.insert(prefs.user_id.clone(), prefs);
        Ok(())
    }
}

/// SQLite-backed preferences store.
#[derive(Debug, Clone)]
pub struct SqlitePreferencesStore {
    db: Db,
}

impl SqlitePreferencesStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS user_preferences (
                user_id        TEXT PRIMARY KEY,
                active_project TEXT NOT NULL DEFAULT '',
                settings       TEXT NOT NULL DEFAULT 'null'
            );",
        )?;
        Ok(Self { db })
    }
}

#[async_trait]
impl UserPreferencesStore for SqlitePreferencesStore {
    async fn get(&self, user_id: &str) -> Result<UserPreferences> {
        let user_id = user_id.to_owned();
        self.db
            .blocking_app(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT active_project, settings FROM user_preferences \
                         WHERE user_id = ?1",
                        params![user_id],
                        |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                        },
                    )
                    .optional()?;
                Ok(match row {
                    Some((active_project, settings)) => UserPreferences {
                        user_id,
                        active_project,
                        settings: serde_json::from_str(&settings).unwrap_or(Value::Null),
                    },
                    None => UserPreferences {
                        user_id,
                        ..UserPreferences::default()
                    },
                })
            })
            .await
    }

    async fn set_active_project(&self, user_id: &str, project_id: &str) -> Result<()> {
        let user_id = user_id.to_owned();
        let project_id = project_id.to_owned();
        self.db
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO user_preferences (user_id, active_project) VALUES (?1, ?2) \
                     ON CONFLICT (user_id) DO UPDATE SET active_project = excluded.active_project",
                    params![user_id, project_id],
                )
                .map(|_| ())
            })
            .await
    }

    async fn put(&self, prefs: UserPreferences) -> Result<()> {
        let settings = serde_json::to_string(&prefs.settings)?;
        self.db
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO user_preferences (user_id, active_project, settings) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT (user_id) DO UPDATE SET \
                       active_project = excluded.active_project, \
                       settings = excluded.settings",
                    params![prefs.user_id, prefs.active_project, settings],
                )
                .map(|_| ())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn contract(store: &dyn UserPreferencesStore) {
        // Absent user: zero value with id, no error.
        let zero = store.get("nobody").await.unwrap();
        assert_eq!(zero.user_id, "nobody");
        assert!(zero.active_project.is_empty());

        store.set_active_project("u1", "p1").await.unwrap();
        assert_eq!(store.get("u1").await.unwrap().active_project, "p1");

        // Upsert semantics.
        store.set_active_project("u1", "p2").await.unwrap();
        assert_eq!(store.get("u1").await.unwrap().active_project, "p2");

        store
            .put(UserPreferences {
                user_id: "u1".into(),
                active_project: "p3".into(),
                settings: json!({"theme": "dark"}),
            })
            .await
            .unwrap();
        let prefs = store.get("u1").await.unwrap();
        assert_eq!(prefs.active_project, "p3");
        assert_eq!(prefs.settings["theme"], "dark");
    }

    #[tokio::test]
    async fn memory_contract() {
        contract(&MemoryPreferencesStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_contract() {
        let store = SqlitePreferencesStore::new(Db::in_memory().unwrap()).unwrap();
        contract(&store).await;
    }
}
