//! Specialist and team persistence.
//!
//! Both stores are per-user namespaced with a unique `(user_id, name)` key.
//! Rows persist as JSON documents, the same storage model the chat stores
//! use for messages. Listings sort case-insensitively by name.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::{OptionalExtension as _, params};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::specialist::{Specialist, SpecialistTeam};

use super::db::Db;

/// Persisted specialists.
#[async_trait]
pub trait SpecialistsStore: Send + Sync {
    /// Insert or replace by `(user_id, name)`.
    async fn upsert(&self, specialist: Specialist) -> Result<()>;

    /// Fetch one specialist.
    async fn get(&self, user_id: &str, name: &str) -> Result<Specialist>;

    /// Delete one specialist.
    async fn delete(&self, user_id: &str, name: &str) -> Result<()>;

    /// The user's specialists, case-insensitively sorted by name.
    async fn list(&self, user_id: &str) -> Result<Vec<Specialist>>;
}

/// Persisted teams.
#[async_trait]
pub trait TeamsStore: Send + Sync {
    /// Insert or replace by `(user_id, name)`.
    async fn upsert(&self, team: SpecialistTeam) -> Result<()>;

    /// Fetch one team.
    async fn get(&self, user_id: &str, name: &str) -> Result<SpecialistTeam>;

    /// Delete one team.
    async fn delete(&self, user_id: &str, name: &str) -> Result<()>;

    /// The user's teams, case-insensitively sorted by name.
    async fn list(&self, user_id: &str) -> Result<Vec<SpecialistTeam>>;

    /// Add a member; idempotent.
    async fn add_member(&self, user_id: &str, team: &str, member: &str) -> Result<SpecialistTeam>;

    /// Remove a member; idempotent.
    async fn remove_member(&self, user_id: &str, team: &str, member: &str)
    -> Result<SpecialistTeam>;
}

fn sort_case_insensitive<T>(items: &mut [T], name: impl Fn(&T) -> String) {
    items.sort_by_key(|item| name(item).to_lowercase());
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// In-memory specialists store for tests and dev.
#[derive(Debug, Default)]
pub struct MemorySpecialistsStore {
    rows: RwLock<HashMap<(String, String), Specialist>>,
}

impl MemorySpecialistsStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpecialistsStore for MemorySpecialistsStore {
    async fn upsert(&self, specialist: Specialist) -> Result<()> {
        self.rows.write().await.insert(
            (specialist.user_id.clone(), specialist.name.clone()),
            specialist,
        );
        Ok(())
    }

    async fn get(&self, user_id: &str, name: &str) -> Result<Specialist> {
        self.rows
            .read()
            .await
            .get(&(user_id.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("specialist '{name}'")))
    }

    async fn delete(&self, user_id: &str, name: &str) -> Result<()> {
        self.rows
            .write()
            .await
            .remove(&(user_id.to_owned(), name.to_owned()))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("specialist '{name}'")))
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Specialist>> {
        let mut rows: Vec<Specialist> = self
            .rows
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sort_case_insensitive(&mut rows, |s| s.name.clone());
        Ok(rows)
    }
}

/// In-memory teams store for tests and dev.
#[derive(Debug, Default)]
pub struct MemoryTeamsStore {
    rows: RwLock<HashMap<(String, String), SpecialistTeam>>,
}

impl MemoryTeamsStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TeamsStore for MemoryTeamsStore {
    async fn upsert(&self, team: SpecialistTeam) -> Result<()> {
        self.rows
            .write()
            .await
            .insert((team.user_id.clone(), team.name.clone()), team);
        Ok(())
    }

    async fn get(&self, user_id: &str, name: &str) -> Result<SpecialistTeam> {
        self.rows
            .read()
            .await
            .get(&(user_id.to_owned(), name.to_owned()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("team '{name}'")))
    }

    async fn delete(&self, user_id: &str, name: &str) -> Result<()> {
        self.rows
            .write()
            .await
            .remove(&(user_id.to_owned(), name.to_owned()))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("team '{name}'")))
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SpecialistTeam>> {
        let mut rows: Vec<SpecialistTeam> = self
            .rows
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        sort_case_insensitive(&mut rows, |t| t.name.clone());
        Ok(rows)
    }

    async fn add_member(&self, user_id: &str, team: &str, member: &str) -> Result<SpecialistTeam> {
        let mut rows = self.rows.write().await;
        let entry = rows
            .get_mut(&(user_id.to_owned(), team.to_owned()))
            .ok_or_else(|| Error::not_found(format!("team '{team}'")))?;
        entry.add_member(member);
        Ok(entry.clone())
    }

    async fn remove_member(
        &self,
        user_id: &str,
        team: &str,
        member: &str,
    ) -> Result<SpecialistTeam> {
        let mut rows = self.rows.write().await;
        let entry = rows
            .get_mut(&(user_id.to_owned(), team.to_owned()))
            .ok_or_else(|| Error::not_found(format!("team '{team}'")))?;
        entry.remove_member(member);
        Ok(entry.clone())
    }
}

// ---------------------------------------------------------------------------
// SQLite implementations
// ---------------------------------------------------------------------------

/// SQLite-backed specialists store.
#[derive(Debug, Clone)]
pub struct SqliteSpecialistsStore {
    db: Db,
}

impl SqliteSpecialistsStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS specialists (
                user_id TEXT NOT NULL,
                name    TEXT NOT NULL,
                data    TEXT NOT NULL,
                PRIMARY KEY (user_id, name)
            );",
        )?;
        Ok(Self { db })
    }
}

#[async_trait]
impl SpecialistsStore for SqliteSpecialistsStore {
    async fn upsert(&self, specialist: Specialist) -> Result<()> {
        let data = serde_json::to_string(&specialist)?;
        self.db
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO specialists (user_id, name, data) VALUES (?1, ?2, ?3) \
                     ON CONFLICT (user_id, name) DO UPDATE SET data = excluded.data",
                    params![specialist.user_id, specialist.name, data],
                )
                .map(|_| ())
            })
            .await
    }

    async fn get(&self, user_id: &str, name: &str) -> Result<Specialist> {
        let user_id = user_id.to_owned();
        let name = name.to_owned();
        self.db
            .blocking_app(move |conn| {
                let data: Option<String> = conn
                    .query_row(
                        "SELECT data FROM specialists WHERE user_id = ?1 AND name = ?2",
                        params![user_id, name],
                        |row| row.get(0),
                    )
                    .optional()?;
                let data = data.ok_or_else(|| Error::not_found(format!("specialist '{name}'")))?;
                Ok(serde_json::from_str(&data)?)
            })
            .await
    }

    async fn delete(&self, user_id: &str, name: &str) -> Result<()> {
        let user_id = user_id.to_owned();
        let name = name.to_owned();
        self.db
            .blocking_app(move |conn| {
                let affected = conn.execute(
                    "DELETE FROM specialists WHERE user_id = ?1 AND name = ?2",
                    params![user_id, name],
                )?;
                if affected == 0 {
                    return Err(Error::not_found(format!("specialist '{name}'")));
                }
                Ok(())
            })
            .await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Specialist>> {
        let user_id = user_id.to_owned();
        self.db
            .blocking_app(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM specialists WHERE user_id = ?1 \
                     ORDER BY name COLLATE NOCASE ASC",
                )?;
                let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
                rows.map(|r| Ok(serde_json::from_str(&r?)?))
                    .collect::<Result<Vec<_>>>()
            })
            .await
    }
}

/// SQLite-backed teams store.
#[derive(Debug, Clone)]
pub struct SqliteTeamsStore {
    db: Db,
}

impl SqliteTeamsStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS specialist_teams (
                user_id TEXT NOT NULL,
                name    TEXT NOT NULL,
                data    TEXT NOT NULL,
                PRIMARY KEY (user_id, name)
            );",
        )?;
        Ok(Self { db })
    }

    async fn mutate<F>(&self, user_id: &str, team: &str, f: F) -> Result<SpecialistTeam>
    where
        F: FnOnce(&mut SpecialistTeam) + Send + 'static,
    {
        let user_id = user_id.to_owned();
        let team = team.to_owned();
        self.db
            .blocking_app(move |conn| {
                let data: Option<String> = conn
                    .query_row(
                        "SELECT data FROM specialist_teams WHERE user_id = ?1 AND name = ?2",
                        params![user_id, team],
                        |row| row.get(0),
                    )
                    .optional()?;
                let data = data.ok_or_else(|| Error::not_found(format!("team '{team}'")))?;
                let mut parsed: SpecialistTeam = serde_json::from_str(&data)?;
                f(&mut parsed);
                conn.execute(
                    "UPDATE specialist_teams SET data = ?1 WHERE user_id = ?2 AND name = ?3",
                    params![serde_json::to_string(&parsed)?, user_id, team],
                )?;
                Ok(parsed)
            })
            .await
    }
}

#[async_trait]
impl TeamsStore for SqliteTeamsStore {
    async fn upsert(&self, team: SpecialistTeam) -> Result<()> {
        let data = serde_json::to_string(&team)?;
        self.db
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO specialist_teams (user_id, name, data) VALUES (?1, ?2, ?3) \
                     ON CONFLICT (user_id, name) DO UPDATE SET data = excluded.data",
                    params![team.user_id, team.name, data],
                )
                .map(|_| ())
            })
            .await
    }

    async fn get(&self, user_id: &str, name: &str) -> Result<SpecialistTeam> {
        let user_id = user_id.to_owned();
        let name = name.to_owned();
        self.db
            .blocking_app(move |conn| {
                let data: Option<String> = conn
                    .query_row(
                        "SELECT data FROM specialist_teams WHERE user_id = ?1 AND name = ?2",
                        params![user_id, name],
                        |row| row.get(0),
                    )
                    .optional()?;
                let data = data.ok_or_else(|| Error::not_found(format!("team '{name}'")))?;
                Ok(serde_json::from_str(&data)?)
            })
            .await
    }

    async fn delete(&self, user_id: &str, name: &str) -> Result<()> {
        let user_id = user_id.to_owned();
        let name = name.to_owned();
        self.db
            .blocking_app(move |conn| {
                let affected = conn.execute(
                    "DELETE FROM specialist_teams WHERE user_id = ?1 AND name = ?2",
                    params![user_id, name],
                )?;
                if affected == 0 {
                    return Err(Error::not_found(format!("team '{name}'")));
                }
                Ok(())
            })
            .await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SpecialistTeam>> {
        let user_id = user_id.to_owned();
        self.db
            .blocking_app(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT data FROM specialist_teams WHERE user_id = ?1 \
                     ORDER BY name COLLATE NOCASE ASC",
                )?;
                let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
                rows.map(|r| Ok(serde_json::from_str(&r?)?))
                    .collect::<Result<Vec<_>>>()
            })
            .await
    }

    async fn add_member(&self, user_id: &str, team: &str, member: &str) -> Result<SpecialistTeam> {
        let member = member.to_owned();
        self.mutate(user_id, team, move |t| t.add_member(member)).await
    }

    async fn remove_member(
        &self,
        user_id: &str,
        team: &str,
        member: &str,
    ) -> Result<SpecialistTeam> {
        let member = member.to_owned();
        self.mutate(user_id, team, move |t| t.remove_member(&member))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn specialist(user: &str, name: &str) -> Specialist {
        Specialist::named(user, name)
    }

    fn team(user: &str, name: &str) -> SpecialistTeam {
        let now = Utc::now();
        SpecialistTeam {
            user_id: user.to_owned(),
            name: name.to_owned(),
            description: String::new(),
            orchestrator: "lead".to_owned(),
            members: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn specialists_contract(store: &dyn SpecialistsStore) {
        store.upsert(specialist("u1", "Beta")).await.unwrap();
        store.upsert(specialist("u1", "alpha")).await.unwrap();
        store.upsert(specialist("u2", "other")).await.unwrap();

        // Upsert replaces.
        let mut replacement = specialist("u1", "alpha");
        replacement.model = "gpt-4o-mini".to_owned();
        store.upsert(replacement).await.unwrap();
        assert_eq!(store.get("u1", "alpha").await.unwrap().model, "gpt-4o-mini");

        // Case-insensitive sort, per-user namespace.
        let names: Vec<String> = store
            .list("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha", "Beta"]);

        assert_eq!(store.get("u2", "alpha").await.unwrap_err().kind(), "not_found");
        store.delete("u1", "alpha").await.unwrap();
        assert_eq!(store.delete("u1", "alpha").await.unwrap_err().kind(), "not_found");
    }

    async fn teams_contract(store: &dyn TeamsStore) {
        store.upsert(team("u1", "support")).await.unwrap();

        let updated = store.add_member("u1", "support", "billing").await.unwrap();
        assert_eq!(updated.members, vec!["billing"]);
        // Idempotent add.
        let updated = store.add_member("u1", "support", "billing").await.unwrap();
        assert_eq!(updated.members, vec!["billing"]);

        let updated = store.remove_member("u1", "support", "billing").await.unwrap();
        assert!(updated.members.is_empty());
        // Idempotent remove.
        assert!(store.remove_member("u1", "support", "billing").await.is_ok());

        assert_eq!(
            store.add_member("u1", "ghost", "x").await.unwrap_err().kind(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn memory_specialists_contract() {
        specialists_contract(&MemorySpecialistsStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_specialists_contract() {
        let store = SqliteSpecialistsStore::new(Db::in_memory().unwrap()).unwrap();
        specialists_contract(&store).await;
    }

    #[tokio::test]
    async fn memory_teams_contract() {
        teams_contract(&MemoryTeamsStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_teams_contract() {
        let store = SqliteTeamsStore::new(Db::in_memory().unwrap()).unwrap();
        teams_contract(&store).await;
    }
}
