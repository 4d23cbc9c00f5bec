//! Project persistence with optimistic locking.
//!
//! `update` succeeds only when the caller-supplied revision equals the
//! stored value; on success the revision increments. `update_stats` bypasses
//! the revision check. The file index enables non-recursive directory
//! listing: directories first, then names ascending.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, params};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::db::Db;

/// A user project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project id (UUID string).
    pub id: String,
    /// Owner.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Optimistic-lock revision.
    pub revision: i64,
    /// Total bytes stored.
    pub bytes: i64,
    /// Number of files.
    pub file_count: i64,
    /// Storage backend identifier.
    pub storage_backend: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A file index row enabling directory listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    /// Owning project.
    pub project_id: String,
    /// Path relative to the project root.
    pub path: String,
    /// Base name.
    pub name: String,
    /// True for directories.
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: i64,
    /// Last modification time.
    pub mod_time: DateTime<Utc>,
    /// Content etag.
    #[serde(default)]
    pub etag: String,
}

impl ProjectFile {
    /// Parent directory of this entry; empty string at the root.
    #[must_use]
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }
}

fn sort_listing(files: &mut [ProjectFile]) {
    files.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Persisted projects and their file index.
#[async_trait]
pub trait ProjectsStore: Send + Sync {
    /// Insert a new project.
    async fn create(&self, project: Project) -> Result<()>;

    /// Fetch a project, enforcing ownership.
    async fn get(&self, user_id: &str, id: &str) -> Result<Project>;

    /// Projects owned by the user, name ascending.
    async fn list(&self, user_id: &str) -> Result<Vec<Project>>;

    /// Update name/backend under the optimistic lock. On stale revision the
    /// stored row is untouched and `revision_conflict` is returned.
    async fn update(&self, project: Project) -> Result<Project>;

    /// Update size statistics, bypassing the revision check.
    async fn update_stats(&self, id: &str, bytes: i64, file_count: i64) -> Result<()>;

    /// Delete a project and its file index, enforcing ownership.
    async fn delete(&self, user_id: &str, id: &str) -> Result<()>;

    /// Insert or replace a file index row.
    async fn upsert_file(&self, file: ProjectFile) -> Result<()>;

    /// Remove a file index row.
    async fn delete_file(&self, project_id: &str, path: &str) -> Result<()>;

    /// Non-recursive, deterministic listing of `dir` (empty for the root):
    /// directories first, then names ascending.
    async fn list_files(&self, project_id: &str, dir: &str) -> Result<Vec<ProjectFile>>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryProjectsState {
    projects: HashMap<String, Project>,
    files: HashMap<(String, String), ProjectFile>,
}

/// In-memory projects store for tests and dev.
#[derive(Debug, Default)]
pub struct MemoryProjectsStore {
    state: RwLock<MemoryProjectsState>,
}

impl MemoryProjectsStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectsStore for MemoryProjectsStore {
    async fn create(&self, project: Project) -> Result<()> {
        let mut state = self.state.write().await;
        if state.projects.contains_key(&project.id) {
            return Err(Error::invalid(format!("project {} already exists", project.id)));
        }
        state.projects.insert(project.id.clone(), project);
        Ok(())
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Project> {
        let state = self.state.read().await;
        let project = state
            .projects
            .get(id)
            .ok_or_else(|| Error::not_found(format!("project {id}")))?;
        if project.user_id != user_id {
            return Err(Error::forbidden(format!("project {id}")));
        }
        Ok(project.clone())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Project>> {
        let state = self.state.read().await;
        let mut projects: Vec<Project> = state
            .projects
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn update(&self, project: Project) -> Result<Project> {
        let mut state = self.state.write().await;
        let stored = state
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| Error::not_found(format!("project {}", project.id)))?;
        if stored.user_id != project.user_id {
            return Err(Error::forbidden(format!("project {}", project.id)));
        }
        if stored.revision != project.revision {
            return Err(Error::RevisionConflict {
                stored: stored.revision,
                given: project.revision,
            });
        }
        stored.name = project.name;
        stored.storage_backend = project.storage_backend;
        stored.revision += 1;
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn update_stats(&self, id: &str, bytes: i64, file_count: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .projects
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("project {id}")))?;
        stored.bytes = bytes;
        stored.file_count = file_count;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let project = state
            .projects
            .get(id)
            .ok_or_else(|| Error::not_found(format!("project {id}")))?;
        if project.user_id != user_id {
            return Err(Error::forbidden(format!("project {id}")));
        }
        state.projects.remove(id);
        state.files.retain(|(pid, _), _| pid != id);
        Ok(())
    }

    async fn upsert_file(&self, file: ProjectFile) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .files
            .insert((file.project_id.clone(), file.path.clone()), file);
        Ok(())
    }

    async fn delete_file(&self, project_id: &str, path: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.files.remove(&(project_id.to_owned(), path.to_owned()));
        Ok(())
    }

    async fn list_files(&self, project_id: &str, dir: &str) -> Result<Vec<ProjectFile>> {
        let state = self.state.read().await;
        let mut files: Vec<ProjectFile> = state
            .files
            .values()
            .filter(|f| f.project_id == project_id && f.parent() == dir)
            .cloned()
            .collect();
        sort_listing(&mut files);
        Ok(files)
    }
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// SQLite-backed projects store.
#[derive(Debug, Clone)]
pub struct SqliteProjectsStore {
    db: Db,
}

impl SqliteProjectsStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS projects (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL,
                name            TEXT NOT NULL,
                revision        INTEGER NOT NULL DEFAULT 0,
                bytes           INTEGER NOT NULL DEFAULT 0,
                file_count      INTEGER NOT NULL DEFAULT 0,
                storage_backend TEXT NOT NULL DEFAULT 'local',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_files (
                project_id TEXT NOT NULL,
                path       TEXT NOT NULL,
                parent     TEXT NOT NULL,
                name       TEXT NOT NULL,
                is_dir     INTEGER NOT NULL,
                size       INTEGER NOT NULL DEFAULT 0,
                mod_time   TEXT NOT NULL,
                etag       TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (project_id, path)
            );

            CREATE INDEX IF NOT EXISTS idx_project_files_parent
            ON project_files (project_id, parent);",
        )?;
        Ok(Self { db })
    }

    fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
        let created: String = row.get(7)?;
        let updated: String = row.get(8)?;
        Ok(Project {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            revision: row.get(3)?,
            bytes: row.get(4)?,
            file_count: row.get(5)?,
            storage_backend: row.get(6)?,
            created_at: created.parse().unwrap_or_else(|_| Utc::now()),
            updated_at: updated.parse().unwrap_or_else(|_| Utc::now()),
        })
    }

    const PROJECT_COLS: &'static str =
        "id, user_id, name, revision, bytes, file_count, storage_backend, created_at, updated_at";
}

#[async_trait]
impl ProjectsStore for SqliteProjectsStore {
    async fn create(&self, project: Project) -> Result<()> {
        self.db
            .blocking_app(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO projects \
                     (id, user_id, name, revision, bytes, file_count, storage_backend, \
                      created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        project.id,
                        project.user_id,
                        project.name,
                        project.revision,
                        project.bytes,
                        project.file_count,
                        project.storage_backend,
                        project.created_at.to_rfc3339(),
                        project.updated_at.to_rfc3339(),
                    ],
                )?;
                if inserted == 0 {
                    return Err(Error::invalid(format!("project {} already exists", project.id)));
                }
                Ok(())
            })
            .await
    }

    async fn get(&self, user_id: &str, id: &str) -> Result<Project> {
        let user_id = user_id.to_owned();
        let id = id.to_owned();
        self.db
            .blocking_app(move |conn| {
                let project = conn
                    .query_row(
                        &format!("SELECT {} FROM projects WHERE id = ?1", Self::PROJECT_COLS),
                        params![id],
                        Self::row_to_project,
                    )
                    .optional()?
                    .ok_or_else(|| Error::not_found(format!("project {id}")))?;
                if project.user_id != user_id {
                    return Err(Error::forbidden(format!("project {id}")));
                }
                Ok(project)
            })
            .await
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Project>> {
        let user_id = user_id.to_owned();
        self.db
            .blocking_app(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM projects WHERE user_id = ?1 ORDER BY name ASC",
                    Self::PROJECT_COLS
                ))?;
                let rows = stmt.query_map(params![user_id], Self::row_to_project)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    async fn update(&self, project: Project) -> Result<Project> {
        self.db
            .blocking_app(move |conn| {
                let stored = conn
                    .query_row(
                        &format!("SELECT {} FROM projects WHERE id = ?1", Self::PROJECT_COLS),
                        params![project.id],
                        Self::row_to_project,
                    )
                    .optional()?
                    .ok_or_else(|| Error::not_found(format!("project {}", project.id)))?;
                if stored.user_id != project.user_id {
                    return Err(Error::forbidden(format!("project {}", project.id)));
                }

                let now = Utc::now();
                // The revision guard is in the WHERE clause so the check and
                // the increment are one atomic statement.
                let affected = conn.execute(
                    "UPDATE projects \
                     SET name = ?1, storage_backend = ?2, revision = revision + 1, \
                         updated_at = ?3 \
                     WHERE id = ?4 AND revision = ?5",
                    params![
                        project.name,
                        project.storage_backend,
                        now.to_rfc3339(),
                        project.id,
                        project.revision,
                    ],
                )?;
                if affected == 0 {
                    return Err(Error::RevisionConflict {
                        stored: stored.revision,
                        given: project.revision,
                    });
                }

                Ok(Project {
                    name: project.name,
                    storage_backend: project.storage_backend,
                    revision: project.revision + 1,
                    updated_at: now,
                    ..stored
                })
            })
            .await
    }

    async fn update_stats(&self, id: &str, bytes: i64, file_count: i64) -> Result<()> {
        let id = id.to_owned();
        self.db
            .blocking_app(move |conn| {
                let affected = conn.execute(
                    "UPDATE projects SET bytes = ?1, file_count = ?2, updated_at = ?3 \
                     WHERE id = ?4",
                    params![bytes, file_count, Utc::now().to_rfc3339(), id],
                )?;
                if affected == 0 {
                    return Err(Error::not_found(format!("project {id}")));
                }
                Ok(())
            })
            .await
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        let user_id = user_id.to_owned();
        let id = id.to_owned();
        self.db
            .blocking_app(move |conn| {
                let owner: Option<String> = conn
                    .query_row(
                        "SELECT user_id FROM projects WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                match owner {
                    None => return Err(Error::not_found(format!("project {id}"))),
                    Some(owner) if owner != user_id => {
                        return Err(Error::forbidden(format!("project {id}")));
                    }
                    Some(_) => {}
                }
                conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
                conn.execute(
                    "DELETE FROM project_files WHERE project_id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await
    }

    async fn upsert_file(&self, file: ProjectFile) -> Result<()> {
        self.db
            .blocking_app(move |conn| {
                let parent = file.parent().to_owned();
                conn.execute(
                    "INSERT INTO project_files \
                     (project_id, path, parent, name, is_dir, size, mod_time, etag) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT (project_id, path) DO UPDATE SET \
                       name = excluded.name, is_dir = excluded.is_dir, \
                       size = excluded.size, mod_time = excluded.mod_time, \
                       etag = excluded.etag",
                    params![
                        file.project_id,
                        file.path,
                        parent,
                        file.name,
                        file.is_dir,
                        file.size,
                        file.mod_time.to_rfc3339(),
                        file.etag,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn delete_file(&self, project_id: &str, path: &str) -> Result<()> {
        let project_id = project_id.to_owned();
        let path = path.to_owned();
        self.db
            .blocking_app(move |conn| {
                conn.execute(
                    "DELETE FROM project_files WHERE project_id = ?1 AND path = ?2",
                    params![project_id, path],
                )?;
                Ok(())
            })
            .await
    }

    async fn list_files(&self, project_id: &str, dir: &str) -> Result<Vec<ProjectFile>> {
        let project_id = project_id.to_owned();
        let dir = dir.to_owned();
        self.db
            .blocking_app(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT project_id, path, name, is_dir, size, mod_time, etag \
                     FROM project_files \
                     WHERE project_id = ?1 AND parent = ?2 \
                     ORDER BY is_dir DESC, name ASC",
                )?;
                let rows = stmt.query_map(params![project_id, dir], |row| {
                    let mod_time: String = row.get(5)?;
                    Ok(ProjectFile {
                        project_id: row.get(0)?,
                        path: row.get(1)?,
                        name: row.get(2)?,
                        is_dir: row.get(3)?,
                        size: row.get(4)?,
                        mod_time: mod_time.parse().unwrap_or_else(|_| Utc::now()),
                        etag: row.get(6)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: &str, user: &str) -> Project {
        let now = Utc::now();
        Project {
            id: id.to_owned(),
            user_id: user.to_owned(),
            name: format!("Project {id}"),
            revision: 0,
            bytes: 0,
            file_count: 0,
            storage_backend: "local".to_owned(),
            created_at: now,
            updated_at: now,
        }
    }

    fn file(project_id: &str, path: &str, is_dir: bool) -> ProjectFile {
        let name = path.rsplit('/').next().unwrap_or(path).to_owned();
        ProjectFile {
            project_id: project_id.to_owned(),
            path: path.to_owned(),
            name,
            is_dir,
            size: if is_dir { 0 } else { 10 },
            mod_time: Utc::now(),
            etag: String::new(),
        }
    }

    async fn stale_revision_conflicts_without_mutation(store: &dyn ProjectsStore) {
        store.create(project("p1", "u1")).await.unwrap();

        let mut first = project("p1", "u1");
        first.name = "Renamed".to_owned();
        let updated = store.update(first).await.unwrap();
        assert_eq!(updated.revision, 1);

        // A second writer still holding revision 0 must conflict.
        let mut stale = project("p1", "u1");
        stale.name = "Hijacked".to_owned();
        let err = store.update(stale).await.unwrap_err();
        assert_eq!(err.kind(), "revision_conflict");

        let current = store.get("u1", "p1").await.unwrap();
        assert_eq!(current.name, "Renamed");
        assert_eq!(current.revision, 1);
    }

    async fn stats_bypass_revision(store: &dyn ProjectsStore) {
        store.create(project("p2", "u1")).await.unwrap();
        store.update_stats("p2", 1024, 3).await.unwrap();
        let current = store.get("u1", "p2").await.unwrap();
        assert_eq!(current.bytes, 1024);
        assert_eq!(current.file_count, 3);
        assert_eq!(current.revision, 0);
    }

    async fn ownership_checks(store: &dyn ProjectsStore) {
        store.create(project("p3", "owner")).await.unwrap();
        assert_eq!(store.get("other", "p3").await.unwrap_err().kind(), "forbidden");
        assert_eq!(store.delete("other", "p3").await.unwrap_err().kind(), "forbidden");
        assert_eq!(store.get("owner", "ghost").await.unwrap_err().kind(), "not_found");
    }

    async fn listing_is_non_recursive_dirs_first(store: &dyn ProjectsStore) {
        store.create(project("p4", "u1")).await.unwrap();
        for f in [
            file("p4", "zeta.txt", false),
            file("p4", "alpha.txt", false),
            file("p4", "src", true),
            file("p4", "src/main.rs", false),
            file("p4", "docs", true),
        ] {
            store.upsert_file(f).await.unwrap();
        }

        let root = store.list_files("p4", "").await.unwrap();
        let names: Vec<&str> = root.iter().map(|f| f.name.as_str()).collect();
        // Directories first, then names ascending; nothing from src/.
        assert_eq!(names, vec!["docs", "src", "alpha.txt", "zeta.txt"]);

        let src = store.list_files("p4", "src").await.unwrap();
        assert_eq!(src.len(), 1);
        assert_eq!(src[0].path, "src/main.rs");
    }

    async fn run_contract(store: &dyn ProjectsStore) {
        stale_revision_conflicts_without_mutation(store).await;
        stats_bypass_revision(store).await;
        ownership_checks(store).await;
        listing_is_non_recursive_dirs_first(store).await;
    }

    #[tokio::test]
    async fn memory_store_contract() {
        run_contract(&MemoryProjectsStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        let store = SqliteProjectsStore::new(Db::in_memory().unwrap()).unwrap();
        run_contract(&store).await;
    }

    #[tokio::test]
    async fn delete_file_removes_index_row() {
        let store = MemoryProjectsStore::new();
        store.create(project("p5", "u1")).await.unwrap();
        store.upsert_file(file("p5", "a.txt", false)).await.unwrap();
        store.delete_file("p5", "a.txt").await.unwrap();
        assert!(store.list_files("p5", "").await.unwrap().is_empty());
    }
}
