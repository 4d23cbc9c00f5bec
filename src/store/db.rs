//! Shared SQLite handle for the durable stores.
//!
//! Wraps a [`rusqlite::Connection`] behind `Arc<Mutex<_>>` and bridges
//! synchronous access onto the tokio blocking pool. Every sqlite-backed
//! store clones one [`Db`], so a single database file serves all of them.
//! WAL journal mode and a busy timeout keep concurrent readers cheap.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{Error, Result};

/// A cloneable database handle.
#[derive(Debug, Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) a database at `path` and apply pragmas.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path.as_ref())?)
    }

    /// Open an ephemeral in-process database (data lost on drop).
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\
             PRAGMA foreign_keys = ON;\
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run schema statements synchronously at construction time.
    pub fn init_schema(&self, sql: &str) -> Result<()> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| Error::backend(format!("db lock poisoned: {e}")))?;
        guard.execute_batch(sql)?;
        Ok(())
    }

    /// Bridge a synchronous closure onto the tokio blocking thread pool.
    ///
    /// The closure receives the locked [`Connection`]; errors convert at the
    /// boundary.
    pub async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| Error::backend(format!("db lock poisoned: {e}")))?;
            f(&guard).map_err(Error::from)
        })
        .await
        .map_err(|e| Error::backend(format!("blocking task failed: {e}")))?
    }

    /// Like [`blocking`](Self::blocking), for closures that produce crate
    /// errors directly (ownership checks, conflict detection).
    pub async fn blocking_app<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| Error::backend(format!("db lock poisoned: {e}")))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::backend(format!("blocking task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_init_and_query() {
        let db = Db::in_memory().unwrap();
        db.init_schema("CREATE TABLE t (x INTEGER)").unwrap();

        db.blocking(|conn| conn.execute("INSERT INTO t (x) VALUES (7)", []))
            .await
            .unwrap();
        let x: i64 = db
            .blocking(|conn| conn.query_row("SELECT x FROM t", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(x, 7);
    }

    #[tokio::test]
    async fn clones_share_one_database() {
        let db = Db::in_memory().unwrap();
        db.init_schema("CREATE TABLE t (x INTEGER)").unwrap();
        let other = db.clone();

        other
            .blocking(|conn| conn.execute("INSERT INTO t (x) VALUES (1)", []))
            .await
            .unwrap();
        let count: i64 = db
            .blocking(|conn| conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
