//! Vector similarity stores.
//!
//! The store declares its dimension at construction and rejects mismatched
//! vectors afterwards. The in-memory implementation scans and scores; the
//! SQLite implementation persists vectors as JSON rows and scores in
//! process, which is adequate for the corpus sizes a single runtime serves.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::params;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::VectorMetric;
use crate::error::{Error, Result};
use crate::store::db::Db;

use super::Filters;

/// One ranked vector hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    /// Chunk id.
    pub id: String,
    /// Similarity score (higher is better).
    pub score: f64,
}

/// Vector similarity search keyed by chunk id.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Declared vector dimension.
    fn dimensions(&self) -> usize;

    /// Insert or replace a vector with filterable metadata.
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()>;

    /// Top-k most similar ids.
    async fn query(&self, vector: &[f32], k: usize, filters: &Filters) -> Result<Vec<VectorHit>>;

    /// Remove a vector.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Score `a` against `b` under the metric; higher is always better, so
/// distance metrics negate.
#[must_use]
pub fn score(metric: VectorMetric, a: &[f32], b: &[f32]) -> f64 {
    match metric {
        VectorMetric::Cosine => {
            let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
            let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
            let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                0.0
            } else {
                dot / (norm_a * norm_b)
            }
        }
        VectorMetric::Ip => a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum(),
        VectorMetric::L2 => {
            -a.iter()
                .zip(b)
                .map(|(x, y)| (f64::from(*x) - f64::from(*y)).powi(2))
                .sum::<f64>()
                .sqrt()
        }
        VectorMetric::Manhattan => {
            -a.iter()
                .zip(b)
                .map(|(x, y)| (f64::from(*x) - f64::from(*y)).abs())
                .sum::<f64>()
        }
    }
}

fn metadata_matches(filters: &Filters, metadata: &Value) -> bool {
    if let Some(tenant) = &filters.tenant {
        if metadata.get("tenant").and_then(Value::as_str) != Some(tenant.as_str()) {
            return false;
        }
    }
    if let Some(lang) = &filters.lang {
        if let Some(meta_lang) = metadata.get("lang").and_then(Value::as_str) {
            if !meta_lang.is_empty() && meta_lang != lang {
                return false;
            }
        }
    }
    filters.extra.iter().all(|(key, want)| {
        metadata.get(key).and_then(Value::as_str) == Some(want.as_str())
    })
}

fn check_dimensions(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::invalid(format!(
            "vector dimension mismatch: store declares {expected}, got {got}"
        )));
    }
    Ok(())
}

fn rank(mut hits: Vec<VectorHit>, k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}

/// In-memory vector store.
#[derive(Debug)]
pub struct MemoryVectorStore {
    dimensions: usize,
    metric: VectorMetric,
    rows: RwLock<HashMap<String, (Vec<f32>, Value)>>,
}

impl MemoryVectorStore {
    /// Create a store with the given geometry.
    #[must_use]
    pub fn new(dimensions: usize, metric: VectorMetric) -> Self {
        Self {
            dimensions,
            metric,
            rows: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()> {
        check_dimensions(self.dimensions, vector.len())?;
        self.rows
            .write()
            .await
            .insert(id.to_owned(), (vector, metadata));
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize, filters: &Filters) -> Result<Vec<VectorHit>> {
        check_dimensions(self.dimensions, vector.len())?;
        let rows = self.rows.read().await;
        let hits: Vec<VectorHit> = rows
            .iter()
            .filter(|(_, (_, metadata))| metadata_matches(filters, metadata))
            .map(|(id, (stored, _))| VectorHit {
                id: id.clone(),
                score: score(self.metric, vector, stored),
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.rows.write().await.remove(id);
        Ok(())
    }
}

/// SQLite-backed vector store; vectors persist as JSON rows.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    db: Db,
    dimensions: usize,
    metric: VectorMetric,
}

impl SqliteVectorStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db, dimensions: usize, metric: VectorMetric) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS vectors (
                id       TEXT PRIMARY KEY,
                vector   TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT 'null'
            );",
        )?;
        Ok(Self {
            db,
            dimensions,
            metric,
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> Result<()> {
        check_dimensions(self.dimensions, vector.len())?;
        let id = id.to_owned();
        let vector = serde_json::to_string(&vector)?;
        let metadata = serde_json::to_string(&metadata)?;
        self.db
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO vectors (id, vector, metadata) VALUES (?1, ?2, ?3) \
                     ON CONFLICT (id) DO UPDATE SET \
                       vector = excluded.vector, metadata = excluded.metadata",
                    params![id, vector, metadata],
                )
                .map(|_| ())
            })
            .await
    }

    async fn query(&self, vector: &[f32], k: usize, filters: &Filters) -> Result<Vec<VectorHit>> {
        check_dimensions(self.dimensions, vector.len())?;
        let query = vector.to_vec();
        let filters = filters.clone();
        let metric = self.metric;
        self.db
            .blocking(move |conn| {
                let mut stmt = conn.prepare("SELECT id, vector, metadata FROM vectors")?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;

                let mut hits = Vec::new();
                for row in rows {
                    let (id, vector_json, metadata_json) = row?;
                    let metadata: Value =
                        serde_json::from_str(&metadata_json).unwrap_or(Value::Null);
                    if !metadata_matches(&filters, &metadata) {
                        continue;
                    }
                    let Ok(stored) = serde_json::from_str::<Vec<f32>>(&vector_json) else {
                        continue;
                    };
                    if stored.len() != query.len() {
                        continue;
                    }
                    hits.push(VectorHit {
                        id,
                        score: score(metric, &query, &stored),
                    });
                }
                Ok(rank(hits, k))
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_owned();
        self.db
            .blocking(move |conn| conn.execute("DELETE FROM vectors WHERE id = ?1", params![id]).map(|_| ()))
            .await
    }
}
