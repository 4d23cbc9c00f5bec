//! Full-text candidate stores.
//!
//! Two implementations share one trait: an in-memory inverted index for
//! tests and dev, and SQLite FTS5 (shipped with the bundled build) for the
//! durable backend. Both are chunk-aware: the unit of search is the chunk,
//! with document rows kept alongside for metadata attachment and
//! idempotency lookups.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::{OptionalExtension as _, params};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::store::db::Db;

use super::{Chunk, Doc, Filters};

/// One ranked full-text hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Chunk id.
    pub id: String,
    /// Owning document.
    pub doc_id: String,
    /// Backend score (higher is better).
    pub score: f64,
    /// Chunk text.
    pub text: String,
    /// Backend-native headline, when the backend produces one.
    pub headline: Option<String>,
}

/// Chunk-aware full-text search.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Upsert a document row.
    async fn upsert_doc(&self, doc: &Doc) -> Result<()>;

    /// Upsert the chunks of a document, replacing previous chunk rows.
    async fn upsert_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Ranked chunk search.
    async fn search_chunks(
        &self,
        query: &str,
        k: usize,
        filters: &Filters,
    ) -> Result<Vec<SearchHit>>;

    /// Fetch a document row.
    async fn doc(&self, doc_id: &str) -> Result<Option<Doc>>;

    /// Find a document by its content hash.
    async fn doc_by_hash(&self, doc_hash: &str) -> Result<Option<Doc>>;

    /// Fetch a chunk by id.
    async fn chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Number of indexed chunks.
    async fn chunk_count(&self) -> Result<usize>;
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemorySearchState {
    docs: HashMap<String, Doc>,
    chunks: HashMap<String, Chunk>,
    by_doc: HashMap<String, Vec<String>>,
}

/// In-memory inverted-index search store.
#[derive(Debug, Default)]
pub struct MemorySearchStore {
    state: RwLock<MemorySearchState>,
}

impl MemorySearchStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchStore for MemorySearchStore {
    async fn upsert_doc(&self, doc: &Doc) -> Result<()> {
        self.state.write().await.docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn upsert_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(old) = state.by_doc.remove(doc_id) {
            for id in old {
                state.chunks.remove(&id);
            }
        }
        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            ids.push(chunk.id.clone());
            state.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        state.by_doc.insert(doc_id.to_owned(), ids);
        Ok(())
    }

    async fn search_chunks(
        &self,
        query: &str,
        k: usize,
        filters: &Filters,
    ) -> Result<Vec<SearchHit>> {
        let terms = tokenize(query);
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().await;
        let mut hits: Vec<SearchHit> = Vec::new();
        for chunk in state.chunks.values() {
            if !filters.matches_chunk(chunk) {
                continue;
            }
            let chunk_terms = tokenize(&chunk.text);
            let mut score = 0.0;
            for term in &terms {
                let tf = chunk_terms.iter().filter(|t| *t == term).count();
                score += tf as f64;
            }
            if score > 0.0 {
                hits.push(SearchHit {
                    id: chunk.id.clone(),
                    doc_id: chunk.doc_id.clone(),
                    score,
                    text: chunk.text.clone(),
                    headline: None,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn doc(&self, doc_id: &str) -> Result<Option<Doc>> {
        Ok(self.state.read().await.docs.get(doc_id).cloned())
    }

    async fn doc_by_hash(&self, doc_hash: &str) -> Result<Option<Doc>> {
        Ok(self
            .state
            .read()
            .await
            .docs
            .values()
            .find(|d| d.doc_hash == doc_hash)
            .cloned())
    }

    async fn chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        Ok(self.state.read().await.chunks.get(chunk_id).cloned())
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.state.read().await.chunks.len())
    }
}

// ---------------------------------------------------------------------------
// SQLite FTS5 implementation
// ---------------------------------------------------------------------------

/// SQLite-backed search store using FTS5 for chunk text.
#[derive(Debug, Clone)]
pub struct SqliteSearchStore {
    db: Db,
}

impl SqliteSearchStore {
    /// Bind to a database, creating the schema when missing.
    pub fn new(db: Db) -> Result<Self> {
        db.init_schema(
            "CREATE TABLE IF NOT EXISTS search_docs (
                id        TEXT PRIMARY KEY,
                title     TEXT,
                url       TEXT,
                source    TEXT NOT NULL DEFAULT '',
                tenant    TEXT,
                lang      TEXT NOT NULL DEFAULT '',
                doc_hash  TEXT NOT NULL DEFAULT '',
                version   INTEGER NOT NULL DEFAULT 1,
                metadata  TEXT NOT NULL DEFAULT 'null'
            );

            CREATE INDEX IF NOT EXISTS idx_search_docs_hash ON search_docs (doc_hash);

            CREATE TABLE IF NOT EXISTS search_chunks (
                id      TEXT PRIMARY KEY,
                doc_id  TEXT NOT NULL,
                idx     INTEGER NOT NULL,
                text    TEXT NOT NULL,
                lang    TEXT NOT NULL DEFAULT '',
                tenant  TEXT,
                version INTEGER NOT NULL DEFAULT 1
            );

            CREATE INDEX IF NOT EXISTS idx_search_chunks_doc ON search_chunks (doc_id, idx);

            CREATE VIRTUAL TABLE IF NOT EXISTS search_chunks_fts USING fts5(
                id UNINDEXED,
                text
            );",
        )?;
        Ok(Self { db })
    }

    /// FTS5 query syntax is unforgiving; rewrite the free-text query as an
    /// OR of quoted tokens.
    fn fts_query(query: &str) -> String {
        tokenize(query)
            .into_iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    fn row_to_doc(row: &rusqlite::Row<'_>) -> rusqlite::Result<Doc> {
        let metadata: String = row.get(8)?;
        Ok(Doc {
            id: row.get(0)?,
            title: row.get(1)?,
            url: row.get(2)?,
            source: row.get(3)?,
            tenant: row.get(4)?,
            lang: row.get(5)?,
            doc_hash: row.get(6)?,
            version: row.get(7)?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            acl: Vec::new(),
        })
    }

    const DOC_COLS: &'static str =
        "id, title, url, source, tenant, lang, doc_hash, version, metadata";
}

#[async_trait]
impl SearchStore for SqliteSearchStore {
    async fn upsert_doc(&self, doc: &Doc) -> Result<()> {
        let doc = doc.clone();
        let metadata = serde_json::to_string(&doc.metadata)?;
        self.db
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO search_docs \
                     (id, title, url, source, tenant, lang, doc_hash, version, metadata) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT (id) DO UPDATE SET \
                       title = excluded.title, url = excluded.url, \
                       source = excluded.source, tenant = excluded.tenant, \
                       lang = excluded.lang, doc_hash = excluded.doc_hash, \
                       version = excluded.version, metadata = excluded.metadata",
                    params![
                        doc.id,
                        doc.title,
                        doc.url,
                        doc.source,
                        doc.tenant,
                        doc.lang,
                        doc.doc_hash,
                        doc.version,
                        metadata,
                    ],
                )
                .map(|_| ())
            })
            .await
    }

    async fn upsert_chunks(&self, doc_id: &str, chunks: &[Chunk]) -> Result<()> {
        let doc_id = doc_id.to_owned();
        let chunks = chunks.to_vec();
        self.db
            .blocking(move |conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "DELETE FROM search_chunks_fts WHERE id IN \
                     (SELECT id FROM search_chunks WHERE doc_id = ?1)",
                    params![doc_id],
                )?;
                tx.execute("DELETE FROM search_chunks WHERE doc_id = ?1", params![doc_id])?;
                {
                    let mut rows = tx.prepare(
                        "INSERT INTO search_chunks (id, doc_id, idx, text, lang, tenant, version) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    )?;
                    let mut fts = tx
                        .prepare("INSERT INTO search_chunks_fts (id, text) VALUES (?1, ?2)")?;
                    for chunk in &chunks {
                        rows.execute(params![
                            chunk.id,
                            chunk.doc_id,
                            chunk.idx as i64,
                            chunk.text,
                            chunk.lang,
                            chunk.tenant,
                            chunk.version,
                        ])?;
                        fts.execute(params![chunk.id, chunk.text])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn search_chunks(
        &self,
        query: &str,
        k: usize,
        filters: &Filters,
    ) -> Result<Vec<SearchHit>> {
        let fts_query = Self::fts_query(query);
        if fts_query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let filters = filters.clone();
        self.db
            .blocking(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT c.id, c.doc_id, c.text, c.lang, c.tenant, \
                            bm25(search_chunks_fts), \
                            snippet(search_chunks_fts, 1, '', '', '…', 24) \
                     FROM search_chunks_fts f \
                     JOIN search_chunks c ON c.id = f.id \
                     WHERE search_chunks_fts MATCH ?1 \
                     ORDER BY bm25(search_chunks_fts) ASC \
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![fts_query, (k * 4) as i64], |row| {
                    let bm25: f64 = row.get(5)?;
                    Ok((
                        SearchHit {
                            id: row.get(0)?,
                            doc_id: row.get(1)?,
                            // bm25() returns lower-is-better; negate.
                            score: -bm25,
                            text: row.get(2)?,
                            headline: row.get(6)?,
                        },
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?;

                let mut hits = Vec::new();
                for row in rows {
                    let (hit, lang, tenant) = row?;
                    if let Some(want) = &filters.tenant {
                        if tenant.as_deref() != Some(want.as_str()) {
                            continue;
                        }
                    }
                    if let Some(want) = &filters.lang {
                        if !lang.is_empty() && lang != *want {
                            continue;
                        }
                    }
                    hits.push(hit);
                    if hits.len() == k {
                        break;
                    }
                }
                Ok(hits)
            })
            .await
    }

    async fn doc(&self, doc_id: &str) -> Result<Option<Doc>> {
        let doc_id = doc_id.to_owned();
        self.db
            .blocking(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM search_docs WHERE id = ?1", Self::DOC_COLS),
                    params![doc_id],
                    Self::row_to_doc,
                )
                .optional()
            })
            .await
    }

    async fn doc_by_hash(&self, doc_hash: &str) -> Result<Option<Doc>> {
        let doc_hash = doc_hash.to_owned();
        self.db
            .blocking(move |conn| {
                conn.query_row(
                    &format!(
                        "SELECT {} FROM search_docs WHERE doc_hash = ?1 LIMIT 1",
                        Self::DOC_COLS
                    ),
                    params![doc_hash],
                    Self::row_to_doc,
                )
                .optional()
            })
            .await
    }

    async fn chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let chunk_id = chunk_id.to_owned();
        self.db
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT id, doc_id, idx, text, lang, tenant, version \
                     FROM search_chunks WHERE id = ?1",
                    params![chunk_id],
                    |row| {
                        Ok(Chunk {
                            id: row.get(0)?,
                            doc_id: row.get(1)?,
                            idx: row.get::<_, i64>(2)? as usize,
                            text: row.get(3)?,
                            lang: row.get(4)?,
                            tenant: row.get(5)?,
                            version: row.get(6)?,
                        })
                    },
                )
                .optional()
            })
            .await
    }

    async fn chunk_count(&self) -> Result<usize> {
        self.db
            .blocking(|conn| {
                conn.query_row("SELECT COUNT(*) FROM search_chunks", [], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .await
            .map(|n| n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::chunk_id;

    fn doc(id: &str, tenant: Option<&str>) -> Doc {
        Doc {
            id: id.to_owned(),
            title: Some(format!("Title {id}")),
            url: Some(format!("https://docs/{id}")),
            source: "upload".to_owned(),
            tenant: tenant.map(str::to_owned),
            lang: "english".to_owned(),
            doc_hash: format!("hash-{id}"),
            version: 1,
            metadata: serde_json::Value::Null,
            acl: Vec::new(),
        }
    }

    fn chunk(doc_id: &str, idx: usize, text: &str, tenant: Option<&str>) -> Chunk {
        Chunk {
            id: chunk_id(doc_id, idx),
            doc_id: doc_id.to_owned(),
            idx,
            text: text.to_owned(),
            lang: "english".to_owned(),
            tenant: tenant.map(str::to_owned),
            version: 1,
        }
    }

    async fn ranked_search(store: &dyn SearchStore) {
        store.upsert_doc(&doc("d1", Some("acme"))).await.unwrap();
        store
            .upsert_chunks(
                "d1",
                &[
                    chunk("d1", 0, "alpha alpha beta", Some("acme")),
                    chunk("d1", 1, "alpha only once here", Some("acme")),
                    chunk("d1", 2, "nothing relevant", Some("acme")),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search_chunks("alpha", 10, &Filters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, chunk_id("d1", 0));
        assert_eq!(hits[1].id, chunk_id("d1", 1));
    }

    async fn tenant_filtering(store: &dyn SearchStore) {
        store.upsert_doc(&doc("d2", Some("acme"))).await.unwrap();
        store.upsert_doc(&doc("d3", Some("globex"))).await.unwrap();
        store
            .upsert_chunks("d2", &[chunk("d2", 0, "shared keyword", Some("acme"))])
            .await
            .unwrap();
        store
            .upsert_chunks("d3", &[chunk("d3", 0, "shared keyword", Some("globex"))])
            .await
            .unwrap();

        let filters = Filters {
            tenant: Some("acme".into()),
            ..Filters::default()
        };
        let hits = store.search_chunks("shared", 10, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "d2");
    }

    async fn reingestion_replaces_chunks(store: &dyn SearchStore) {
        store.upsert_doc(&doc("d4", None)).await.unwrap();
        store
            .upsert_chunks("d4", &[chunk("d4", 0, "first version text", None)])
            .await
            .unwrap();
        store
            .upsert_chunks("d4", &[chunk("d4", 0, "second version text", None)])
            .await
            .unwrap();

        let fetched = store.chunk(&chunk_id("d4", 0)).await.unwrap().unwrap();
        assert_eq!(fetched.text, "second version text");
        let hits = store
            .search_chunks("first", 10, &Filters::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    async fn hash_lookup(store: &dyn SearchStore) {
        store.upsert_doc(&doc("d5", None)).await.unwrap();
        let found = store.doc_by_hash("hash-d5").await.unwrap().unwrap();
        assert_eq!(found.id, "d5");
        assert!(store.doc_by_hash("missing").await.unwrap().is_none());
    }

    async fn run_contract(store: &dyn SearchStore) {
        ranked_search(store).await;
        tenant_filtering(store).await;
        reingestion_replaces_chunks(store).await;
        hash_lookup(store).await;
    }

    #[tokio::test]
    async fn memory_store_contract() {
        run_contract(&MemorySearchStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        let store = SqliteSearchStore::new(Db::in_memory().unwrap()).unwrap();
        run_contract(&store).await;
    }

    #[test]
    fn fts_query_quotes_tokens() {
        assert_eq!(
            SqliteSearchStore::fts_query("hello, world!"),
            "\"hello\" OR \"world\""
        );
        assert_eq!(SqliteSearchStore::fts_query("?!"), "");
    }
}
