//! The ingestion pipeline.
//!
//! Per document: preprocess, consult the idempotency policy against a hash
//! lookup, chunk, index into search, optionally embed into the vector
//! store (batched, with a minimum inter-call delay), and optionally upsert
//! the document graph.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::retrieval::{Chunk, Doc, GraphStore, SearchStore, VectorStore, chunk_id};

use super::chunk::{ChunkOptions, split_text};
use super::normalize::{doc_hash, normalize_text};
use crate::retrieval::plan::detect_language;

/// Embedding batch size.
const EMBED_BATCH: usize = 16;

/// How an ingest call treats already-indexed content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IngestPolicy {
    /// Existing unchanged content is a no-op.
    #[default]
    SkipIfUnchanged,
    /// Reuse the doc id and version, replacing the indexed content.
    Overwrite,
    /// Reuse the doc id and increment the version.
    NewVersion,
}

/// One document to ingest.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// Explicit doc id; derived from the hash lookup or generated when
    /// absent.
    pub id: Option<String>,
    /// Title.
    pub title: Option<String>,
    /// Source URL.
    pub url: Option<String>,
    /// Origin system.
    pub source: String,
    /// Tenant label.
    pub tenant: Option<String>,
    /// Raw text.
    pub text: String,
    /// Free-form metadata.
    pub metadata: Value,
    /// Idempotency policy.
    pub policy: IngestPolicy,
    /// Chunking options.
    pub chunking: ChunkOptions,
    /// Embed chunks into the vector store.
    pub embed: bool,
    /// Upsert the document graph.
    pub graph: bool,
}

/// What an ingest call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// The document id.
    pub doc_id: String,
    /// The resulting version.
    pub version: i64,
    /// Chunks indexed (0 when skipped).
    pub chunks: usize,
    /// True when the policy made the call a no-op.
    pub skipped: bool,
}

/// The ingestion pipeline.
#[derive(Clone)]
pub struct Ingestor {
    search: Arc<dyn SearchStore>,
    vector: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    graph: Option<Arc<dyn GraphStore>>,
    min_embed_delay: Duration,
}

impl Ingestor {
    /// Create a pipeline over the search store.
    #[must_use]
    pub fn new(search: Arc<dyn SearchStore>) -> Self {
        Self {
            search,
            vector: None,
            embedder: None,
            graph: None,
            min_embed_delay: Duration::from_millis(50),
        }
    }

    /// Attach the vector store and embedder.
    #[must_use]
    pub fn with_vector(
        mut self,
        vector: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        self.vector = Some(vector);
        self.embedder = Some(embedder);
        self
    }

    /// Attach the graph store.
    #[must_use]
    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Override the minimum delay between embedding calls.
    #[must_use]
    pub const fn with_min_embed_delay(mut self, delay: Duration) -> Self {
        self.min_embed_delay = delay;
        self
    }

    /// Ingest one document.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        // Preprocess.
        let norm_text = normalize_text(&request.text);
        let lang = detect_language(&norm_text).to_owned();
        let hash = doc_hash(
            &norm_text,
            &request.source,
            request.url.as_deref().unwrap_or(""),
        );

        // Idempotency: resolve against the existing row, by id when the
        // caller pinned one, else by content hash.
        let existing = match &request.id {
            Some(id) => self.search.doc(id).await?,
            None => self.search.doc_by_hash(&hash).await?,
        };

        let (doc_id, version) = match (&existing, request.policy) {
            (Some(doc), IngestPolicy::SkipIfUnchanged) if doc.doc_hash == hash => {
                debug!(doc = %doc.id, "unchanged; skipping");
                return Ok(IngestOutcome {
                    doc_id: doc.id.clone(),
                    version: doc.version,
                    chunks: 0,
                    skipped: true,
                });
            }
            (Some(doc), IngestPolicy::NewVersion) => (doc.id.clone(), doc.version + 1),
            (Some(doc), _) => (doc.id.clone(), doc.version),
            (None, _) => (
                request.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
                1,
            ),
        };

        // Chunk.
        let pieces = split_text(&norm_text, &request.chunking);
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Chunk {
                id: chunk_id(&doc_id, idx),
                doc_id: doc_id.clone(),
                idx,
                text,
                lang: lang.clone(),
                tenant: request.tenant.clone(),
                version,
            })
            .collect();

        // Index.
        let doc = Doc {
            id: doc_id.clone(),
            title: request.title.clone(),
            url: request.url.clone(),
            source: request.source.clone(),
            tenant: request.tenant.clone(),
            lang: lang.clone(),
            doc_hash: hash,
            version,
            metadata: merge_type(request.metadata.clone(), "doc"),
            acl: Vec::new(),
        };
        self.search.upsert_doc(&doc).await?;
        self.search.upsert_chunks(&doc_id, &chunks).await?;

        // Embed.
        if request.embed {
            self.embed_chunks(&doc, &chunks).await?;
        }

        // Graph.
        if request.graph {
            if let Some(graph) = &self.graph {
                graph.upsert_doc(&doc_id).await?;
                for chunk in &chunks {
                    graph.upsert_chunk(&doc_id, &chunk.id).await?;
                }
                if let Some(url) = &request.url {
                    graph.add_ref(&doc_id, url).await?;
                }
            }
        }

        info!(doc = %doc_id, version, chunks = chunks.len(), "document ingested");
        Ok(IngestOutcome {
            doc_id,
            version,
            chunks: chunks.len(),
            skipped: false,
        })
    }

    async fn embed_chunks(&self, doc: &Doc, chunks: &[Chunk]) -> Result<()> {
        let (Some(vector), Some(embedder)) = (&self.vector, &self.embedder) else {
            return Ok(());
        };

        let mut first = true;
        for batch in chunks.chunks(EMBED_BATCH) {
            if !first {
                // Keep a floor between calls so the embedding endpoint is
                // not hammered by large documents.
                sleep(self.min_embed_delay).await;
            }
            first = false;

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            for (chunk, embedding) in batch.iter().zip(vectors) {
                vector
                    .upsert(
                        &chunk.id,
                        embedding,
                        json!({
                            "type": "chunk",
                            "doc_id": doc.id,
                            "tenant": doc.tenant,
                            "lang": doc.lang,
                        }),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("vector", &self.vector.is_some())
            .field("graph", &self.graph.is_some())
            .finish()
    }
}

fn merge_type(metadata: Value, kind: &str) -> Value {
    match metadata {
        Value::Object(mut map) => {
            map.insert("type".to_owned(), json!(kind));
            Value::Object(map)
        }
        Value::Null => json!({"type": kind}),
        other => json!({"type": kind, "value": other}),
    }
}
