//! Document graph: `Doc` and `Chunk` nodes, `HAS_CHUNK` and `REFERS_TO`
//! edges.
//!
//! Nodes live in an arena slice and edges reference them by integer index,
//! so expansion walks cheap adjacency lists instead of chasing pointers.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Node kinds in the document graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A document.
    Doc,
    /// A chunk of a document.
    Chunk,
    /// An external reference (URL, citation).
    ExternalRef,
}

/// Edge kinds in the document graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Document to chunk containment.
    HasChunk,
    /// Document or chunk to external reference.
    RefersTo,
}

/// Graph store consumed by retrieval expansion and ingestion.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert a document node.
    async fn upsert_doc(&self, doc_id: &str) -> Result<()>;

    /// Upsert a chunk node and its `HAS_CHUNK` edge from the document.
    async fn upsert_chunk(&self, doc_id: &str, chunk_id: &str) -> Result<()>;

    /// Add a `REFERS_TO` edge to an external reference node.
    async fn add_ref(&self, from_id: &str, ref_id: &str) -> Result<()>;

    /// `HAS_CHUNK` neighbors of a document, at most `max`, one hop.
    async fn chunk_neighbors(&self, doc_id: &str, max: usize) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct GraphInner {
    kinds: Vec<NodeKind>,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    edges: HashMap<usize, Vec<(usize, EdgeKind)>>,
}

impl GraphInner {
    fn intern(&mut self, id: &str, kind: NodeKind) -> usize {
        if let Some(existing) = self.index.get(id) {
            return *existing;
        }
        let node = self.kinds.len();
        self.kinds.push(kind);
        self.ids.push(id.to_owned());
        self.index.insert(id.to_owned(), node);
        node
    }

    fn link(&mut self, from: usize, to: usize, kind: EdgeKind) {
        let edges = self.edges.entry(from).or_default();
        if !edges.contains(&(to, kind)) {
            edges.push((to, kind));
        }
    }
}

/// In-memory graph store.
#[derive(Debug, Default)]
pub struct MemoryGraphStore {
    inner: RwLock<GraphInner>,
}

impl MemoryGraphStore {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_doc(&self, doc_id: &str) -> Result<()> {
        self.inner.write().await.intern(doc_id, NodeKind::Doc);
        Ok(())
    }

    async fn upsert_chunk(&self, doc_id: &str, chunk_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let doc = inner.intern(doc_id, NodeKind::Doc);
        let chunk = inner.intern(chunk_id, NodeKind::Chunk);
        inner.link(doc, chunk, EdgeKind::HasChunk);
        Ok(())
    }

    async fn add_ref(&self, from_id: &str, ref_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let from = inner.intern(from_id, NodeKind::Doc);
        let target = inner.intern(ref_id, NodeKind::ExternalRef);
        inner.link(from, target, EdgeKind::RefersTo);
        Ok(())
    }

    async fn chunk_neighbors(&self, doc_id: &str, max: usize) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let Some(doc) = inner.index.get(doc_id) else {
            return Ok(Vec::new());
        };
        Ok(inner
            .edges
            .get(doc)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|(_, kind)| *kind == EdgeKind::HasChunk)
                    .take(max)
                    .map(|(node, _)| inner.ids[*node].clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
