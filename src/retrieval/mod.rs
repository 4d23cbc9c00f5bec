//! Hybrid retrieval: query planning, parallel candidate fetch, fusion.
//!
//! A retrieval runs full-text and vector search concurrently, fuses the two
//! rankings with reciprocal rank fusion, optionally diversifies and expands
//! through the document graph, and packages the top K with snippets and
//! per-item scoring explanations.

pub mod fuse;
pub mod graph;
pub mod plan;
pub mod rerank;
pub mod retriever;
pub mod search;
pub mod vector;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use fuse::{FusedCandidate, diversify, rrf_fuse};
pub use graph::{GraphStore, MemoryGraphStore};
pub use plan::{QueryPlan, RetrieveOptions};
pub use rerank::{LexicalReranker, Reranker};
pub use retriever::{RetrievalResult, RetrievedItem, Retriever, SourceStats};
pub use search::{MemorySearchStore, SearchHit, SearchStore, SqliteSearchStore};
pub use vector::{MemoryVectorStore, SqliteVectorStore, VectorHit, VectorStore};

/// An indexed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    /// Document id.
    pub id: String,
    /// Title, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Source URL, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Origin system (upload, crawl, ...).
    #[serde(default)]
    pub source: String,
    /// Tenant for multi-tenant filtering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Detected language.
    #[serde(default)]
    pub lang: String,
    /// Deterministic content hash (64-char hex).
    #[serde(default)]
    pub doc_hash: String,
    /// Ingestion version.
    #[serde(default)]
    pub version: i64,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Value,
    /// Access control labels.
    #[serde(default)]
    pub acl: Vec<String>,
}

/// A bounded substring of a document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id `chunk:<doc_id>:<idx>`.
    pub id: String,
    /// Owning document.
    pub doc_id: String,
    /// Position within the document.
    pub idx: usize,
    /// Chunk text.
    pub text: String,
    /// Language inherited from the document.
    #[serde(default)]
    pub lang: String,
    /// Tenant inherited from the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Version inherited from the document.
    #[serde(default)]
    pub version: i64,
}

/// The stable chunk id scheme; ids do not change under repeat ingestion.
#[must_use]
pub fn chunk_id(doc_id: &str, idx: usize) -> String {
    format!("chunk:{doc_id}:{idx}")
}

/// The document id a chunk id derives from, when well-formed.
#[must_use]
pub fn doc_id_of_chunk(chunk_id: &str) -> Option<&str> {
    let rest = chunk_id.strip_prefix("chunk:")?;
    let idx_sep = rest.rfind(':')?;
    Some(&rest[..idx_sep])
}

/// Candidate filters applied by both search backends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// Tenant constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Language constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Additional exact-match metadata constraints.
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Filters {
    /// True when a chunk satisfies the tenant and language constraints.
    #[must_use]
    pub fn matches_chunk(&self, chunk: &Chunk) -> bool {
        if let Some(tenant) = &self.tenant {
            if chunk.tenant.as_deref() != Some(tenant.as_str()) {
                return false;
            }
        }
        if let Some(lang) = &self.lang {
            if !chunk.lang.is_empty() && chunk.lang != *lang {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_round_trip() {
        let id = chunk_id("doc-1", 3);
        assert_eq!(id, "chunk:doc-1:3");
        assert_eq!(doc_id_of_chunk(&id), Some("doc-1"));
        assert_eq!(doc_id_of_chunk("not-a-chunk"), None);
        // Doc ids containing colons still resolve.
        assert_eq!(doc_id_of_chunk("chunk:ns:doc:7"), Some("ns:doc"));
    }

    #[test]
    fn filters_match_tenant_and_lang() {
        let chunk = Chunk {
            id: chunk_id("d", 0),
            doc_id: "d".into(),
            idx: 0,
            text: "hello".into(),
            lang: "english".into(),
            tenant: Some("acme".into()),
            version: 1,
        };

        let mut filters = Filters::default();
        assert!(filters.matches_chunk(&chunk));

        filters.tenant = Some("acme".into());
        filters.lang = Some("english".into());
        assert!(filters.matches_chunk(&chunk));

        filters.tenant = Some("globex".into());
        assert!(!filters.matches_chunk(&chunk));
    }
}
