//! Retrieval orchestration: plan, parallel fetch, fuse, expand, package.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info_span, Instrument as _};

use crate::embedding::EmbeddingProvider;
use crate::error::Result;

use super::fuse::{DiversifyItem, FusedCandidate, diversify, rrf_fuse};
use super::graph::GraphStore;
use super::plan::{DEFAULT_K_RRF, QueryPlan, RetrieveOptions};
use super::rerank::Reranker;
use super::search::SearchStore;
use super::vector::VectorStore;
use super::{Filters, doc_id_of_chunk};

/// Snippet window width when no native headline exists.
const SNIPPET_WIDTH: usize = 160;

/// One packaged result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    /// Chunk id.
    pub id: String,
    /// Owning document.
    pub doc_id: String,
    /// Fused score.
    pub score: f64,
    /// Display snippet.
    pub snippet: String,
    /// Document title, when indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Document URL, when indexed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Document source.
    #[serde(default)]
    pub source: String,
    /// Scoring explanation: `fused`, `ft_rank`, `vec_rank`, `ft_rrf`,
    /// `vec_rrf`, and expansion markers.
    #[serde(default)]
    pub explanation: Map<String, Value>,
}

/// Per-source fetch statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    /// Candidates returned.
    pub count: usize,
    /// Fetch duration in milliseconds.
    pub duration_ms: u64,
}

/// The retrieval outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Packaged items, best first, at most K.
    pub items: Vec<RetrievedItem>,
    /// Full-text fetch stats.
    pub ft: SourceStats,
    /// Vector fetch stats.
    pub vec: SourceStats,
}

/// The hybrid retriever. Absent backends contribute no candidates.
#[derive(Clone, Default)]
pub struct Retriever {
    search: Option<Arc<dyn SearchStore>>,
    vector: Option<Arc<dyn VectorStore>>,
    graph: Option<Arc<dyn GraphStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl Retriever {
    /// Create a retriever with no backends; attach them with the builders.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the full-text store.
    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn SearchStore>) -> Self {
        self.search = Some(search);
        self
    }

    /// Attach the vector store and the embedder that feeds it.
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

    /// Attach the graph store used for expansion.
    #[must_use]
    pub fn with_graph(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Attach a reranker.
    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Run a retrieval.
    pub async fn retrieve(&self, query: &str, opts: &RetrieveOptions) -> Result<RetrievalResult> {
        let span = info_span!("retrieval", query.k = opts.k, query.alpha = opts.alpha);
        self.retrieve_inner(query, opts).instrument(span).await
    }

    async fn retrieve_inner(&self, query: &str, opts: &RetrieveOptions) -> Result<RetrievalResult> {
        let plan = QueryPlan::build(query, opts);
        if plan.query.is_empty() {
            return Ok(RetrievalResult::default());
        }

        // Candidate fetch: both sources run concurrently; a missing backend
        // resolves immediately with nothing.
        let (ft, vec) = tokio::join!(
            self.fetch_ft(&plan),
            self.fetch_vec(&plan, &plan.filters)
        );
        let (ft_hits, ft_stats) = ft?;
        let (vec_hits, vec_stats) = vec?;
        debug!(
            ft = ft_stats.count,
            vec = vec_stats.count,
            "candidates fetched"
        );

        let alpha = opts.alpha.clamp(0.0, 1.0);
        let fused = if opts.use_rrf {
            rrf_fuse(&ft_hits, &vec_hits, alpha, DEFAULT_K_RRF)
        } else {
            // Without fusion the lexical ranking wins and vector-only
            // candidates append after it.
            let mut ids = ft_hits.clone();
            for id in &vec_hits {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            ids.iter()
                .enumerate()
                .map(|(rank0, id)| FusedCandidate {
                    id: id.clone(),
                    score: 1.0 / (rank0 + 1) as f64,
                    ft_rank: ft_hits.iter().position(|f| f == id).map(|r| r + 1),
                    vec_rank: vec_hits.iter().position(|v| v == id).map(|r| r + 1),
                })
                .collect()
        };

        let mut items = self.package(&plan.query, fused, alpha).await?;

        if opts.diversify {
            items = self.apply_diversify(items, opts);
        }

        if let Some(expand) = opts.graph_expand {
            items = self.graph_expand(items, expand).await?;
        }

        if opts.rerank {
            if let Some(reranker) = &self.reranker {
                items = reranker.rerank(&plan.query, items).await?;
            }
        }

        items.truncate(opts.k.max(1));
        Ok(RetrievalResult {
            items,
            ft: ft_stats,
            vec: vec_stats,
        })
    }

    async fn fetch_ft(&self, plan: &QueryPlan) -> Result<(Vec<String>, SourceStats)> {
        let Some(search) = &self.search else {
            return Ok((Vec::new(), SourceStats::default()));
        };
        if plan.ft_k == 0 {
            return Ok((Vec::new(), SourceStats::default()));
        }
        let started = Instant::now();
        let hits = search
            .search_chunks(&plan.query, plan.ft_k, &plan.filters)
            .await?;
        let stats = SourceStats {
            count: hits.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        Ok((hits.into_iter().map(|h| h.id).collect(), stats))
    }

    async fn fetch_vec(
        &self,
        plan: &QueryPlan,
        filters: &Filters,
    ) -> Result<(Vec<String>, SourceStats)> {
        let (Some(vector), Some(embedder)) = (&self.vector, &self.embedder) else {
            return Ok((Vec::new(), SourceStats::default()));
        };
        if plan.vec_k == 0 {
            return Ok((Vec::new(), SourceStats::default()));
        }
        let started = Instant::now();
        let embeddings = embedder.embed(&[plan.query.clone()]).await?;
        let Some(query_vector) = embeddings.first() else {
            return Ok((Vec::new(), SourceStats::default()));
        };
        let hits = vector.query(query_vector, plan.vec_k, filters).await?;
        let stats = SourceStats {
            count: hits.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        Ok((hits.into_iter().map(|h| h.id).collect(), stats))
    }

    /// Attach snippets, document metadata, and explanations.
    async fn package(
        &self,
        query: &str,
        fused: Vec<FusedCandidate>,
        alpha: f64,
    ) -> Result<Vec<RetrievedItem>> {
        let mut items = Vec::with_capacity(fused.len());
        for candidate in fused {
            let (snippet, doc_id) = self.snippet_for(query, &candidate.id).await?;
            let doc_id =
                doc_id.unwrap_or_else(|| doc_id_of_chunk(&candidate.id).unwrap_or("").to_owned());

            let (title, url, source) = match &self.search {
                Some(search) => match search.doc(&doc_id).await? {
                    Some(doc) => (doc.title, doc.url, doc.source),
                    None => (None, None, String::new()),
                },
                None => (None, None, String::new()),
            };

            let mut explanation = Map::new();
            explanation.insert("fused".into(), json!(candidate.score));
            if let Some(rank) = candidate.ft_rank {
                explanation.insert("ft_rank".into(), json!(rank));
                explanation.insert("ft_rrf".into(), json!(candidate.ft_rrf(alpha, DEFAULT_K_RRF)));
            }
            if let Some(rank) = candidate.vec_rank {
                explanation.insert("vec_rank".into(), json!(rank));
                explanation
                    .insert("vec_rrf".into(), json!(candidate.vec_rrf(alpha, DEFAULT_K_RRF)));
            }

            items.push(RetrievedItem {
                id: candidate.id,
                doc_id,
                score: candidate.score,
                snippet,
                title,
                url,
                source,
                explanation,
            });
        }
        Ok(items)
    }

    /// Prefer the backend's native headline; else a bounded window around
    /// the first matching term, else the text prefix.
    async fn snippet_for(&self, query: &str, chunk_id: &str) -> Result<(String, Option<String>)> {
        let Some(search) = &self.search else {
            return Ok((String::new(), None));
        };
        let Some(chunk) = search.chunk(chunk_id).await? else {
            return Ok((String::new(), None));
        };
        Ok((make_snippet(query, &chunk.text), Some(chunk.doc_id)))
    }

    fn apply_diversify(&self, items: Vec<RetrievedItem>, opts: &RetrieveOptions) -> Vec<RetrievedItem> {
        let candidates: Vec<DiversifyItem> = items
            .iter()
            .map(|item| DiversifyItem {
                id: item.id.clone(),
                score: item.score,
                doc_id: item.doc_id.clone(),
                source: item.source.clone(),
            })
            .collect();
        let picked = diversify(&candidates, opts.lambda_doc, opts.lambda_src, items.len());
        picked
            .into_iter()
            .filter_map(|p| items.iter().find(|item| item.id == p.id).cloned())
            .collect()
    }

    /// Append unseen `HAS_CHUNK` neighbors of the top seeds.
    async fn graph_expand(
        &self,
        mut items: Vec<RetrievedItem>,
        expand: super::plan::GraphExpand,
    ) -> Result<Vec<RetrievedItem>> {
        let Some(graph) = &self.graph else {
            return Ok(items);
        };

        let seeds: Vec<(String, f64)> = items
            .iter()
            .take(expand.top_n)
            .map(|item| (item.doc_id.clone(), item.score))
            .collect();

        for (doc_id, seed_score) in seeds {
            let neighbors = graph.chunk_neighbors(&doc_id, expand.max_per_seed).await?;
            for neighbor in neighbors {
                if items.iter().any(|item| item.id == neighbor) {
                    continue;
                }
                let (snippet, _) = self.snippet_for("", &neighbor).await?;
                let mut explanation = Map::new();
                explanation.insert("fused".into(), json!(seed_score + expand.boost));
                explanation.insert("graph_expanded".into(), json!(true));
                explanation.insert("seed_doc".into(), json!(doc_id.clone()));
                items.push(RetrievedItem {
                    id: neighbor.clone(),
                    doc_id: doc_id.clone(),
                    score: seed_score + expand.boost,
                    snippet,
                    title: None,
                    url: None,
                    source: String::new(),
                    explanation,
                });
            }
        }
        Ok(items)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("search", &self.search.is_some())
            .field("vector", &self.vector.is_some())
            .field("graph", &self.graph.is_some())
            .field("reranker", &self.reranker.is_some())
            .finish()
    }
}

/// A bounded window around the first matching term, else the prefix.
#[must_use]
pub fn make_snippet(query: &str, text: &str) -> String {
    if text.len() <= SNIPPET_WIDTH {
        return text.to_owned();
    }

    let lowered = text.to_lowercase();
    let position = query
        .to_lowercase()
        .split_whitespace()
        .filter_map(|term| lowered.find(term))
        .min();

    let center = position.unwrap_or(0);
    let start = center.saturating_sub(SNIPPET_WIDTH / 2);
    let mut start = start;
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start + SNIPPET_WIDTH).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].to_owned()
}
