//! Result reranking.
//!
//! A reranker may reorder the packaged items but must neither drop items
//! nor mutate their metadata. The lexical reranker is deterministic and
//! dependency-free, suitable for tests and as a baseline.

use async_trait::async_trait;

use crate::error::Result;

use super::retriever::RetrievedItem;

/// Reorders retrieved items.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Return the same items, possibly reordered.
    async fn rerank(&self, query: &str, items: Vec<RetrievedItem>) -> Result<Vec<RetrievedItem>>;
}

/// Orders by query-term overlap with the snippet, stable on ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    fn overlap(query_terms: &[String], text: &str) -> usize {
        let lowered = text.to_lowercase();
        query_terms
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .count()
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn rerank(&self, query: &str, items: Vec<RetrievedItem>) -> Result<Vec<RetrievedItem>> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        let mut scored: Vec<(usize, RetrievedItem)> = items
            .into_iter()
            .map(|item| (Self::overlap(&terms, &item.snippet), item))
            .collect();
        // Stable sort keeps the fused order on ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().map(|(_, item)| item).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, snippet: &str) -> RetrievedItem {
        RetrievedItem {
            id: id.to_owned(),
            doc_id: "d".to_owned(),
            score: 0.5,
            snippet: snippet.to_owned(),
            title: None,
            url: None,
            source: String::new(),
            explanation: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn reorders_by_overlap_without_dropping() {
        let items = vec![
            item("a", "nothing relevant"),
            item("b", "kubernetes ingress controller"),
        ];
        let reranked = LexicalReranker
            .rerank("kubernetes ingress", items)
            .await
            .unwrap();
        assert_eq!(reranked.len(), 2);
        assert_eq!(reranked[0].id, "b");
        assert_eq!(reranked[1].id, "a");
    }

    #[tokio::test]
    async fn stable_on_ties() {
        let items = vec![item("first", "same text"), item("second", "same text")];
        let reranked = LexicalReranker.rerank("unrelated", items).await.unwrap();
        assert_eq!(reranked[0].id, "first");
        assert_eq!(reranked[1].id, "second");
    }
}
