//! The hybrid retrieval tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::retrieval::{RetrieveOptions, Retriever};
use crate::tool::{Tool, ToolContext};

/// Arguments of the `hybrid_retrieval` tool.
#[derive(Deserialize, schemars::JsonSchema)]
struct RetrieveArgs {
    /// The search query.
    query: String,
    /// Result count.
    #[serde(default)]
    k: Option<usize>,
    /// Lexical weight in `[0, 1]`.
    #[serde(default)]
    alpha: Option<f64>,
    /// Tenant filter.
    #[serde(default)]
    tenant: Option<String>,
    /// Apply greedy diversification.
    #[serde(default)]
    diversify: Option<bool>,
}

/// Exposes the retrieval core to the agent loop.
#[derive(Debug, Clone)]
pub struct HybridRetrievalTool {
    retriever: Arc<Retriever>,
}

impl HybridRetrievalTool {
    /// Wrap a retriever.
    #[must_use]
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for HybridRetrievalTool {
    fn name(&self) -> &str {
        "hybrid_retrieval"
    }

    fn description(&self) -> &str {
        "Search indexed documents with fused full-text and semantic retrieval"
    }

    fn schema(&self) -> Value {
        crate::chat::generate_json_schema::<RetrieveArgs>().1
    }

    async fn call(&self, _ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: RetrieveArgs = serde_json::from_value(args)?;
        if args.query.trim().is_empty() {
            return Err(Error::invalid("empty query"));
        }

        let mut opts = RetrieveOptions::default();
        if let Some(k) = args.k {
            opts.k = k.clamp(1, 50);
        }
        if let Some(alpha) = args.alpha {
            opts.alpha = alpha.clamp(0.0, 1.0);
        }
        opts.tenant = args.tenant;
        opts.diversify = args.diversify.unwrap_or(false);

        let result = self.retriever.retrieve(&args.query, &opts).await?;
        let items: Vec<Value> = result
            .items
            .iter()
            .map(|item| {
                json!({
                    "id": item.id,
                    "doc_id": item.doc_id,
                    "score": item.score,
                    "snippet": item.snippet,
                    "title": item.title,
                    "url": item.url,
                    "source": item.source,
                    "explanation": item.explanation,
                })
            })
            .collect();

        Ok(json!({
            "ok": true,
            "items": items,
            "stats": {
                "ft": {"count": result.ft.count, "duration_ms": result.ft.duration_ms},
                "vec": {"count": result.vec.count, "duration_ms": result.vec.duration_ms},
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let tool = HybridRetrievalTool::new(Arc::new(Retriever::new()));
        let err = tool
            .call(&ToolContext::new(), json!({"query": ""}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn empty_backends_return_empty_items() {
        let tool = HybridRetrievalTool::new(Arc::new(Retriever::new()));
        let payload = tool
            .call(&ToolContext::new(), json!({"query": "anything", "k": 3}))
            .await
            .unwrap();
        assert_eq!(payload["ok"], true);
        assert!(payload["items"].as_array().unwrap().is_empty());
    }
}
