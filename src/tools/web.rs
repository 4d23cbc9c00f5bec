//! Web tools: page fetch and SearXNG-backed search.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::tool::{Tool, ToolContext};

/// Cap on fetched body size.
const FETCH_CAP: usize = 512 * 1024;

/// Default search result count.
const DEFAULT_RESULTS: usize = 5;

#[derive(Deserialize)]
struct FetchArgs {
    url: String,
}

/// Fetch a web page as text.
#[derive(Debug, Clone)]
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl WebFetchTool {
    /// Create the tool with a fresh HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch an http(s) URL and return its body as text"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "Absolute http(s) URL"}
            },
            "required": ["url"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: FetchArgs = serde_json::from_value(args)?;
        if !args.url.starts_with("http://") && !args.url.starts_with("https://") {
            return Err(Error::invalid(format!(
                "only http(s) URLs are fetchable, got {:?}",
                args.url
            )));
        }

        let response = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            result = self.client.get(&args.url).send() => result?,
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        let bytes = response.bytes().await?;
        let truncated = bytes.len() > FETCH_CAP;
        let slice = if truncated { &bytes[..FETCH_CAP] } else { &bytes[..] };

        Ok(json!({
            "ok": (200..300).contains(&status),
            "status": status,
            "content_type": content_type,
            "body": String::from_utf8_lossy(slice),
            "truncated": truncated,
        }))
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Web search against a SearXNG instance; registered only when one is
/// configured.
#[derive(Debug, Clone)]
pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
}

impl WebSearchTool {
    /// Create the tool against a SearXNG base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, URLs, and summaries"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "k": {"type": "integer", "description": "Result count"}
            },
            "required": ["query"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: SearchArgs = serde_json::from_value(args)?;
        if args.query.trim().is_empty() {
            return Err(Error::invalid("empty query"));
        }

        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let response = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            result = self
                .client
                .get(&url)
                .query(&[("q", args.query.as_str()), ("format", "json")])
                .send() => result?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(Error::backend(format!("search returned {status}")));
        }

        let parsed: SearxResponse = response.json().await?;
        let k = args.k.unwrap_or(DEFAULT_RESULTS).max(1);
        let results: Vec<Value> = parsed
            .results
            .into_iter()
            .take(k)
            .map(|r| json!({"title": r.title, "url": r.url, "summary": r.content}))
            .collect();

        Ok(json!({"ok": true, "results": results}))
    }
}
