//! Parallel meta-tool: fan-out dispatch of multiple tool calls.
//!
//! Accepts a batch of `{recipient_name: "functions.<tool>", parameters}`
//! descriptors as a JSON array, a stream of concatenated objects, or a
//! `{tool_uses: […]}` wrapper, and dispatches each sub-call through the same
//! registry under a bounded semaphore. Results preserve input order and a
//! failing sub-call never aborts the fan-out.
//!
//! The meta-tool holds an explicit reference to the registry it was
//! constructed with; registering it into that same registry is how the cycle
//! is closed without globals.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{Error, Result};

use super::registry::{Dispatch, ToolRegistry};
use super::{Tool, ToolContext};

/// Default bound on concurrent sub-calls.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// One parsed sub-call.
#[derive(Debug, Clone, PartialEq)]
struct SubCall {
    name: String,
    params: Value,
}

/// The `parallel` meta-tool.
pub struct ParallelTool {
    registry: Arc<ToolRegistry>,
    max_parallel: usize,
}

impl ParallelTool {
    /// Create the meta-tool over the registry it will dispatch into.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Override the concurrency bound (`1` serializes sub-calls).
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Normalize the accepted input shapes into an ordered call list.
    fn parse_batch(args: &Value) -> Result<Vec<SubCall>> {
        let items: Vec<Value> = match args {
            Value::Array(items) => items.clone(),
            Value::Object(map) => {
                if let Some(Value::Array(items)) = map.get("tool_uses") {
                    items.clone()
                } else {
                    // A single descriptor is a batch of one.
                    vec![args.clone()]
                }
            }
            Value::String(raw) => {
                // A stream of concatenated JSON objects.
                let mut items = Vec::new();
                for parsed in serde_json::Deserializer::from_str(raw).into_iter::<Value>() {
                    items.push(parsed.map_err(|e| {
                        Error::invalid(format!("malformed batch element: {e}"))
                    })?);
                }
                items
            }
            other => {
                return Err(Error::invalid(format!(
                    "unsupported batch shape: {other}"
                )));
            }
        };

        if items.is_empty() {
            return Err(Error::invalid("empty tool batch"));
        }
        items.iter().map(Self::parse_descriptor).collect()
    }

    /// Normalize one descriptor, inferring `run_cli` for `{command, args}`
    /// shapes.
    fn parse_descriptor(item: &Value) -> Result<SubCall> {
        let Value::Object(map) = item else {
            return Err(Error::invalid(format!(
                "batch element must be an object, got {item}"
            )));
        };

        if let Some(recipient) = map.get("recipient_name").and_then(Value::as_str) {
            let name = recipient
                .strip_prefix("functions.")
                .unwrap_or(recipient)
                .to_owned();
            let params = map.get("parameters").cloned().unwrap_or_else(|| json!({}));
            return Ok(SubCall { name, params });
        }

        if let Some(name) = map.get("name").and_then(Value::as_str) {
            let params = map
                .get("parameters")
                .or_else(|| map.get("arguments"))
                .cloned()
                .unwrap_or_else(|| json!({}));
            return Ok(SubCall {
                name: name.to_owned(),
                params,
            });
        }

        if map.contains_key("command") {
            return Ok(SubCall {
                name: "run_cli".to_owned(),
                params: item.clone(),
            });
        }

        Err(Error::invalid(format!(
            "batch element has no recipient: {item}"
        )))
    }

    /// True when a successful payload carries an embedded failure.
    fn embedded_error(payload: &Value) -> Option<String> {
        if let Some(ok) = payload.get("ok").and_then(Value::as_bool) {
            if !ok {
                let msg = payload
                    .get("error")
                    .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_owned))
                    .unwrap_or_else(|| "tool reported failure".to_owned());
                return Some(msg);
            }
            return None;
        }
        payload
            .get("error")
            .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_owned))
    }
}

#[async_trait]
impl Tool for ParallelTool {
    fn name(&self) -> &str {
        "parallel"
    }

    fn description(&self) -> &str {
        "Dispatch multiple tool calls concurrently; results preserve input order"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tool_uses": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "recipient_name": {
                                "type": "string",
                                "description": "Target tool as functions.<name>"
                            },
                            "parameters": {"type": "object"}
                        },
                        "required": ["recipient_name"]
                    }
                }
            },
            "required": ["tool_uses"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let batch = Self::parse_batch(&args)?;
        debug!(calls = batch.len(), max_parallel = self.max_parallel, "parallel fan-out");

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let futures: Vec<_> = batch
            .into_iter()
            .map(|call| {
                let semaphore = Arc::clone(&semaphore);
                let registry = Arc::clone(&self.registry);
                let ctx = ctx.clone();
                async move {
                    // Closed only when the semaphore is dropped, which cannot
                    // happen while this future holds a clone.
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    registry.dispatch(&ctx, &call.name, call.params).await
                }
            })
            .collect();

        let outcomes = join_all(futures).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut first_failure: Option<String> = None;
        for outcome in outcomes {
            match outcome {
                Ok(payload) => {
                    if let Some(message) = Self::embedded_error(&payload) {
                        if first_failure.is_none() {
                            first_failure = Some(message.clone());
                        }
                        results.push(json!({"ok": false, "error": message, "value": payload}));
                    } else {
                        results.push(json!({"ok": true, "value": payload}));
                    }
                }
                Err(err) => {
                    let message = err.to_string();
                    if first_failure.is_none() {
                        first_failure = Some(message.clone());
                    }
                    results.push(json!({"ok": false, "error": message}));
                }
            }
        }

        let mut aggregate = json!({
            "ok": first_failure.is_none(),
            "results": results,
        });
        if let Some(summary) = first_failure {
            aggregate["error"] = Value::String(summary);
        }
        Ok(aggregate)
    }
}
