//! LLM-driven single-file code evolution.
//!
//! Reads a sandboxed file, asks the provider for an improved revision
//! toward a stated goal, and writes the candidate back. Iterations feed the
//! previous candidate forward so each pass refines the last.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::chat::{ChatProvider, ChatRequest};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::tool::{Tool, ToolContext};

/// Cap on evolution rounds per call.
const MAX_ITERATIONS: usize = 4;

#[derive(Deserialize)]
struct EvolveArgs {
    path: String,
    goal: String,
    #[serde(default)]
    iterations: Option<usize>,
}

/// The `evolve_code` tool.
pub struct EvolveCodeTool {
    provider: Arc<dyn ChatProvider>,
    model: String,
}

impl EvolveCodeTool {
    /// Create the tool over a provider and model.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Strip a markdown code fence when the model wrapped its answer.
    fn extract_code(response: &str) -> &str {
        let trimmed = response.trim();
        let Some(after_open) = trimmed.strip_prefix("```") else {
            return trimmed;
        };
        let body = after_open
            .split_once('\n')
            .map_or(after_open, |(_, rest)| rest);
        body.rsplit_once("```").map_or(body, |(code, _)| code).trim()
    }
}

impl std::fmt::Debug for EvolveCodeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvolveCodeTool").field("model", &self.model).finish()
    }
}

#[async_trait]
impl Tool for EvolveCodeTool {
    fn name(&self) -> &str {
        "evolve_code"
    }

    fn description(&self) -> &str {
        "Iteratively rewrite a workspace file toward a stated goal"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File relative to the project root"},
                "goal": {"type": "string", "description": "What the revision should achieve"},
                "iterations": {"type": "integer", "description": "Refinement rounds (1-4)"}
            },
            "required": ["path", "goal"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: EvolveArgs = serde_json::from_value(args)?;
        if args.goal.trim().is_empty() {
            return Err(Error::invalid("empty goal"));
        }
        let path = ctx.sandbox()?.resolve(&args.path)?;
        let original = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::invalid(format!("read {:?}: {e}", args.path)))?;

        let iterations = args.iterations.unwrap_or(1).clamp(1, MAX_ITERATIONS);
        let model = ctx
            .model_override
            .clone()
            .unwrap_or_else(|| self.model.clone());

        let mut current = original.clone();
        for round in 0..iterations {
            ctx.cancel.check()?;
            let prompt = format!(
                "Improve the following file toward this goal: {goal}\n\
                 Respond with the complete revised file only.\n\n{code}",
                goal = args.goal,
                code = current,
            );
            let request = ChatRequest::with_messages(
                &model,
                vec![
                    Message::system(
                        "You are a careful software engineer. Output only the revised file.",
                    ),
                    Message::user(prompt),
                ],
            );
            let response = self.provider.chat(&request).await?;
            let candidate = Self::extract_code(&response.message.content).to_owned();
            if candidate.is_empty() {
                return Err(Error::tool_failed(
                    self.name(),
                    format!("model produced an empty revision on round {}", round + 1),
                ));
            }
            debug!(round, bytes = candidate.len(), "evolution round complete");
            current = candidate;
        }

        tokio::fs::write(&path, current.as_bytes())
            .await
            .map_err(|e| Error::backend(format!("write {:?}: {e}", args.path)))?;

        Ok(json!({
            "ok": true,
            "path": args.path,
            "iterations": iterations,
            "bytes_before": original.len(),
            "bytes_after": current.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatResponse;
    use crate::providers::MockProvider;
    use crate::sandbox::Sandbox;

    fn ctx() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ToolContext::new();
        ctx.sandbox = Some(Sandbox::new(dir.path()).unwrap());
        (dir, ctx)
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(
            EvolveCodeTool::extract_code("```rust\nfn main() {}\n```"),
            "fn main() {}"
        );
        assert_eq!(EvolveCodeTool::extract_code("plain body"), "plain body");
    }

    #[tokio::test]
    async fn evolves_a_file_in_place() {
        let (_dir, ctx) = ctx();
        std::fs::write(ctx.sandbox.as_ref().unwrap().base().join("main.rs"), "old code").unwrap();

        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text(
            "```rust\nnew code\n```",
        )]));
        let tool = EvolveCodeTool::new(provider, "m");

        let payload = tool
            .call(&ctx, json!({"path": "main.rs", "goal": "modernize"}))
            .await
            .unwrap();
        assert_eq!(payload["ok"], true);
        assert_eq!(payload["iterations"], 1);

        let evolved =
            std::fs::read_to_string(ctx.sandbox.as_ref().unwrap().base().join("main.rs")).unwrap();
        assert_eq!(evolved, "new code");
    }

    #[tokio::test]
    async fn multiple_rounds_feed_forward() {
        let (_dir, ctx) = ctx();
        std::fs::write(ctx.sandbox.as_ref().unwrap().base().join("f.py"), "v0").unwrap();

        let provider = Arc::new(MockProvider::new(vec![
            ChatResponse::from_text("v1"),
            ChatResponse::from_text("v2"),
        ]));
        let tool = EvolveCodeTool::new(Arc::clone(&provider) as Arc<dyn ChatProvider>, "m");

        tool.call(&ctx, json!({"path": "f.py", "goal": "refine", "iterations": 2}))
            .await
            .unwrap();

        // Round two saw round one's candidate.
        let second_request = provider.requests()[1].clone();
        assert!(second_request.messages[1].content.contains("v1"));
        let result =
            std::fs::read_to_string(ctx.sandbox.as_ref().unwrap().base().join("f.py")).unwrap();
        assert_eq!(result, "v2");
    }
}
