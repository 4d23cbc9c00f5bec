//! Delegation tools: `ask_agent` and `delegate_to_team`.
//!
//! Both inherit scope from the request context: session and project ids
//! fall back to the outer request's values, the auth cookie is forwarded
//! verbatim on the context, and the call scope advances one level inside
//! the delegator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::delegate::{DelegateRequest, Delegator};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::tool::{Tool, ToolContext};

#[derive(Deserialize)]
struct AskArgs {
    prompt: String,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    history: Option<Vec<Message>>,
    #[serde(default)]
    max_steps: Option<usize>,
}

/// Synchronously ask another agent.
pub struct AskAgentTool {
    delegator: Arc<Delegator>,
    default_agent: String,
}

impl AskAgentTool {
    /// Create the tool; `default_agent` answers when `to` is omitted.
    #[must_use]
    pub fn new(delegator: Arc<Delegator>, default_agent: impl Into<String>) -> Self {
        Self {
            delegator,
            default_agent: default_agent.into(),
        }
    }
}

impl std::fmt::Debug for AskAgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AskAgentTool")
            .field("default_agent", &self.default_agent)
            .finish()
    }
}

#[async_trait]
impl Tool for AskAgentTool {
    fn name(&self) -> &str {
        "ask_agent"
    }

    fn description(&self) -> &str {
        "Ask a named specialist agent and return its answer"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string"},
                "to": {"type": "string", "description": "Specialist name"},
                "session_id": {"type": "string"},
                "project_id": {"type": "string"},
                "max_steps": {"type": "integer"}
            },
            "required": ["prompt"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: AskArgs = serde_json::from_value(args)?;
        if args.prompt.trim().is_empty() {
            return Err(Error::invalid("empty prompt"));
        }

        let agent_name = args
            .to
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.default_agent.clone());

        let result = self
            .delegator
            .delegate(
                ctx,
                DelegateRequest {
                    agent_name: agent_name.clone(),
                    prompt: args.prompt,
                    history: args.history.unwrap_or_default(),
                    max_steps: args.max_steps.unwrap_or(0),
                    project_id: args.project_id,
                    session_id: args.session_id,
                    ..DelegateRequest::default()
                },
            )
            .await
            .map_err(|e| match e {
                Error::Cancelled | Error::Timeout(_) => e,
                other => Error::tool_failed("ask_agent", format!("{agent_name}: {other}")),
            })?;

        Ok(json!({"ok": true, "agent": agent_name, "result": result}))
    }
}

#[derive(Deserialize)]
struct TeamArgs {
    team: String,
    prompt: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Dispatch a prompt to a team's orchestrator.
pub struct DelegateToTeamTool {
    delegator: Arc<Delegator>,
}

impl DelegateToTeamTool {
    /// Create the tool.
    #[must_use]
    pub fn new(delegator: Arc<Delegator>) -> Self {
        Self { delegator }
    }
}

impl std::fmt::Debug for DelegateToTeamTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegateToTeamTool").finish()
    }
}

#[async_trait]
impl Tool for DelegateToTeamTool {
    fn name(&self) -> &str {
        "delegate_to_team"
    }

    fn description(&self) -> &str {
        "Hand a task to a specialist team; long-running unless a timeout is given"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "team": {"type": "string", "description": "Team name"},
                "prompt": {"type": "string"},
                "timeout_ms": {"type": "integer", "description": "Optional wall-clock bound"}
            },
            "required": ["team", "prompt"]
        })
    }

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let args: TeamArgs = serde_json::from_value(args)?;
        if args.prompt.trim().is_empty() {
            return Err(Error::invalid("empty prompt"));
        }

        let timeout = args.timeout_ms.map(Duration::from_millis);
        let result = self
            .delegator
            .delegate_to_team(ctx, &args.team, &args.prompt, timeout)
            .await
            .map_err(|e| match e {
                Error::Cancelled | Error::Timeout(_) => e,
                other => Error::tool_failed("delegate_to_team", format!("{}: {other}", args.team)),
            })?;

        Ok(json!({"ok": true, "team": args.team, "result": result}))
    }
}
