//! Agent-to-agent delegation.
//!
//! A delegation resolves a specialist's provider, tool view, and system
//! prompt, then spins a fresh [`Engine`] whose tracer tags every event with
//! the call scope `{call_id, parent_call_id, depth}`. The scope travels in
//! an explicit struct on the request context; depth is capped so cyclic
//! agent graphs (A asks B asks A) terminate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::{AgentTracer, Engine};
use crate::chat::ChatProvider;
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::providers::OpenAiProvider;
use crate::specialist::Specialist;
use crate::store::specialists::{SpecialistsStore, TeamsStore};
use crate::stream::AgentEvent;
use crate::tool::{ToolContext, ToolRegistry};

/// Hard cap on delegation depth.
pub const MAX_DEPTH: usize = 8;

/// Namespace for deterministic session id derivation. Repeated string ids
/// anchor to the same transcript.
const SESSION_NAMESPACE: Uuid = Uuid::from_u128(0x8f1d_bc1a_6f40_4c92_9e2b_77d1_53ab_1e07);

/// Memory guidance prepended to every delegated system prompt.
const MEMORY_INSTRUCTIONS: &str = "You may receive prior conversation context. \
Treat earlier turns as background; answer only the current request.";

/// Identity of one call in a delegation tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallScope {
    /// This call's id.
    pub call_id: String,
    /// The parent call's id, absent at the root.
    pub parent_call_id: Option<String>,
    /// Distance from the root request.
    pub depth: usize,
}

impl Default for CallScope {
    fn default() -> Self {
        Self::root()
    }
}

impl CallScope {
    /// A fresh root scope.
    #[must_use]
    pub fn root() -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            parent_call_id: None,
            depth: 0,
        }
    }

    /// The scope of a delegated child call.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            parent_call_id: Some(self.call_id.clone()),
            depth: self.depth + 1,
        }
    }

    /// Reject scopes beyond the recursion cap.
    pub fn check_depth(&self) -> Result<()> {
        if self.depth > MAX_DEPTH {
            return Err(Error::invalid(format!(
                "delegation depth {} exceeds the cap of {MAX_DEPTH}",
                self.depth
            )));
        }
        Ok(())
    }
}

/// Map any session id onto a UUID string.
///
/// Valid UUIDs pass through; other strings map deterministically under a
/// fixed UUIDv5 namespace.
#[must_use]
pub fn session_uuid(raw: &str) -> String {
    match Uuid::parse_str(raw) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => Uuid::new_v5(&SESSION_NAMESPACE, raw.as_bytes()).to_string(),
    }
}

/// Observes delegated-run events, each tagged with its scope.
pub trait DelegateObserver: Send + Sync {
    /// One event from one delegated run.
    fn on_event(&self, scope: &CallScope, event: &AgentEvent);
}

/// Observer that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelegateObserver;

impl DelegateObserver for NoopDelegateObserver {
    fn on_event(&self, _scope: &CallScope, _event: &AgentEvent) {}
}

/// Tracer adapter forwarding engine hooks as scoped events.
struct ScopedTracer {
    scope: CallScope,
    observer: Arc<dyn DelegateObserver>,
}

impl AgentTracer for ScopedTracer {
    fn on_assistant(&self, message: &Message) {
        self.observer.on_event(
            &self.scope,
            &AgentEvent::Assistant {
                content: message.content.clone(),
                tool_calls: message.tool_calls().len(),
            },
        );
    }

    fn on_delta(&self, delta: &str) {
        self.observer.on_event(
            &self.scope,
            &AgentEvent::Delta {
                text: delta.to_owned(),
            },
        );
    }

    fn on_tool_start(&self, call: &ToolCall) {
        self.observer.on_event(
            &self.scope,
            &AgentEvent::ToolStart {
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.arguments.clone(),
            },
        );
    }

    fn on_tool_result(&self, call: &ToolCall, payload: &Value) {
        self.observer.on_event(
            &self.scope,
            &AgentEvent::ToolResult {
                id: call.id.clone(),
                name: call.name.clone(),
                payload: payload.clone(),
            },
        );
    }

    fn on_final(&self, text: &str) {
        self.observer.on_event(
            &self.scope,
            &AgentEvent::Final {
                text: text.to_owned(),
            },
        );
    }

    fn on_error(&self, error: &Error) {
        self.observer.on_event(
            &self.scope,
            &AgentEvent::Error {
                kind: error.kind().to_owned(),
                message: error.to_string(),
            },
        );
    }
}

/// One delegation request.
#[derive(Debug, Clone, Default)]
pub struct DelegateRequest {
    /// Target specialist name.
    pub agent_name: String,
    /// Prompt for the delegated run.
    pub prompt: String,
    /// Prior history replayed into the run.
    pub history: Vec<Message>,
    /// Override the specialist's tool enablement.
    pub enable_tools: Option<bool>,
    /// Step budget; 0 selects the engine default.
    pub max_steps: usize,
    /// Wall-clock bound for the whole delegated run.
    pub timeout: Option<Duration>,
    /// Project scope; inherited from the caller context when absent.
    pub project_id: Option<String>,
    /// User scope; inherited from the caller context when absent.
    pub user_id: Option<String>,
    /// Session scope; inherited, then normalized to a UUID.
    pub session_id: Option<String>,
}

/// Resolves specialists and runs delegated engines.
pub struct Delegator {
    specialists: Arc<dyn SpecialistsStore>,
    teams: Arc<dyn TeamsStore>,
    registry: Arc<ToolRegistry>,
    default_provider: Arc<dyn ChatProvider>,
    default_model: String,
    observer: Arc<dyn DelegateObserver>,
}

impl Delegator {
    /// Create a delegator over the shared tool registry.
    #[must_use]
    pub fn new(
        specialists: Arc<dyn SpecialistsStore>,
        teams: Arc<dyn TeamsStore>,
        registry: Arc<ToolRegistry>,
        default_provider: Arc<dyn ChatProvider>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            specialists,
            teams,
            registry,
            default_provider,
            default_model: default_model.into(),
            observer: Arc::new(NoopDelegateObserver),
        }
    }

    /// Attach an event observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn DelegateObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn resolve_provider(&self, specialist: &Specialist) -> Arc<dyn ChatProvider> {
        if specialist.base_url.is_empty() {
            return Arc::clone(&self.default_provider);
        }
        let mut provider = OpenAiProvider::compatible(specialist.base_url.clone(), None)
            .with_default_model(if specialist.model.is_empty() {
                self.default_model.clone()
            } else {
                specialist.model.clone()
            });
        for (name, value) in &specialist.extra_headers {
            provider = provider.with_header(name.clone(), value.clone());
        }
        Arc::new(provider)
    }

    /// The registry view a specialist is allowed to see.
    fn resolve_tools(&self, specialist: &Specialist, enable_tools: Option<bool>) -> Arc<ToolRegistry> {
        let enabled = enable_tools.unwrap_or(specialist.enable_tools);
        if !enabled {
            return Arc::new(ToolRegistry::new());
        }
        if specialist.allow_tools.is_empty() {
            return Arc::clone(&self.registry);
        }
        Arc::new(self.registry.view(&specialist.allow_tools))
    }

    /// Synchronously run a delegated agent and return its final text.
    ///
    /// The child context inherits sandbox, identity, auth cookie, and the
    /// cancel token from the caller; the scope advances one level.
    pub async fn delegate(&self, ctx: &ToolContext, request: DelegateRequest) -> Result<String> {
        let scope = ctx.scope.child();
        scope.check_depth()?;

        let user_id = request
            .user_id
            .clone()
            .or_else(|| ctx.user_id.clone())
            .ok_or_else(|| Error::invalid("delegation requires a user"))?;

        let specialist = self.specialists.get(&user_id, &request.agent_name).await?;
        if specialist.paused {
            return Err(Error::invalid(format!(
                "specialist '{}' is paused",
                specialist.name
            )));
        }

        let provider = self.resolve_provider(&specialist);
        let tools = self.resolve_tools(&specialist, request.enable_tools);
        let system = if specialist.system.is_empty() {
            MEMORY_INSTRUCTIONS.to_owned()
        } else {
            format!("{MEMORY_INSTRUCTIONS}\n\n{}", specialist.system)
        };
        let model = if specialist.model.is_empty() {
            self.default_model.clone()
        } else {
            specialist.model.clone()
        };

        let mut engine = Engine::new(provider, tools as _)
            .with_system(system)
            .with_model(model)
            .with_tracer(Arc::new(ScopedTracer {
                scope: scope.clone(),
                observer: Arc::clone(&self.observer),
            }));
        if request.max_steps > 0 {
            engine = engine.with_max_steps(request.max_steps);
        }

        let mut child_ctx = ctx.clone();
        child_ctx.user_id = Some(user_id);
        child_ctx.project_id = request.project_id.clone().or_else(|| ctx.project_id.clone());
        child_ctx.session_id = request
            .session_id
            .clone()
            .or_else(|| ctx.session_id.clone())
            .map(|raw| session_uuid(&raw));
        child_ctx.scope = scope.clone();

        info!(
            agent = %request.agent_name,
            call_id = %scope.call_id,
            parent = ?scope.parent_call_id,
            depth = scope.depth,
            "delegating",
        );

        let run = engine.run(&child_ctx, &request.prompt, &request.history);
        let outcome = match request.timeout {
            Some(timeout) => tokio::time::timeout(timeout, run)
                .await
                .map_err(|_| Error::timeout(format!("delegate to '{}'", request.agent_name)))??,
            None => run.await?,
        };

        debug!(agent = %request.agent_name, steps = outcome.steps, "delegation finished");
        Ok(outcome.final_text)
    }

    /// Delegate to a team's orchestrator.
    ///
    /// Long-running by design: the parent deadline is detached unless the
    /// caller supplied an explicit timeout. The orchestrator may in turn
    /// ask its members through `ask_agent`.
    pub async fn delegate_to_team(
        &self,
        ctx: &ToolContext,
        team_name: &str,
        prompt: &str,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let user_id = ctx
            .user_id
            .clone()
            .ok_or_else(|| Error::invalid("delegation requires a user"))?;
        let team = self.teams.get(&user_id, team_name).await?;

        let mut detached_ctx = ctx.clone();
        detached_ctx.cancel = crate::cancel::CancelToken::detached();

        let member_list = if team.members.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nTeam members you can ask via ask_agent: {}.",
                team.members.join(", ")
            )
        };

        self.delegate(
            &detached_ctx,
            DelegateRequest {
                agent_name: team.orchestrator.clone(),
                prompt: format!("{prompt}{member_list}"),
                timeout,
                ..DelegateRequest::default()
            },
        )
        .await
    }
}

impl std::fmt::Debug for Delegator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegator")
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatResponse;
    use crate::providers::MockProvider;
    use crate::specialist::Specialist;
    use crate::store::specialists::{MemorySpecialistsStore, MemoryTeamsStore};
    use chrono::Utc;

    #[test]
    fn session_ids_normalize_deterministically() {
        let canonical = "0c7b8a9e-7c15-4b28-9d58-5f2f9b8a6c01";
        assert_eq!(session_uuid(canonical), canonical);

        let a = session_uuid("my-session");
        let b = session_uuid("my-session");
        let c = session_uuid("other-session");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn scope_depth_is_capped() {
        let mut scope = CallScope::root();
        for _ in 0..MAX_DEPTH {
            scope = scope.child();
        }
        assert!(scope.check_depth().is_ok());
        assert!(scope.child().check_depth().is_err());
    }

    async fn delegator_with(
        specialist: Specialist,
        provider: Arc<MockProvider>,
    ) -> Delegator {
        let specialists = Arc::new(MemorySpecialistsStore::new());
        specialists.upsert(specialist).await.unwrap();
        Delegator::new(
            specialists as _,
            Arc::new(MemoryTeamsStore::new()) as _,
            Arc::new(ToolRegistry::new()),
            provider as _,
            "default-model",
        )
    }

    #[tokio::test]
    async fn delegate_runs_specialist_and_inherits_scope() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("done")]));
        let mut specialist = Specialist::named("u1", "helper");
        specialist.system = "Be concise.".into();
        let delegator = delegator_with(specialist, Arc::clone(&provider)).await;

        let mut ctx = ToolContext::new();
        ctx.user_id = Some("u1".into());
        ctx.session_id = Some("plain-session".into());

        let result = delegator
            .delegate(
                &ctx,
                DelegateRequest {
                    agent_name: "helper".into(),
                    prompt: "hi".into(),
                    ..DelegateRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result, "done");

        // The memory instructions are prepended to the system prompt.
        let request = provider.last_request().unwrap();
        assert!(request.messages[0].content.starts_with(MEMORY_INSTRUCTIONS));
        assert!(request.messages[0].content.contains("Be concise."));
    }

    #[tokio::test]
    async fn paused_specialist_is_rejected() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("no")]));
        let mut specialist = Specialist::named("u1", "sleeper");
        specialist.paused = true;
        let delegator = delegator_with(specialist, provider).await;

        let mut ctx = ToolContext::new();
        ctx.user_id = Some("u1".into());

        let err = delegator
            .delegate(
                &ctx,
                DelegateRequest {
                    agent_name: "sleeper".into(),
                    prompt: "hi".into(),
                    ..DelegateRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn unknown_specialist_is_not_found() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("x")]));
        let delegator = delegator_with(Specialist::named("u1", "other"), provider).await;

        let mut ctx = ToolContext::new();
        ctx.user_id = Some("u1".into());

        let err = delegator
            .delegate(
                &ctx,
                DelegateRequest {
                    agent_name: "missing".into(),
                    prompt: "hi".into(),
                    ..DelegateRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn depth_cap_stops_runaway_recursion() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("x")]));
        let delegator = delegator_with(Specialist::named("u1", "helper"), provider).await;

        let mut ctx = ToolContext::new();
        ctx.user_id = Some("u1".into());
        for _ in 0..=MAX_DEPTH {
            ctx.scope = ctx.scope.child();
        }

        let err = delegator
            .delegate(
                &ctx,
                DelegateRequest {
                    agent_name: "helper".into(),
                    prompt: "hi".into(),
                    ..DelegateRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[tokio::test]
    async fn team_delegation_targets_orchestrator_detached() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("team says hi")]));
        let specialists = Arc::new(MemorySpecialistsStore::new());
        specialists.upsert(Specialist::named("u1", "lead")).await.unwrap();
        let teams = Arc::new(MemoryTeamsStore::new());
        let now = Utc::now();
        teams
            .upsert(crate::specialist::SpecialistTeam {
                user_id: "u1".into(),
                name: "support".into(),
                description: String::new(),
                orchestrator: "lead".into(),
                members: vec!["billing".into()],
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let delegator = Delegator::new(
            specialists as _,
            teams as _,
            Arc::new(ToolRegistry::new()),
            Arc::clone(&provider) as _,
            "default-model",
        );

        let mut ctx = ToolContext::new();
        ctx.user_id = Some("u1".into());
        // A cancelled parent must not cancel the detached team run.
        ctx.cancel.cancel();

        let result = delegator
            .delegate_to_team(&ctx, "support", "handle this", None)
            .await
            .unwrap();
        assert_eq!(result, "team says hi");

        let request = provider.last_request().unwrap();
        let user_msg = request.messages.last().unwrap();
        assert!(user_msg.content.contains("billing"));
    }
}
