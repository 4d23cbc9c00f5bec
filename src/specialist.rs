//! Specialists, teams, and the pre-dispatch router.
//!
//! A specialist is a named, persisted agent configuration: provider
//! endpoint, model, system prompt, and tool allowlist. Teams wrap an
//! orchestrator specialist plus member specialists. Both are user-scoped and
//! unique by `(user_id, name)`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::chat::{ChatProvider, ChatRequest};
use crate::error::{Error, Result};
use crate::message::Message;

/// A named agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialist {
    /// Owning user.
    pub user_id: String,
    /// Unique name within the user's namespace.
    pub name: String,
    /// Provider endpoint; empty selects the runtime default.
    #[serde(default)]
    pub base_url: String,
    /// Model; empty selects the provider default.
    #[serde(default)]
    pub model: String,
    /// System prompt.
    #[serde(default)]
    pub system: String,
    /// Tool allowlist applied when tools are enabled.
    #[serde(default)]
    pub allow_tools: Vec<String>,
    /// Whether the specialist may use tools at all.
    #[serde(default)]
    pub enable_tools: bool,
    /// Paused specialists are skipped by the router.
    #[serde(default)]
    pub paused: bool,
    /// Reasoning effort hint forwarded to the provider.
    #[serde(default)]
    pub reasoning_effort: String,
    /// Provider family identifier.
    #[serde(default)]
    pub provider: String,
    /// Extra headers sent to the provider endpoint.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    /// Extra provider parameters.
    #[serde(default)]
    pub extra_params: Value,
    /// Context window reserved for summaries.
    #[serde(default)]
    pub summary_context_window_tokens: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Specialist {
    /// A minimal specialist with defaults everywhere else.
    #[must_use]
    pub fn named(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            name: name.into(),
            base_url: String::new(),
            model: String::new(),
            system: String::new(),
            allow_tools: Vec::new(),
            enable_tools: false,
            paused: false,
            reasoning_effort: String::new(),
            provider: String::new(),
            extra_headers: HashMap::new(),
            extra_params: Value::Null,
            summary_context_window_tokens: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An orchestrator specialist plus member specialists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistTeam {
    /// Owning user.
    pub user_id: String,
    /// Unique name within the user's namespace.
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// The orchestrator specialist's name.
    pub orchestrator: String,
    /// Member specialist names.
    #[serde(default)]
    pub members: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SpecialistTeam {
    /// Add a member; idempotent.
    pub fn add_member(&mut self, member: impl Into<String>) {
        let member = member.into();
        if !self.members.contains(&member) {
            self.members.push(member);
            self.updated_at = Utc::now();
        }
    }

    /// Remove a member; idempotent.
    pub fn remove_member(&mut self, member: &str) {
        let before = self.members.len();
        self.members.retain(|m| m != member);
        if self.members.len() != before {
            self.updated_at = Utc::now();
        }
    }
}

/// An active specialist instance bound to its provider.
pub struct AgentHandle {
    /// The configuration.
    pub specialist: Specialist,
    /// The resolved provider.
    pub provider: Arc<dyn ChatProvider>,
}

impl AgentHandle {
    /// Single-shot inference with no tool loop; used by the router.
    pub async fn inference(&self, prompt: &str, history: &[Message]) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.specialist.system.is_empty() {
            messages.push(Message::system(self.specialist.system.clone()));
        }
        messages.extend_from_slice(history);
        messages.push(Message::user(prompt));

        let request = ChatRequest::with_messages(&self.specialist.model, messages);
        let response = self.provider.chat(&request).await?;
        Ok(response.message.content)
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("specialist", &self.specialist.name)
            .finish()
    }
}

/// Registry of active agent instances.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentHandle>>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace an instance.
    pub async fn put(&self, handle: Arc<AgentHandle>) {
        self.agents
            .write()
            .await
            .insert(handle.specialist.name.clone(), handle);
    }

    /// Fetch an instance by name.
    pub async fn get(&self, name: &str) -> Result<Arc<AgentHandle>> {
        self.agents
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("specialist '{name}'")))
    }

    /// Remove an instance.
    pub async fn remove(&self, name: &str) {
        self.agents.write().await.remove(name);
    }

    /// Active instance names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// One routing rule: any keyword hit routes to the specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Lower-cased keywords.
    pub keywords: Vec<String>,
    /// Target specialist name.
    pub specialist: String,
}

/// Pre-dispatch keyword router.
///
/// Consulted before the default engine; a hit bypasses it entirely by
/// routing straight to the matched specialist.
#[derive(Debug, Clone, Default)]
pub struct Router {
    rules: Vec<RoutingRule>,
}

impl Router {
    /// Build a router from a user-configured table.
    #[must_use]
    pub fn new(rules: Vec<RoutingRule>) -> Self {
        Self { rules }
    }

    /// The specialist for this query, if any rule matches.
    #[must_use]
    pub fn route(&self, query: &str) -> Option<&str> {
        let lowered = query.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| lowered.contains(&k.to_lowercase())))
            .map(|rule| rule.specialist.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatResponse;
    use crate::providers::MockProvider;

    #[test]
    fn team_member_ops_are_idempotent() {
        let now = Utc::now();
        let mut team = SpecialistTeam {
            user_id: "u1".into(),
            name: "support".into(),
            description: String::new(),
            orchestrator: "lead".into(),
            members: vec![],
            created_at: now,
            updated_at: now,
        };

        team.add_member("billing");
        team.add_member("billing");
        assert_eq!(team.members, vec!["billing"]);

        team.remove_member("billing");
        team.remove_member("billing");
        assert!(team.members.is_empty());
    }

    #[tokio::test]
    async fn registry_get_put_remove() {
        let registry = AgentRegistry::new();
        let handle = Arc::new(AgentHandle {
            specialist: Specialist::named("u1", "coder"),
            provider: Arc::new(MockProvider::new(vec![ChatResponse::from_text("ok")])),
        });
        registry.put(handle).await;

        assert!(registry.get("coder").await.is_ok());
        assert_eq!(registry.names().await, vec!["coder"]);
        assert_eq!(registry.get("ghost").await.unwrap_err().kind(), "not_found");

        registry.remove("coder").await;
        assert!(registry.get("coder").await.is_err());
    }

    #[tokio::test]
    async fn inference_is_single_shot() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("answer")]));
        let mut specialist = Specialist::named("u1", "oracle");
        specialist.system = "Be brief.".into();
        let handle = AgentHandle {
            specialist,
            provider: provider.clone(),
        };

        let out = handle.inference("question", &[]).await.unwrap();
        assert_eq!(out, "answer");

        let request = provider.last_request().unwrap();
        assert_eq!(request.messages.len(), 2);
        assert!(request.tools.is_none());
    }

    #[test]
    fn router_matches_keywords_case_insensitively() {
        let router = Router::new(vec![
            RoutingRule {
                keywords: vec!["invoice".into(), "billing".into()],
                specialist: "billing".into(),
            },
            RoutingRule {
                keywords: vec!["deploy".into()],
                specialist: "ops".into(),
            },
        ]);

        assert_eq!(router.route("Where is my INVOICE?"), Some("billing"));
        assert_eq!(router.route("please deploy the service"), Some("ops"));
        assert_eq!(router.route("hello there"), None);
    }
}
