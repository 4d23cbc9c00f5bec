//! The orchestration facade.
//!
//! A [`Runtime`] owns the configuration, the stores, the shared tool
//! registry, the delegator, and the retrieval stack. [`Runtime::run`] is
//! the in-process equivalent of the agent HTTP surface: resolve the
//! sandbox, consult the router, drive the engine, persist the turn.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use futures::StreamExt as _;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agent::Engine;
use crate::cancel::CancelToken;
use crate::chat::ChatProvider;
use crate::config::{BackendKind, RuntimeConfig};
use crate::delegate::{DelegateRequest, Delegator, session_uuid};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::message::{Message, Role};
use crate::retrieval::{
    MemoryGraphStore, MemorySearchStore, MemoryVectorStore, Retriever, SearchStore,
    SqliteSearchStore, SqliteVectorStore, VectorStore,
};
use crate::retrieval::GraphStore;
use crate::sandbox::Sandbox;
use crate::specialist::Router;
use crate::store::{
    ChatStore, Db, MemoryChatStore, MemoryPreferencesStore, MemoryProjectsStore,
    MemorySpecialistsStore, MemoryTeamsStore, MemoryWarppStore, NewMessage, ProjectsStore,
    SpecialistsStore, SqliteChatStore, SqlitePreferencesStore, SqliteProjectsStore,
    SqliteSpecialistsStore, SqliteTeamsStore, SqliteWarppStore, TeamsStore,
    UserPreferencesStore, WarppStore,
};
use crate::stream::AgentEvent;
use crate::telemetry::{MetricsObserver, metrics};
use crate::tool::{Dispatch, ParallelTool, RecordingRegistry, ToolContext, ToolRegistry};
use crate::tools::{
    AskAgentTool, DelegateToTeamTool, EvolveCodeTool, FileDeleteTool, FilePatchTool,
    FileReadTool, FileWriteTool, HybridRetrievalTool, ListDirTool, RunCliTool, WebFetchTool,
    WebSearchTool,
};

/// Preview length persisted on the session row.
const PREVIEW_LEN: usize = 96;

/// Fallback specialist name for bare `ask_agent` calls.
const DEFAULT_ASK_TARGET: &str = "assistant";

/// One agent request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    /// Caller identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Active project; enables filesystem tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Session to persist the turn into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// The user's prompt.
    pub prompt: String,
    /// Prior history; loaded from the session store when empty.
    #[serde(default)]
    pub history: Vec<Message>,
    /// Opaque auth cookie, forwarded on delegation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_cookie: Option<String>,
}

/// The result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    /// Final assistant text.
    pub result: String,
    /// The (normalized) session the turn was persisted into.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Steps consumed.
    pub steps: usize,
}

/// Builds a [`Runtime`] from configuration plus the injected providers.
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    provider: Arc<dyn ChatProvider>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    router: Router,
    system_prompt: String,
    max_steps: usize,
}

impl RuntimeBuilder {
    /// Start a builder over the default chat provider.
    #[must_use]
    pub fn new(config: RuntimeConfig, provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            config,
            provider,
            embedder: None,
            router: Router::default(),
            system_prompt: "You are a helpful assistant with access to tools.".to_owned(),
            max_steps: crate::agent::engine::DEFAULT_MAX_STEPS,
        }
    }

    /// Attach the embedding provider (enables the vector side).
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Attach the pre-dispatch router.
    #[must_use]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Override the default system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Override the engine step budget.
    #[must_use]
    pub const fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Wire the stores, registry, and delegator.
    pub fn build(self) -> Result<Runtime> {
        let config = self.config;
        let has_db_path = config.db.path.is_some();
        let db = match &config.db.path {
            Some(path) => Some(Db::open(path)?),
            None => None,
        };
        let require_db = |db: &Option<Db>| -> Result<Db> {
            db.clone()
                .ok_or_else(|| Error::invalid("sqlite backend selected without a db path"))
        };

        // Chat-family stores share one backend selection.
        let chat_kind = config.db.chat.resolve(has_db_path);
        let (chat_store, projects, specialists, teams, warpp, prefs): (
            Arc<dyn ChatStore>,
            Arc<dyn ProjectsStore>,
            Arc<dyn SpecialistsStore>,
            Arc<dyn TeamsStore>,
            Arc<dyn WarppStore>,
            Arc<dyn UserPreferencesStore>,
        ) = match chat_kind {
            BackendKind::Sqlite => {
                let db = require_db(&db)?;
                (
                    Arc::new(SqliteChatStore::new(db.clone())?),
                    Arc::new(SqliteProjectsStore::new(db.clone())?),
                    Arc::new(SqliteSpecialistsStore::new(db.clone())?),
                    Arc::new(SqliteTeamsStore::new(db.clone())?),
                    Arc::new(SqliteWarppStore::new(db.clone())?),
                    Arc::new(SqlitePreferencesStore::new(db)?),
                )
            }
            _ => (
                Arc::new(MemoryChatStore::new()),
                Arc::new(MemoryProjectsStore::new()),
                Arc::new(MemorySpecialistsStore::new()),
                Arc::new(MemoryTeamsStore::new()),
                Arc::new(MemoryWarppStore::new()),
                Arc::new(MemoryPreferencesStore::new()),
            ),
        };

        let search: Option<Arc<dyn SearchStore>> = match config.db.search.resolve(has_db_path) {
            BackendKind::None => None,
            BackendKind::Sqlite => Some(Arc::new(SqliteSearchStore::new(require_db(&db)?)?)),
            _ => Some(Arc::new(MemorySearchStore::new())),
        };
        let vector: Option<Arc<dyn VectorStore>> = match config.db.vector.resolve(has_db_path) {
            BackendKind::None => None,
            BackendKind::Sqlite => Some(Arc::new(SqliteVectorStore::new(
                require_db(&db)?,
                config.vector.dimensions,
                config.vector.metric,
            )?)),
            _ => Some(Arc::new(MemoryVectorStore::new(
                config.vector.dimensions,
                config.vector.metric,
            ))),
        };
        let graph: Option<Arc<dyn GraphStore>> = match config.db.graph.resolve(has_db_path) {
            BackendKind::None => None,
            _ => Some(Arc::new(MemoryGraphStore::new())),
        };

        // Retrieval stack.
        let mut retriever = Retriever::new();
        if let Some(search) = &search {
            retriever = retriever.with_search(Arc::clone(search));
        }
        if let (Some(vector), Some(embedder)) = (&vector, &self.embedder) {
            retriever = retriever.with_vector(Arc::clone(vector), Arc::clone(embedder));
        }
        if let Some(graph) = &graph {
            retriever = retriever.with_graph(Arc::clone(graph));
        }
        let retriever = Arc::new(retriever);

        let ingestor = search.as_ref().map(|search| {
            let mut ingestor = Ingestor::new(Arc::clone(search));
            if let (Some(vector), Some(embedder)) = (&vector, &self.embedder) {
                ingestor = ingestor.with_vector(Arc::clone(vector), Arc::clone(embedder));
            }
            if let Some(graph) = &graph {
                ingestor = ingestor.with_graph(Arc::clone(graph));
            }
            Arc::new(ingestor)
        });

        // Tool registry. The parallel meta-tool and the delegation tools
        // hold the same registry they register into.
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(FileReadTool));
        registry.register(Arc::new(FileWriteTool));
        registry.register(Arc::new(FilePatchTool));
        registry.register(Arc::new(FileDeleteTool));
        registry.register(Arc::new(ListDirTool));
        registry.register(Arc::new(RunCliTool::new()));
        registry.register(Arc::new(WebFetchTool::new()));
        registry.register(Arc::new(ParallelTool::new(Arc::clone(&registry))));
        registry.register(Arc::new(EvolveCodeTool::new(
            Arc::clone(&self.provider),
            config.default_model.clone(),
        )));
        if search.is_some() || vector.is_some() {
            registry.register(Arc::new(HybridRetrievalTool::new(Arc::clone(&retriever))));
        }
        if let Some(searxng) = &config.searxng_url {
            registry.register(Arc::new(WebSearchTool::new(searxng.clone())));
        }
        if !config.kafka_brokers.is_empty() {
            // The send tool needs an external producer adapter; the core
            // only parses the knob.
            warn!("kafka brokers configured but no producer adapter is wired");
        }

        let delegator = Arc::new(Delegator::new(
            Arc::clone(&specialists),
            Arc::clone(&teams),
            Arc::clone(&registry),
            Arc::clone(&self.provider),
            config.default_model.clone(),
        ));
        registry.register(Arc::new(AskAgentTool::new(
            Arc::clone(&delegator),
            DEFAULT_ASK_TARGET,
        )));
        registry.register(Arc::new(DelegateToTeamTool::new(Arc::clone(&delegator))));

        // The engine dispatches through the recording decorator so the
        // metrics layer observes every tool call.
        let dispatch: Arc<dyn Dispatch> = Arc::new(RecordingRegistry::new(
            Arc::clone(&registry) as _,
            Arc::new(MetricsObserver),
        ));

        Ok(Runtime {
            config,
            provider: self.provider,
            registry,
            dispatch,
            chat_store,
            projects,
            specialists,
            teams,
            warpp,
            prefs,
            delegator,
            retriever,
            ingestor,
            router: self.router,
            system_prompt: self.system_prompt,
            max_steps: self.max_steps,
        })
    }
}

/// The assembled runtime.
pub struct Runtime {
    config: RuntimeConfig,
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    dispatch: Arc<dyn Dispatch>,
    chat_store: Arc<dyn ChatStore>,
    projects: Arc<dyn ProjectsStore>,
    specialists: Arc<dyn SpecialistsStore>,
    teams: Arc<dyn TeamsStore>,
    warpp: Arc<dyn WarppStore>,
    prefs: Arc<dyn UserPreferencesStore>,
    delegator: Arc<Delegator>,
    retriever: Arc<Retriever>,
    ingestor: Option<Arc<Ingestor>>,
    router: Router,
    system_prompt: String,
    max_steps: usize,
}

impl Runtime {
    /// Start building a runtime.
    #[must_use]
    pub fn builder(config: RuntimeConfig, provider: Arc<dyn ChatProvider>) -> RuntimeBuilder {
        RuntimeBuilder::new(config, provider)
    }

    /// The shared tool registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The chat store.
    #[must_use]
    pub fn chat_store(&self) -> &Arc<dyn ChatStore> {
        &self.chat_store
    }

    /// The projects store.
    #[must_use]
    pub fn projects(&self) -> &Arc<dyn ProjectsStore> {
        &self.projects
    }

    /// The specialists store.
    #[must_use]
    pub fn specialists(&self) -> &Arc<dyn SpecialistsStore> {
        &self.specialists
    }

    /// The teams store.
    #[must_use]
    pub fn teams(&self) -> &Arc<dyn TeamsStore> {
        &self.teams
    }

    /// The workflow store.
    #[must_use]
    pub fn warpp(&self) -> &Arc<dyn WarppStore> {
        &self.warpp
    }

    /// The preferences store.
    #[must_use]
    pub fn prefs(&self) -> &Arc<dyn UserPreferencesStore> {
        &self.prefs
    }

    /// The delegator.
    #[must_use]
    pub fn delegator(&self) -> &Arc<Delegator> {
        &self.delegator
    }

    /// The retrieval stack.
    #[must_use]
    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// The ingestion pipeline, when a search backend is configured.
    #[must_use]
    pub fn ingestor(&self) -> Option<&Arc<Ingestor>> {
        self.ingestor.as_ref()
    }

    /// Resolve the request context: sandbox base, identity, scope.
    fn build_context(&self, request: &RunRequest, cancel: CancelToken) -> Result<ToolContext> {
        let mut ctx = ToolContext::new();
        ctx.user_id = request.user_id.clone();
        ctx.project_id = request.project_id.clone();
        ctx.session_id = request.session_id.as_deref().map(session_uuid);
        ctx.auth_cookie = request.auth_cookie.clone();
        ctx.cancel = cancel;

        // The sandbox only resolves when the request carries a project;
        // filesystem tools fail closed otherwise.
        if let (Some(user), Some(project)) = (&request.user_id, &request.project_id) {
            ctx.sandbox = Some(Sandbox::for_project(
                &self.config.workdir,
                user,
                Some(project),
            )?);
        }
        Ok(ctx)
    }

    async fn resolve_history(
        &self,
        request: &RunRequest,
        session_id: Option<&str>,
    ) -> Result<Vec<Message>> {
        if !request.history.is_empty() {
            return Ok(request.history.clone());
        }
        let Some(session_id) = session_id else {
            return Ok(Vec::new());
        };
        self.chat_store
            .ensure_session(request.user_id.as_deref(), session_id, "Chat")
            .await?;
        let rows = self
            .chat_store
            .list_messages(request.user_id.as_deref(), session_id)
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| matches!(row.role, Role::User | Role::Assistant))
            .map(|row| Message {
                role: row.role,
                content: row.content,
                tool_calls: None,
                tool_call_id: None,
            })
            .collect())
    }

    async fn persist_turn(
        &self,
        request: &RunRequest,
        session_id: Option<&str>,
        final_text: &str,
    ) {
        let Some(session_id) = session_id else { return };
        if let Err(error) = self
            .chat_store
            .ensure_session(request.user_id.as_deref(), session_id, "Chat")
            .await
        {
            warn!(%error, session = session_id, "failed to ensure session");
            return;
        }
        let preview: String = final_text.chars().take(PREVIEW_LEN).collect();
        let result = self
            .chat_store
            .append_messages(
                request.user_id.as_deref(),
                session_id,
                &[
                    NewMessage::new(Role::User, request.prompt.clone()),
                    NewMessage::new(Role::Assistant, final_text.to_owned()),
                ],
                &preview,
                Some(&self.config.default_model),
            )
            .await;
        if let Err(error) = result {
            warn!(%error, session = session_id, "failed to persist turn");
        }
    }

    /// Drive one request to completion.
    pub async fn run(&self, request: RunRequest, cancel: CancelToken) -> Result<RunResponse> {
        if request.prompt.trim().is_empty() {
            return Err(Error::invalid("empty prompt"));
        }
        metrics().runs_total.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let ctx = self.build_context(&request, cancel)?;
        let session_id = ctx.session_id.clone();
        let history = self.resolve_history(&request, session_id.as_deref()).await?;

        // The router may bypass the default engine entirely.
        if let Some(specialist) = self.router.route(&request.prompt) {
            debug!(specialist, "router matched; bypassing default engine");
            let result = self
                .delegator
                .delegate(
                    &ctx,
                    DelegateRequest {
                        agent_name: specialist.to_owned(),
                        prompt: request.prompt.clone(),
                        history: history.clone(),
                        ..DelegateRequest::default()
                    },
                )
                .await?;
            self.persist_turn(&request, session_id.as_deref(), &result).await;
            metrics().run_duration.observe(started.elapsed());
            return Ok(RunResponse {
                result,
                session_id,
                steps: 1,
            });
        }

        let engine = Engine::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.dispatch),
        )
        .with_system(self.system_prompt.clone())
        .with_model(self.config.default_model.clone())
        .with_max_steps(self.max_steps);

        let outcome = engine.run(&ctx, &request.prompt, &history).await?;
        self.persist_turn(&request, session_id.as_deref(), &outcome.final_text)
            .await;

        info!(steps = outcome.steps, "run finished");
        metrics().run_duration.observe(started.elapsed());
        Ok(RunResponse {
            result: outcome.final_text,
            session_id,
            steps: outcome.steps,
        })
    }

    /// Drive one request, yielding [`AgentEvent`]s.
    ///
    /// Failures surface as a single terminal [`AgentEvent::Error`].
    pub fn run_streamed(
        &self,
        request: RunRequest,
        cancel: CancelToken,
    ) -> impl Stream<Item = AgentEvent> + Send + '_ {
        async_stream::stream! {
            if request.prompt.trim().is_empty() {
                yield AgentEvent::Error {
                    kind: "invalid_argument".to_owned(),
                    message: "empty prompt".to_owned(),
                };
                return;
            }
            metrics().runs_total.fetch_add(1, Ordering::Relaxed);

            let ctx = match self.build_context(&request, cancel) {
                Ok(ctx) => ctx,
                Err(error) => {
                    yield AgentEvent::Error {
                        kind: error.kind().to_owned(),
                        message: error.to_string(),
                    };
                    return;
                }
            };
            let session_id = ctx.session_id.clone();
            let history = match self.resolve_history(&request, session_id.as_deref()).await {
                Ok(history) => history,
                Err(error) => {
                    yield AgentEvent::Error {
                        kind: error.kind().to_owned(),
                        message: error.to_string(),
                    };
                    return;
                }
            };

            let engine = Engine::new(
                Arc::clone(&self.provider),
                Arc::clone(&self.dispatch),
            )
            .with_system(self.system_prompt.clone())
            .with_model(self.config.default_model.clone())
            .with_max_steps(self.max_steps);

            let mut final_text: Option<String> = None;
            {
                let mut events = engine.run_streamed(&ctx, &request.prompt, &history);
                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) => {
                            if let AgentEvent::Final { text } = &event {
                                final_text = Some(text.clone());
                            }
                            yield event;
                        }
                        Err(error) => {
                            yield AgentEvent::Error {
                                kind: error.kind().to_owned(),
                                message: error.to_string(),
                            };
                            return;
                        }
                    }
                }
            }

            if let Some(text) = final_text {
                self.persist_turn(&request, session_id.as_deref(), &text).await;
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("model", &self.config.default_model)
            .field("tools", &self.registry.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatResponse;
    use crate::message::ToolCall;
    use crate::providers::MockProvider;
    use crate::specialist::{RoutingRule, Specialist};
    use serde_json::json;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            workdir: tempfile::tempdir().unwrap().keep(),
            default_model: "test-model".to_owned(),
            ..RuntimeConfig::default()
        }
    }

    fn runtime_with(provider: Arc<MockProvider>) -> Runtime {
        Runtime::builder(config(), provider).build().unwrap()
    }

    #[tokio::test]
    async fn run_answers_and_persists_the_turn() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("hi there")]));
        let runtime = runtime_with(provider);

        let response = runtime
            .run(
                RunRequest {
                    user_id: Some("u1".into()),
                    session_id: Some("my-session".into()),
                    prompt: "hello".into(),
                    ..RunRequest::default()
                },
                CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.result, "hi there");
        let session_id = response.session_id.unwrap();
        // Non-UUID session ids are normalized deterministically.
        assert_eq!(session_id, session_uuid("my-session"));

        let messages = runtime
            .chat_store()
            .list_messages(Some("u1"), &session_id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].content, "hi there");

        let session = runtime
            .chat_store()
            .get_session(Some("u1"), &session_id)
            .await
            .unwrap();
        assert_eq!(session.last_preview, "hi there");
        assert_eq!(session.model, "test-model");
    }

    #[tokio::test]
    async fn builtin_tools_are_registered() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("x")]));
        let runtime = runtime_with(provider);

        let names = runtime.registry().names();
        for expected in [
            "ask_agent",
            "delegate_to_team",
            "evolve_code",
            "file_delete",
            "file_patch",
            "file_read",
            "file_write",
            "hybrid_retrieval",
            "list_dir",
            "parallel",
            "run_cli",
            "web_fetch",
        ] {
            assert!(names.contains(&expected.to_owned()), "missing {expected}");
        }
        // No SearXNG configured, so no web_search.
        assert!(!names.contains(&"web_search".to_owned()));
    }

    #[tokio::test]
    async fn tool_loop_reaches_the_sandbox() {
        // The model writes a file, then answers.
        let provider = Arc::new(MockProvider::new(vec![
            ChatResponse::new(Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new(
                    "c1",
                    "file_write",
                    json!({"path": "out.txt", "content": "written"}),
                )],
            )),
            ChatResponse::from_text("saved"),
        ]));
        let runtime = runtime_with(provider);

        let response = runtime
            .run(
                RunRequest {
                    user_id: Some("u1".into()),
                    project_id: Some("p1".into()),
                    prompt: "write the file".into(),
                    ..RunRequest::default()
                },
                CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.result, "saved");
    }

    #[tokio::test]
    async fn router_bypasses_the_default_engine() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text(
            "routed answer",
        )]));
        let runtime = Runtime::builder(config(), Arc::clone(&provider) as _)
            .router(Router::new(vec![RoutingRule {
                keywords: vec!["billing".into()],
                specialist: "billing-bot".into(),
            }]))
            .build()
            .unwrap();
        runtime
            .specialists()
            .upsert(Specialist::named("u1", "billing-bot"))
            .await
            .unwrap();

        let response = runtime
            .run(
                RunRequest {
                    user_id: Some("u1".into()),
                    prompt: "billing question".into(),
                    ..RunRequest::default()
                },
                CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.result, "routed answer");
    }

    #[tokio::test]
    async fn streamed_run_ends_with_final_and_persists() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("streamed")]));
        let runtime = runtime_with(provider);

        let request = RunRequest {
            user_id: Some("u1".into()),
            session_id: Some("s".into()),
            prompt: "go".into(),
            ..RunRequest::default()
        };
        let events: Vec<AgentEvent> = runtime
            .run_streamed(request, CancelToken::new())
            .collect()
            .await;

        assert!(
            matches!(events.last().unwrap(), AgentEvent::Final { text } if text == "streamed")
        );
        let messages = runtime
            .chat_store()
            .list_messages(Some("u1"), &session_uuid("s"))
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let provider = Arc::new(MockProvider::new(vec![ChatResponse::from_text("x")]));
        let runtime = runtime_with(provider);
        let err = runtime
            .run(RunRequest::default(), CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
