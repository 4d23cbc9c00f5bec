//! The bounded chat/tool loop.
//!
//! All per-run state lives in [`RunState`], initialised once and then driven
//! by either the blocking ([`Engine::run`]) or streaming
//! ([`Engine::run_streamed`]) entry point, so the two paths share one core.
//!
//! Termination: the loop exits on (a) an assistant message with no tool
//! calls, (b) step budget exhaustion, or (c) cancellation. On budget
//! exhaustion the run resolves to the sentinel [`NO_FINAL_TEXT`] instead of
//! an error, matching what UIs expect.
//!
//! Streaming ordering: deltas for step N are yielded before any tool-start
//! event for step N, tool-starts before tool-results, and tool-results
//! before any delta of step N + 1.

use std::pin::Pin;
use std::sync::Arc;

use futures::stream::Stream;
use futures::StreamExt as _;
use serde_json::{Value, json};
use tracing::{debug, error, info, info_span, warn, Instrument as _};

use crate::chat::{ChatProvider, ChatRequest, ChatResponse, ToolSpec, Usage};
use crate::error::{Error, Result};
use crate::message::{Message, ToolCall};
use crate::stream::{AgentEvent, StreamAggregator, StreamChunk};
use crate::tool::{Dispatch, ToolContext};

use super::tracer::{AgentTracer, NoopTracer};

/// Sentinel returned when the loop ends without final text.
pub const NO_FINAL_TEXT: &str = "(no final text — increase max steps or check logs)";

/// Default step budget.
pub const DEFAULT_MAX_STEPS: usize = 12;

/// Preface inserted before replayed history.
const HISTORY_MARK: &str = "[CONVERSATION HISTORY]";

/// Prefix on the current user input when history is replayed.
const REQUEST_MARK: &str = "[CURRENT REQUEST]";

/// The outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final assistant text, or [`NO_FINAL_TEXT`] on step exhaustion.
    pub final_text: String,
    /// The full message transcript of the run.
    pub messages: Vec<Message>,
    /// Steps consumed.
    pub steps: usize,
    /// Accumulated token usage.
    pub usage: Usage,
    /// Every dispatched call paired with its payload, in dispatch order.
    pub tool_results: Vec<(ToolCall, Value)>,
    /// False when the budget ran out before a final answer.
    pub finished: bool,
}

/// The engine configuration for one agent.
pub struct Engine {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<dyn Dispatch>,
    tracer: Arc<dyn AgentTracer>,
    system: Option<String>,
    model: String,
    max_steps: usize,
    temperature: Option<f32>,
}

impl Engine {
    /// Create an engine over a provider and a tool dispatcher.
    #[must_use]
    pub fn new(provider: Arc<dyn ChatProvider>, tools: Arc<dyn Dispatch>) -> Self {
        Self {
            provider,
            tools,
            tracer: Arc::new(NoopTracer),
            system: None,
            model: String::new(),
            max_steps: DEFAULT_MAX_STEPS,
            temperature: None,
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = (!system.is_empty()).then_some(system);
        self
    }

    /// Set the model (empty selects the provider default).
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the step budget.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Attach a tracer.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn AgentTracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Build the initial message list.
    ///
    /// When history is replayed, its first user turn gets the history
    /// preface and the current input is prefixed with the request mark so
    /// the model does not answer stale questions.
    fn build_initial(&self, prompt: &str, history: &[Message]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system.clone()));
        }

        if history.is_empty() {
            messages.push(Message::user(prompt));
            return messages;
        }

        let mut marked = false;
        for msg in history {
            if !marked && msg.role == crate::message::Role::User {
                let mut annotated = msg.clone();
                annotated.content = format!("{HISTORY_MARK}\n{}", msg.content);
                messages.push(annotated);
                marked = true;
            } else {
                messages.push(msg.clone());
            }
        }
        messages.push(Message::user(format!("{REQUEST_MARK}\n{prompt}")));
        messages
    }

    /// Execute a run to completion.
    pub async fn run(
        &self,
        ctx: &ToolContext,
        prompt: &str,
        history: &[Message],
    ) -> Result<RunOutcome> {
        let span = info_span!(
            "agent",
            agent.model = %self.model,
            agent.max_steps = self.max_steps,
            agent.result_steps = tracing::field::Empty,
        );
        self.run_inner(ctx, prompt, history).instrument(span).await
    }

    async fn run_inner(
        &self,
        ctx: &ToolContext,
        prompt: &str,
        history: &[Message],
    ) -> Result<RunOutcome> {
        let mut state = RunState::init(self, prompt, history);

        for step in 1..=self.max_steps {
            ctx.cancel.check()?;
            debug!(step, "starting step");

            let request = state.build_request(self);
            let response = tokio::select! {
                () = ctx.cancel.cancelled() => Err(Error::Cancelled),
                result = self.provider.chat(&request) => result,
            }
            .map_err(|e| {
                error!(error = %e, step, "provider call failed");
                self.tracer.on_error(&e);
                e
            })?;

            state.accumulate_usage(&response);
            if self.step_done(ctx, step, response, &mut state).await? {
                tracing::Span::current().record("agent.result_steps", step);
                info!(steps = step, "agent run completed");
                return Ok(state.into_outcome(step, true));
            }
        }

        warn!(max_steps = self.max_steps, "step budget exhausted");
        Ok(state.into_outcome(self.max_steps, false))
    }

    /// Process a completed response; returns `true` when the run is done.
    ///
    /// Shared between the blocking and streaming paths.
    async fn step_done(
        &self,
        ctx: &ToolContext,
        step: usize,
        response: ChatResponse,
        state: &mut RunState,
    ) -> Result<bool> {
        self.tracer.on_assistant(&response.message);
        let calls = response.message.tool_calls().to_vec();
        state.messages.push(response.message);

        if calls.is_empty() {
            let text = state.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            self.tracer.on_final(&text);
            state.final_text = text;
            return Ok(true);
        }

        debug!(step, calls = calls.len(), "dispatching tool calls");
        for call in &calls {
            ctx.cancel.check()?;
            self.tracer.on_tool_start(call);
            let payload = self.dispatch_one(ctx, call).await?;
            self.tracer.on_tool_result(call, &payload);
            state
                .messages
                .push(Message::tool(&call.id, payload.to_string()));
            state.tool_results.push((call.clone(), payload));
        }
        Ok(false)
    }

    /// Dispatch one call, converting tool-level failures into an error
    /// payload so they never abort the loop. Cancellation and timeouts
    /// still surface.
    async fn dispatch_one(&self, ctx: &ToolContext, call: &ToolCall) -> Result<Value> {
        match self
            .tools
            .dispatch(ctx, &call.name, call.arguments.clone())
            .await
        {
            Ok(payload) => Ok(payload),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(Error::Timeout(m)) => Err(Error::Timeout(m)),
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool error injected into transcript");
                Ok(json!({"error": err.to_string()}))
            }
        }
    }

    /// Execute a run, yielding [`AgentEvent`]s as it progresses.
    ///
    /// The final event for a successful run is [`AgentEvent::Final`];
    /// failures terminate the stream with an `Err` item the adapter maps to
    /// a single error event.
    pub fn run_streamed<'a>(
        &'a self,
        ctx: &'a ToolContext,
        prompt: &'a str,
        history: &'a [Message],
    ) -> Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send + 'a>> {
        Box::pin(async_stream::try_stream! {
            let mut state = RunState::init(self, prompt, history);
            let mut done_steps = 0usize;

            'steps: for step in 1..=self.max_steps {
                ctx.cancel.check()?;
                let mut request = state.build_request(self);
                request.stream = true;

                let mut chunks = tokio::select! {
                    () = ctx.cancel.cancelled() => Err(Error::Cancelled),
                    result = self.provider.chat_stream(&request) => result,
                }?;

                let mut aggregator = StreamAggregator::new();
                loop {
                    let next = tokio::select! {
                        () = ctx.cancel.cancelled() => Err(Error::Cancelled),
                        chunk = chunks.next() => Ok(chunk),
                    }?;
                    let Some(chunk) = next else { break };
                    let chunk = chunk?;
                    if let StreamChunk::TextDelta(delta) = &chunk {
                        self.tracer.on_delta(delta);
                        yield AgentEvent::Delta { text: delta.clone() };
                    }
                    aggregator.apply(&chunk);
                }
                drop(chunks);

                let response = aggregator.into_response();
                state.accumulate_usage(&response);
                self.tracer.on_assistant(&response.message);

                let calls = response.message.tool_calls().to_vec();
                yield AgentEvent::Assistant {
                    content: response.message.content.clone(),
                    tool_calls: calls.len(),
                };
                state.messages.push(response.message);

                if calls.is_empty() {
                    let text = state
                        .messages
                        .last()
                        .map(|m| m.content.clone())
                        .unwrap_or_default();
                    self.tracer.on_final(&text);
                    yield AgentEvent::Final { text };
                    done_steps = step;
                    break 'steps;
                }

                for call in &calls {
                    ctx.cancel.check()?;
                    self.tracer.on_tool_start(call);
                    yield AgentEvent::ToolStart {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    };
                    let payload = self.dispatch_one(ctx, call).await?;
                    self.tracer.on_tool_result(call, &payload);
                    yield AgentEvent::ToolResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        payload: payload.clone(),
                    };
                    state
                        .messages
                        .push(Message::tool(&call.id, payload.to_string()));
                }
            }

            if done_steps == 0 {
                warn!(max_steps = self.max_steps, "streamed step budget exhausted");
                yield AgentEvent::Final { text: NO_FINAL_TEXT.to_owned() };
            }
        })
    }
}

/// Mutable state accumulated over one run.
struct RunState {
    messages: Vec<Message>,
    tool_results: Vec<(ToolCall, Value)>,
    specs: Vec<ToolSpec>,
    usage: Usage,
    final_text: String,
}

impl RunState {
    fn init(engine: &Engine, prompt: &str, history: &[Message]) -> Self {
        Self {
            messages: engine.build_initial(prompt, history),
            tool_results: Vec::new(),
            specs: engine.tools.specs(),
            usage: Usage::default(),
            final_text: String::new(),
        }
    }

    fn build_request(&self, engine: &Engine) -> ChatRequest {
        let mut request = ChatRequest::with_messages(&engine.model, self.messages.clone())
            .tools(self.specs.clone());
        if let Some(temperature) = engine.temperature {
            request = request.temperature(temperature);
        }
        request
    }

    fn accumulate_usage(&mut self, response: &ChatResponse) {
        if let Some(usage) = response.usage {
            self.usage += usage;
        }
    }

    fn into_outcome(self, steps: usize, finished: bool) -> RunOutcome {
        let final_text = if finished {
            self.final_text
        } else {
            NO_FINAL_TEXT.to_owned()
        };
        RunOutcome {
            final_text,
            messages: self.messages,
            steps,
            usage: self.usage,
            tool_results: self.tool_results,
            finished,
        }
    }
}
