//! OpenAI-compatible chat provider.
//!
//! Speaks the `/chat/completions` wire protocol over [`reqwest`], which
//! covers OpenAI itself plus any compatible endpoint a specialist points its
//! `base_url` at. Streaming uses SSE decoded by [`eventsource-stream`] so
//! frames split across transport chunks reassemble correctly.
//!
//! The provider holds no per-request state and is safe for concurrent use.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt as _;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::chat::{
    ChatProvider, ChatRequest, ChatResponse, ChunkStream, StopReason, ToolSpec, Usage,
};
use crate::error::{Error, Result};
use crate::message::{Message, Role, ToolCall};
use crate::stream::StreamChunk;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// An OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiProvider {
    /// Create a provider against the public OpenAI endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: Some(api_key.into()),
            default_model: "gpt-4o".to_owned(),
            extra_headers: Vec::new(),
        }
    }

    /// Create a provider against a compatible endpoint, optionally keyless.
    #[must_use]
    pub fn compatible(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            default_model: String::new(),
            extra_headers: Vec::new(),
        }
    }

    /// Set the model used when a request leaves `model` empty.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Add a header sent on every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        for (name, value) in &self.extra_headers {
            builder = builder.header(name, value);
        }
        builder
    }

    fn wire_message(message: &Message) -> Value {
        match message.role {
            Role::System | Role::User => json!({
                "role": message.role.as_str(),
                "content": message.content,
            }),
            Role::Assistant => {
                let mut wire = json!({
                    "role": "assistant",
                    "content": message.content,
                });
                if message.has_tool_calls() {
                    wire["tool_calls"] = Value::Array(
                        message
                            .tool_calls()
                            .iter()
                            .map(|call| {
                                json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.name,
                                        "arguments": call.arguments.to_string(),
                                    },
                                })
                            })
                            .collect(),
                    );
                }
                wire
            }
            Role::Tool => json!({
                "role": "tool",
                "content": message.content,
                "tool_call_id": message.tool_call_id,
            }),
        }
    }

    fn wire_tool(spec: &ToolSpec) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": spec.name,
                "description": spec.description,
                "parameters": spec.parameters,
            },
        })
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let mut body = json!({
            "model": model,
            "messages": request
                .messages
                .iter()
                .map(Self::wire_message)
                .collect::<Vec<_>>(),
        });
        if let Some(tools) = &request.tools {
            body["tools"] = Value::Array(tools.iter().map(Self::wire_tool).collect());
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    fn parse_stop_reason(reason: Option<&str>) -> StopReason {
        match reason {
            Some("length") => StopReason::Length,
            Some("tool_calls") => StopReason::ToolCalls,
            Some("stop") | None => StopReason::Stop,
            Some(_) => StopReason::Other,
        }
    }

    fn parse_response(wire: WireResponse) -> Result<ChatResponse> {
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::backend("provider returned no choices"))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments));
                ToolCall::new(call.id, call.function.name, arguments)
            })
            .collect();

        let message = Message::assistant_with_tool_calls(
            choice.message.content.unwrap_or_default(),
            tool_calls,
        );

        let mut response = ChatResponse::new(message)
            .with_stop_reason(Self::parse_stop_reason(choice.finish_reason.as_deref()));
        if let Some(usage) = wire.usage {
            response = response.with_usage(Usage::new(usage.prompt_tokens, usage.completion_tokens));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(request, false);
        let response = self.build_request(&self.chat_url()).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!("provider returned {status}: {detail}")));
        }

        let wire: WireResponse = response.json().await?;
        Self::parse_response(wire)
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let body = self.build_body(request, true);
        let response = self.build_request(&self.chat_url()).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!("provider returned {status}: {detail}")));
        }

        let mut events = response.bytes_stream().eventsource();
        Ok(Box::pin(async_stream::try_stream! {
            let mut stop_reason = StopReason::Stop;
            let mut usage: Option<Usage> = None;

            while let Some(event) = events.next().await {
                let event = event.map_err(|e| Error::backend(format!("stream error: {e}")))?;
                if event.data.trim() == "[DONE]" {
                    break;
                }
                let Ok(wire) = serde_json::from_str::<WireStreamChunk>(&event.data) else {
                    tracing::warn!(data = %event.data, "unparseable stream chunk");
                    continue;
                };

                if let Some(wire_usage) = wire.usage {
                    usage = Some(Usage::new(
                        wire_usage.prompt_tokens,
                        wire_usage.completion_tokens,
                    ));
                }

                for choice in wire.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            yield StreamChunk::TextDelta(content);
                        }
                    }
                    for call in choice.delta.tool_calls.unwrap_or_default() {
                        if let (Some(id), Some(name)) = (
                            call.id.as_ref(),
                            call.function.as_ref().and_then(|f| f.name.as_ref()),
                        ) {
                            yield StreamChunk::ToolCallStart {
                                index: call.index,
                                id: id.clone(),
                                name: name.clone(),
                            };
                        }
                        if let Some(arguments) =
                            call.function.as_ref().and_then(|f| f.arguments.as_ref())
                        {
                            if !arguments.is_empty() {
                                yield StreamChunk::ToolCallDelta {
                                    index: call.index,
                                    arguments: arguments.clone(),
                                };
                            }
                        }
                    }
                    if let Some(reason) = choice.finish_reason.as_deref() {
                        stop_reason = Self::parse_stop_reason(Some(reason));
                    }
                }
            }

            yield StreamChunk::Done { stop_reason, usage };
        }))
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
