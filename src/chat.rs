//! Chat types and the LLM provider trait.
//!
//! This module provides:
//! - [`ChatRequest`]: request parameters for chat completions
//! - [`ChatResponse`]: response from chat completions
//! - [`ChatProvider`]: the trait every LLM backend implements
//!
//! Providers must be safe for concurrent use. Cancellation is cooperative:
//! the engine races provider futures against its cancel token, and dropping
//! the future or the stream aborts the underlying request.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::message::Message;
use crate::stream::StreamChunk;

/// A tool schema exposed to the provider so it may emit tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (snake_case).
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl ToolSpec {
    /// Create a new tool spec.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of output.
    #[default]
    Stop,
    /// The model emitted tool calls.
    ToolCalls,
    /// Output was truncated at the token limit.
    Length,
    /// Provider-specific other reason.
    Other,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
}

impl Usage {
    /// Create a usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier. Empty selects the provider default.
    #[serde(default)]
    pub model: String,
    /// Conversation messages.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Tools available for the model to call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum completion tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Whether to stream the response.
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Creates a request with messages.
    #[must_use]
    pub fn with_messages(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    /// Sets tools.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        if !tools.is_empty() {
            self.tools = Some(tools);
        }
        self
    }

    /// Sets temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets max completion tokens.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Enables streaming.
    #[must_use]
    pub const fn stream(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// A chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The generated assistant message.
    pub message: Message,
    /// Why the model stopped.
    #[serde(default)]
    pub stop_reason: StopReason,
    /// Token usage, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Creates a new response around a message.
    #[must_use]
    pub const fn new(message: Message) -> Self {
        Self {
            message,
            stop_reason: StopReason::Stop,
            usage: None,
        }
    }

    /// Creates a plain-text assistant response.
    #[must_use]
    pub fn from_text(content: impl Into<String>) -> Self {
        Self::new(Message::assistant(content))
    }

    /// Sets the stop reason.
    #[must_use]
    pub const fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.stop_reason = reason;
        self
    }

    /// Sets usage statistics.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Returns `true` if the response contains tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.message.has_tool_calls()
    }
}

/// Generate a JSON Schema from a Rust type that implements
/// [`schemars::JsonSchema`].
///
/// Returns `(name, schema)` where `name` derives from the type name and the
/// `$schema` meta field is removed (providers do not need it). This is the
/// single source of truth for schema generation used by tool argument
/// structs.
#[must_use]
pub fn generate_json_schema<T: schemars::JsonSchema>() -> (String, Value) {
    let root = schemars::schema_for!(T);
    let mut schema_value = serde_json::to_value(&root).unwrap_or_default();

    if let Value::Object(ref mut map) = schema_value {
        map.remove("$schema");
    }

    let name = <T as schemars::JsonSchema>::schema_name();
    (name.into_owned(), schema_value)
}

/// A stream of chunks from a streaming completion.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Trait for providers that support chat completions.
///
/// The engine calls [`chat`](ChatProvider::chat) in blocking mode and
/// [`chat_stream`](ChatProvider::chat_stream) in streaming mode. A streaming
/// provider must surface the assistant's final tool-call list once the
/// stream closes (see [`StreamChunk::Done`] and the aggregator).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a chat completion request and receive the complete response.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Send a chat completion request and receive a stream of chunks.
    ///
    /// The default implementation reports streaming as unsupported;
    /// backends override it when they can deliver incremental output.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let _ = request;
        Err(Error::backend("provider does not support streaming"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_fields() {
        let req = ChatRequest::with_messages("m", vec![Message::user("hi")])
            .temperature(0.2)
            .max_tokens(64)
            .stream();
        assert_eq!(req.model, "m");
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.temperature, Some(0.2));
        assert_eq!(req.max_tokens, Some(64));
        assert!(req.stream);
    }

    #[test]
    fn empty_tool_list_stays_absent() {
        let req = ChatRequest::default().tools(vec![]);
        assert!(req.tools.is_none());
    }

    #[test]
    fn schema_generation_strips_meta_field() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct Args {
            text: String,
            count: Option<u32>,
        }

        let (name, schema) = generate_json_schema::<Args>();
        assert_eq!(name, "Args");
        assert!(schema.get("$schema").is_none());
        assert_eq!(schema["type"], "object");
        assert!(schema["properties"].get("text").is_some());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total += Usage::new(10, 5);
        total += Usage::new(1, 2);
        assert_eq!(total, Usage::new(11, 7));
    }
}
