//! Streaming chunks, aggregation, and UI-facing events.
//!
//! This module provides:
//! - [`StreamChunk`]: incremental pieces of a streaming completion
//! - [`StreamAggregator`]: folds chunks into one assistant message
//! - [`AgentEvent`]: the tagged event variants multiplexed to UIs
//!
//! Ordering guarantee: the engine emits all deltas for step N before any
//! tool-start event for step N, tool-start before tool-result, and
//! tool-result before any delta of step N + 1.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::{ChatResponse, StopReason, Usage};
use crate::message::{Message, ToolCall};

/// An incremental piece of a streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Incremental text content.
    TextDelta(String),
    /// A tool call started; id and name are known.
    ToolCallStart {
        /// Position of the call in the assistant turn.
        index: usize,
        /// Opaque call id.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A fragment of a tool call's serialized arguments.
    ToolCallDelta {
        /// Position of the call in the assistant turn.
        index: usize,
        /// Raw JSON fragment to append.
        arguments: String,
    },
    /// The stream closed.
    Done {
        /// Final stop reason.
        stop_reason: StopReason,
        /// Usage, when the provider reports it in the terminal frame.
        usage: Option<Usage>,
    },
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds [`StreamChunk`]s into a complete [`ChatResponse`].
///
/// Tool calls are keyed by index so interleaved fragments reassemble in the
/// order the model emitted them.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    content: String,
    calls: BTreeMap<usize, PartialCall>,
    stop_reason: StopReason,
    usage: Option<Usage>,
}

impl StreamAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one chunk.
    pub fn apply(&mut self, chunk: &StreamChunk) {
        match chunk {
            StreamChunk::TextDelta(delta) => self.content.push_str(delta),
            StreamChunk::ToolCallStart { index, id, name } => {
                let entry = self.calls.entry(*index).or_default();
                entry.id.clone_from(id);
                entry.name.clone_from(name);
            }
            StreamChunk::ToolCallDelta { index, arguments } => {
                self.calls
                    .entry(*index)
                    .or_default()
                    .arguments
                    .push_str(arguments);
            }
            StreamChunk::Done { stop_reason, usage } => {
                self.stop_reason = *stop_reason;
                if usage.is_some() {
                    self.usage = *usage;
                }
            }
        }
    }

    /// Consume the aggregator, producing the reconstructed response.
    ///
    /// Argument fragments that fail to parse as JSON are preserved as raw
    /// strings so the dispatch layer can report the malformed input.
    #[must_use]
    pub fn into_response(self) -> ChatResponse {
        let tool_calls: Vec<ToolCall> = self
            .calls
            .into_values()
            .map(|partial| {
                let arguments = if partial.arguments.is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&partial.arguments)
                        .unwrap_or(Value::String(partial.arguments))
                };
                ToolCall::new(partial.id, partial.name, arguments)
            })
            .collect();

        let stop_reason = if tool_calls.is_empty() {
            self.stop_reason
        } else {
            StopReason::ToolCalls
        };

        let mut response =
            ChatResponse::new(Message::assistant_with_tool_calls(self.content, tool_calls))
                .with_stop_reason(stop_reason);
        if let Some(usage) = self.usage {
            response = response.with_usage(usage);
        }
        response
    }
}

/// Events emitted during an agent run, multiplexed to UIs by tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant text.
    Delta {
        /// The text fragment.
        text: String,
    },
    /// A tool dispatch is starting.
    ToolStart {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
        /// Arguments passed to the tool.
        args: Value,
    },
    /// A tool dispatch finished.
    ToolResult {
        /// Call id.
        id: String,
        /// Tool name.
        name: String,
        /// Result payload or `{"error": …}`.
        payload: Value,
    },
    /// A complete assistant message was appended.
    Assistant {
        /// Text content of the assistant turn.
        content: String,
        /// Number of tool calls it carried.
        tool_calls: usize,
    },
    /// The run produced its final text.
    Final {
        /// Final output.
        text: String,
    },
    /// The run failed.
    Error {
        /// Stable error kind.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aggregates_text_only_stream() {
        let mut agg = StreamAggregator::new();
        agg.apply(&StreamChunk::TextDelta("Hel".into()));
        agg.apply(&StreamChunk::TextDelta("lo".into()));
        agg.apply(&StreamChunk::Done {
            stop_reason: StopReason::Stop,
            usage: Some(Usage::new(3, 2)),
        });

        let response = agg.into_response();
        assert_eq!(response.message.content, "Hello");
        assert!(!response.has_tool_calls());
        assert_eq!(response.stop_reason, StopReason::Stop);
        assert_eq!(response.usage, Some(Usage::new(3, 2)));
    }

    #[test]
    fn reassembles_interleaved_tool_calls() {
        let mut agg = StreamAggregator::new();
        agg.apply(&StreamChunk::ToolCallStart {
            index: 0,
            id: "c1".into(),
            name: "upper".into(),
        });
        agg.apply(&StreamChunk::ToolCallStart {
            index: 1,
            id: "c2".into(),
            name: "lower".into(),
        });
        agg.apply(&StreamChunk::ToolCallDelta {
            index: 1,
            arguments: r#"{"text":"#.into(),
        });
        agg.apply(&StreamChunk::ToolCallDelta {
            index: 0,
            arguments: r#"{"text":"a"}"#.into(),
        });
        agg.apply(&StreamChunk::ToolCallDelta {
            index: 1,
            arguments: r#""B"}"#.into(),
        });
        agg.apply(&StreamChunk::Done {
            stop_reason: StopReason::Stop,
            usage: None,
        });

        let response = agg.into_response();
        let calls = response.message.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].arguments, json!({"text": "a"}));
        assert_eq!(calls[1].id, "c2");
        assert_eq!(calls[1].arguments, json!({"text": "B"}));
        assert_eq!(response.stop_reason, StopReason::ToolCalls);
    }

    #[test]
    fn malformed_arguments_survive_as_raw_string() {
        let mut agg = StreamAggregator::new();
        agg.apply(&StreamChunk::ToolCallStart {
            index: 0,
            id: "c1".into(),
            name: "upper".into(),
        });
        agg.apply(&StreamChunk::ToolCallDelta {
            index: 0,
            arguments: "{broken".into(),
        });

        let response = agg.into_response();
        assert_eq!(
            response.message.tool_calls()[0].arguments,
            Value::String("{broken".into())
        );
    }

    #[test]
    fn agent_event_serializes_with_type_tag() {
        let event = AgentEvent::Delta { text: "hi".into() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "delta");
        assert_eq!(value["text"], "hi");
    }
}
