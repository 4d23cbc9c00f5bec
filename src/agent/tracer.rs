//! Tracing hooks for agent runs.
//!
//! Hooks are invoked synchronously on the request task and must not block
//! indefinitely. The default implementations do nothing, so tracers override
//! only what they observe.

use serde_json::Value;

use crate::error::Error;
use crate::message::{Message, ToolCall};

/// Observer of one agent run.
pub trait AgentTracer: Send + Sync {
    /// A complete assistant message was appended.
    fn on_assistant(&self, message: &Message) {
        let _ = message;
    }

    /// An incremental text delta arrived (streaming runs only).
    fn on_delta(&self, delta: &str) {
        let _ = delta;
    }

    /// A tool dispatch is about to start.
    fn on_tool_start(&self, call: &ToolCall) {
        let _ = call;
    }

    /// A tool dispatch finished with the given payload.
    fn on_tool_result(&self, call: &ToolCall, payload: &Value) {
        let _ = (call, payload);
    }

    /// The run produced its final text.
    fn on_final(&self, text: &str) {
        let _ = text;
    }

    /// The run failed.
    fn on_error(&self, error: &Error) {
        let _ = error;
    }
}

/// Tracer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl AgentTracer for NoopTracer {}
