//! Tool interface and request context.
//!
//! Tools expose a small object-safe surface: a name, a description, a JSON
//! Schema for their arguments, and an async `call`. Dispatch goes by name
//! through the [`registry`]; meta-tools hold an explicit reference to the
//! registry they dispatch into rather than reaching for globals.

pub mod parallel;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::chat::ToolSpec;
use crate::delegate::CallScope;
use crate::error::Result;
use crate::sandbox::Sandbox;

pub use parallel::ParallelTool;
pub use registry::{Dispatch, DispatchEvent, DispatchObserver, RecordingRegistry, ToolRegistry};

/// Request-scoped context passed to every tool call.
///
/// Carries the sandbox base, identity, the auth cookie forwarded verbatim on
/// delegation, and the call scope used to cap recursion depth.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Caller identity, when authenticated.
    pub user_id: Option<String>,
    /// Active project id.
    pub project_id: Option<String>,
    /// Session the call belongs to.
    pub session_id: Option<String>,
    /// Sandbox base; `None` fails filesystem tools closed.
    pub sandbox: Option<Sandbox>,
    /// Opaque auth cookie from the outer request.
    pub auth_cookie: Option<String>,
    /// Model override for provider-backed tools.
    pub model_override: Option<String>,
    /// Delegation scope (call id, parent, depth).
    pub scope: CallScope,
    /// Cancellation token for the request.
    pub cancel: CancelToken,
}

impl ToolContext {
    /// Context for a fresh top-level request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The sandbox, or an invalid-argument error when none is attached.
    pub fn sandbox(&self) -> Result<&Sandbox> {
        self.sandbox
            .as_ref()
            .ok_or_else(|| crate::error::Error::invalid("no sandbox attached to this request"))
    }
}

/// An invocable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Description exposed to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn schema(&self) -> Value;

    /// Execute the tool.
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value>;

    /// The spec advertised to providers.
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.schema())
    }
}
