//! Concurrency-safe tool registry and the recording decorator.
//!
//! The registry is a read-mostly map from tool name to tool, guarded by a
//! reader-writer lock. Guards are never held across await points: dispatch
//! clones the `Arc` under the read lock and releases it before calling.
//!
//! [`RecordingRegistry`] wraps any dispatcher and emits a
//! [`DispatchEvent`] per call without changing behavior; this is how UI and
//! trace layers observe tool activity.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::chat::ToolSpec;
use crate::error::{Error, Result};

use super::{Tool, ToolContext};

/// Anything the engine can dispatch tool calls through.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Tool specs advertised to the provider.
    fn specs(&self) -> Vec<ToolSpec>;

    /// Invoke a tool by name with raw JSON arguments.
    async fn dispatch(&self, ctx: &ToolContext, name: &str, args: Value) -> Result<Value>;
}

/// Name-to-tool map with capability-scoped views.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_owned();
        self.tools
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name, tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// True when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new registry holding only the allowlisted tools, sharing the same
    /// tool instances.
    #[must_use]
    pub fn view(&self, allow: &[String]) -> Self {
        let guard = self
            .tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let filtered: HashMap<String, Arc<dyn Tool>> = guard
            .iter()
            .filter(|(name, _)| allow.iter().any(|a| a == *name))
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        Self {
            tools: RwLock::new(filtered),
        }
    }
}

#[async_trait]
impl Dispatch for ToolRegistry {
    fn specs(&self) -> Vec<ToolSpec> {
        let guard = self
            .tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut specs: Vec<ToolSpec> = guard.values().map(|tool| tool.spec()).collect();
        drop(guard);
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    async fn dispatch(&self, ctx: &ToolContext, name: &str, args: Value) -> Result<Value> {
        ctx.cancel.check()?;
        let Some(tool) = self.get(name) else {
            return Err(Error::not_found(format!("tool '{name}'")));
        };
        debug!(tool = name, "dispatching tool");
        match tool.call(ctx, args).await {
            Ok(payload) => Ok(payload),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(Error::Timeout(m)) => Err(Error::Timeout(m)),
            Err(err) => {
                warn!(tool = name, error = %err, "tool failed");
                Err(Error::tool_failed(name, err.to_string()))
            }
        }
    }
}

/// One observed dispatch.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    /// Tool name.
    pub name: String,
    /// Arguments as received.
    pub args: Value,
    /// Payload on success.
    pub payload: Option<Value>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Wall-clock duration of the call.
    pub duration: Duration,
}

/// Receives dispatch events from a [`RecordingRegistry`].
pub trait DispatchObserver: Send + Sync {
    /// Called after every dispatch, success or failure. Must not block
    /// indefinitely; it runs on the request task.
    fn on_dispatch(&self, event: &DispatchEvent);
}

/// Transparent decorator that records dispatches.
pub struct RecordingRegistry {
    inner: Arc<dyn Dispatch>,
    observer: Arc<dyn DispatchObserver>,
}

impl RecordingRegistry {
    /// Wrap `inner`, sending an event per dispatch to `observer`.
    #[must_use]
    pub fn new(inner: Arc<dyn Dispatch>, observer: Arc<dyn DispatchObserver>) -> Self {
        Self { inner, observer }
    }
}

#[async_trait]
impl Dispatch for RecordingRegistry {
    fn specs(&self) -> Vec<ToolSpec> {
        self.inner.specs()
    }

    async fn dispatch(&self, ctx: &ToolContext, name: &str, args: Value) -> Result<Value> {
        let started = Instant::now();
        let result = self.inner.dispatch(ctx, name, args.clone()).await;
        let event = DispatchEvent {
            name: name.to_owned(),
            args,
            payload: result.as_ref().ok().cloned(),
            error: result.as_ref().err().map(ToString::to_string),
            duration: started.elapsed(),
        };
        self.observer.on_dispatch(&event);
        result
    }
}
