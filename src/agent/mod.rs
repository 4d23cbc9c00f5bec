//! The agent engine: a bounded model and tool state machine.
//!
//! The [`Engine`](engine::Engine) drives a provider through its reasoning
//! loop:
//!
//! 1. Build messages from the system prompt, prior history, and user input
//! 2. Call the LLM with the registry's tool schemas
//! 3. Append the assistant message
//! 4. Dispatch tool calls in emission order, appending paired tool messages
//! 5. Loop until the model returns no tool calls or the step budget runs out

pub mod engine;
pub mod tracer;

pub use engine::{Engine, RunOutcome, NO_FINAL_TEXT};
pub use tracer::{AgentTracer, NoopTracer};
