//! LLM provider backends.
//!
//! Every backend implements [`crate::chat::ChatProvider`]. The OpenAI
//!-compatible provider covers any endpoint speaking that wire protocol;
//! the mock provider returns scripted responses for tests.

pub mod mock;
pub mod openai;

pub use mock::MockProvider;
pub use openai::OpenAiProvider;
