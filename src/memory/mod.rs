//! Agent memory: short-term ring and long-term evolving store.
//!
//! The ring keeps the last N step/observation pairs for one session. The
//! evolving store persists per-`(user, session)` trace summaries; its save
//! replaces the whole slice in a single transaction so readers observe
//! either the old set or the new set, never a mix.

pub mod evolving;
pub mod ring;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use evolving::{EvolvingMemoryEntry, EvolvingMemoryStore, MemoryEvolvingStore, SqliteEvolvingStore};
pub use ring::RingMemory;

/// One tool invocation as remembered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Tool name.
    pub tool: String,
    /// Arguments it was called with.
    pub args: Value,
}

/// The outcome of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Output payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A step paired with its observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// The step taken.
    pub step: Step,
    /// What came back.
    pub observation: Observation,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}

impl MemoryItem {
    /// Record a successful step.
    #[must_use]
    pub fn ok(tool: impl Into<String>, args: Value, output: Value) -> Self {
        Self {
            step: Step {
                tool: tool.into(),
                args,
            },
            observation: Observation {
                output: Some(output),
                error: None,
            },
            created_at: Utc::now(),
        }
    }

    /// Record a failed step.
    #[must_use]
    pub fn err(tool: impl Into<String>, args: Value, error: impl Into<String>) -> Self {
        Self {
            step: Step {
                tool: tool.into(),
                args,
            },
            observation: Observation {
                output: None,
                error: Some(error.into()),
            },
            created_at: Utc::now(),
        }
    }
}
