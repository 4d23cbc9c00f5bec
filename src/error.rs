//! Error types for the ensemble runtime.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! form the wire-level taxonomy consumed by HTTP adapters: each maps to a
//! stable kind string via [`Error::kind`].

use thiserror::Error as ThisError;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy for runtime operations.
///
/// `ToolFailed` is special: the agent loop recovers from it locally by
/// injecting an error payload into the next tool message. All other kinds
/// surface to the caller.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Entity exists but the caller lacks ownership.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Optimistic-lock check failed on a project update.
    #[error("revision conflict: stored revision {stored}, caller supplied {given}")]
    RevisionConflict {
        /// Revision currently persisted.
        stored: i64,
        /// Revision supplied by the caller.
        given: i64,
    },

    /// Malformed input, empty required field, or a path outside the sandbox.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Context deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The request was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// Store or provider I/O failure.
    #[error("backend unavailable: {0}")]
    Backend(String),

    /// A tool produced a failure payload. Never aborts the agent loop.
    #[error("tool '{tool}' failed: {message}")]
    ToolFailed {
        /// Name of the failing tool.
        tool: String,
        /// Failure description.
        message: String,
    },

    /// Workflow authenticator returned `ok = false`.
    #[error("auth required: {0}")]
    AuthRequired(String),

    /// The agent loop exhausted its step budget.
    #[error("reached maximum steps ({0})")]
    MaxSteps(usize),
}

impl Error {
    /// Stable kind string used by wire adapters.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::RevisionConflict { .. } => "revision_conflict",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::Backend(_) => "backend_unavailable",
            Self::ToolFailed { .. } => "tool_failed",
            Self::AuthRequired(_) => "auth_required",
            Self::MaxSteps(_) => "max_steps",
        }
    }

    /// Create a new not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a new forbidden error.
    #[must_use]
    pub fn forbidden(what: impl Into<String>) -> Self {
        Self::Forbidden(what.into())
    }

    /// Create a new invalid-argument error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a new backend error.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create a new tool-failed error.
    #[must_use]
    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    #[must_use]
    pub fn timeout(what: impl Into<String>) -> Self {
        Self::Timeout(what.into())
    }

    /// True when the error should be retried against another backend replica.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("malformed JSON: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}
