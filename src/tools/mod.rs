//! Built-in tools.
//!
//! Filesystem tools operate strictly through the request sandbox; the CLI
//! tool applies the binary policy; web tools are enabled by configuration;
//! retrieval and delegation tools wrap the corresponding subsystems.

pub mod delegate;
pub mod evolve;
pub mod exec;
pub mod fs;
pub mod retrieve;
pub mod web;

pub use delegate::{AskAgentTool, DelegateToTeamTool};
pub use evolve::EvolveCodeTool;
pub use exec::RunCliTool;
pub use fs::{FileDeleteTool, FilePatchTool, FileReadTool, FileWriteTool, ListDirTool};
pub use retrieve::HybridRetrievalTool;
pub use web::{WebFetchTool, WebSearchTool};
