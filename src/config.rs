//! Runtime configuration.
//!
//! [`RuntimeConfig`] enumerates every knob the core consumes. Backends are
//! selected per store family; the vector store declares its geometry at
//! construction and rejects mismatched dimensions afterwards.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which backend implementation a store family uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process maps, lost on exit.
    #[default]
    Memory,
    /// Durable SQLite database.
    Sqlite,
    /// Pick sqlite when a database path is configured, memory otherwise.
    Auto,
    /// Backend disabled; operations against it contribute nothing.
    None,
}

impl BackendKind {
    /// Resolve `Auto` against the presence of a database path.
    #[must_use]
    pub fn resolve(self, has_db_path: bool) -> Self {
        match self {
            Self::Auto if has_db_path => Self::Sqlite,
            Self::Auto => Self::Memory,
            other => other,
        }
    }
}

/// Distance metric for vector similarity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorMetric {
    /// Cosine similarity.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
    /// Inner product.
    Ip,
    /// Manhattan distance.
    Manhattan,
}

/// Vector store geometry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Declared vector dimension; mismatching upserts are rejected.
    pub dimensions: usize,
    /// Similarity metric.
    #[serde(default)]
    pub metric: VectorMetric,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimensions: 1536,
            metric: VectorMetric::Cosine,
        }
    }
}

/// Embedding endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model identifier.
    pub model: String,
    /// Expected embedding dimension.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_owned(),
            dimensions: 1536,
        }
    }
}

/// Per-family backend selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    /// Full-text search backend.
    #[serde(default)]
    pub search: BackendKind,
    /// Vector similarity backend.
    #[serde(default)]
    pub vector: BackendKind,
    /// Graph backend.
    #[serde(default)]
    pub graph: BackendKind,
    /// Chat / session / project store backend.
    #[serde(default)]
    pub chat: BackendKind,
    /// SQLite database path shared by sqlite-backed families.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root of the sandboxed filesystem. Project bases resolve under
    /// `workdir/users/<user_id>/projects/<project_id>`.
    pub workdir: PathBuf,
    /// Default model when unset on a specialist.
    pub default_model: String,
    /// Store backend selection.
    #[serde(default)]
    pub db: DbConfig,
    /// Vector store geometry.
    #[serde(default)]
    pub vector: VectorConfig,
    /// Embedding endpoint.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// SearXNG instance backing the web-search tool; unset disables it.
    #[serde(default)]
    pub searxng_url: Option<String>,
    /// Kafka brokers. When non-empty a send tool may be registered by an
    /// external producer adapter; the core only parses the knob.
    #[serde(default)]
    pub kafka_brokers: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("./workdir"),
            default_model: "gpt-4o".to_owned(),
            db: DbConfig::default(),
            vector: VectorConfig::default(),
            embedding: EmbeddingConfig::default(),
            searxng_url: None,
            kafka_brokers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_resolves_by_db_path() {
        assert_eq!(BackendKind::Auto.resolve(true), BackendKind::Sqlite);
        assert_eq!(BackendKind::Auto.resolve(false), BackendKind::Memory);
        assert_eq!(BackendKind::None.resolve(true), BackendKind::None);
        assert_eq!(BackendKind::Memory.resolve(true), BackendKind::Memory);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"workdir": "/tmp/w", "default_model": "m"}"#).unwrap();
        assert_eq!(cfg.vector.dimensions, 1536);
        assert_eq!(cfg.vector.metric, VectorMetric::Cosine);
        assert!(cfg.searxng_url.is_none());
        assert!(cfg.kafka_brokers.is_empty());
    }
}
