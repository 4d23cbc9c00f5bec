//! Ingestion: normalize, chunk, index, embed, graph.
//!
//! The pipeline is idempotent under its hash lookup: re-ingesting unchanged
//! content with the skip policy performs no writes, and chunk ids are
//! stable across repeat ingestion.

pub mod chunk;
pub mod normalize;
pub mod pipeline;

pub use chunk::{ChunkOptions, ChunkStrategy, split_text};
pub use normalize::{doc_hash, normalize_text};
pub use pipeline::{IngestOutcome, IngestPolicy, IngestRequest, Ingestor};
