//! Embedding providers.
//!
//! The trait mirrors the chat provider split: an OpenAI-compatible HTTP
//! implementation for production and a deterministic mock for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};

/// Produces embeddings for batches of texts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Declared embedding dimension.
    fn dimensions(&self) -> usize;

    /// Embed a batch; one vector per input text, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible `/embeddings` backend.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbeddings {
    /// Create a provider against a compatible endpoint.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            dimensions,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireEmbeddings {
    data: Vec<WireEmbedding>,
}

#[derive(Debug, Deserialize)]
struct WireEmbedding {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!("embeddings returned {status}: {detail}")));
        }

        let wire: WireEmbeddings = response.json().await?;
        let vectors: Vec<Vec<f32>> = wire.data.into_iter().map(|e| e.embedding).collect();
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(Error::invalid(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    vector.len()
                )));
            }
        }
        Ok(vectors)
    }
}

/// Deterministic embeddings for tests.
///
/// Unknown texts hash to a stable pseudo-vector; specific texts can be
/// pinned to exact vectors with [`MockEmbeddings::pin`].
#[derive(Debug, Default)]
pub struct MockEmbeddings {
    dimensions: usize,
    pinned: HashMap<String, Vec<f32>>,
}

impl MockEmbeddings {
    /// Create a mock of the given dimension.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            pinned: HashMap::new(),
        }
    }

    /// Pin a text to an exact vector.
    #[must_use]
    pub fn pin(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.pinned.insert(text.into(), vector);
        self
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(0x0000_0100_0000_01b3);
        }
        (0..self.dimensions)
            .map(|i| {
                let mixed = state.rotate_left((i % 63) as u32);
                ((mixed % 1000) as f32 / 500.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                self.pinned
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.hash_vector(text))
            })
            .collect())
    }
}
