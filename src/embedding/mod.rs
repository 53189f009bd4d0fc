//! Embedding generation for semantic search and answer grading.

mod hashing;
mod openai;
mod retry;

pub use hashing::HashingEmbedder;
pub use openai::OpenAIEmbedder;
pub use retry::RetryingEmbedder;

use crate::config::{EmbeddingProvider, EmbeddingSettings, LlmSettings};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Trait for embedding generation.
///
/// Implementations must return the same vector for the same text and model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimensions.
    fn dimensions(&self) -> usize;
}

/// Build the configured embedder, wrapped with retry and backoff.
pub fn create_embedder(
    settings: &EmbeddingSettings,
    llm: &LlmSettings,
) -> Result<Arc<dyn Embedder>> {
    let inner: Arc<dyn Embedder> = match settings.provider {
        EmbeddingProvider::OpenAI => Arc::new(OpenAIEmbedder::with_config(
            llm,
            &settings.model,
            settings.dimensions as usize,
        )?),
        EmbeddingProvider::Hashing => {
            Arc::new(HashingEmbedder::new(settings.dimensions as usize))
        }
    };

    Ok(Arc::new(RetryingEmbedder::new(
        inner,
        settings.max_attempts,
        Duration::from_millis(settings.retry_base_ms),
    )))
}
