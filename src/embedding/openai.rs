//! OpenAI-compatible embeddings implementation.

use super::Embedder;
use crate::config::LlmSettings;
use crate::error::{BuddyError, Result};
use crate::openai::create_client;
use async_openai::error::OpenAIError;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEmbedder {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbedder {
    /// Create an embedder against the configured model server.
    pub fn with_config(llm: &LlmSettings, model: &str, dimensions: usize) -> Result<Self> {
        Ok(Self {
            client: create_client(llm)?,
            model: model.to_string(),
            dimensions,
        })
    }
}

/// Transport failures are retryable; anything the server answered is not.
fn map_error(error: OpenAIError) -> BuddyError {
    match error {
        OpenAIError::Reqwest(e) => BuddyError::EmbeddingService(e.to_string()),
        OpenAIError::JSONDeserialize(e) => {
            BuddyError::EmbeddingService(format!("malformed response: {}", e))
        }
        other => BuddyError::Embedding(other.to_string()),
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[instrument(skip(self, text))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| BuddyError::Embedding("Empty embedding response".to_string()))
    }

    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        const BATCH_SIZE: usize = 64;
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(EmbeddingInput::StringArray(chunk.to_vec()))
                .build()
                .map_err(|e| BuddyError::Embedding(format!("Failed to build request: {}", e)))?;

            let response = self
                .client
                .embeddings()
                .create(request)
                .await
                .map_err(map_error)?;

            if response.data.len() != chunk.len() {
                return Err(BuddyError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    response.data.len()
                )));
            }

            // Sort by index to ensure correct order
            let mut embeddings: Vec<_> = response.data.into_iter().collect();
            embeddings.sort_by_key(|e| e.index);

            for embedding_data in embeddings {
                if embedding_data.embedding.len() != self.dimensions {
                    return Err(BuddyError::Embedding(format!(
                        "model {} returned {} dimensions, configured {}",
                        self.model,
                        embedding_data.embedding.len(),
                        self.dimensions
                    )));
                }
                all_embeddings.push(embedding_data.embedding);
            }
        }

        debug!("Generated {} embeddings", all_embeddings.len());
        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_creation() {
        let embedder =
            OpenAIEmbedder::with_config(&LlmSettings::default(), "all-minilm", 384).unwrap();
        assert_eq!(embedder.dimensions(), 384);

        let embedder =
            OpenAIEmbedder::with_config(&LlmSettings::default(), "nomic-embed-text", 768).unwrap();
        assert_eq!(embedder.dimensions(), 768);
    }

    #[test]
    fn test_invalid_argument_is_not_retryable() {
        let err = map_error(OpenAIError::InvalidArgument("bad".into()));
        assert!(!err.is_transient());
    }
}
