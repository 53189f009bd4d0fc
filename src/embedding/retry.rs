//! Retry with exponential backoff for transient embedding failures.

use super::Embedder;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Wraps an embedder and retries calls that fail with a transient error.
pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryingEmbedder {
    /// `max_attempts` counts the first call; values below 1 are treated as 1.
    pub fn new(inner: Arc<dyn Embedder>, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut attempt = 1;
        loop {
            match self.inner.embed(text).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, ?delay, "Embedding failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 1;
        loop {
            match self.inner.embed_batch(texts).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(attempt, ?delay, "Batch embedding failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}
