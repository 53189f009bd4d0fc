//! Generation with a hard timeout and bounded retries.

use super::{clean_output, GenerationRequest, LanguageModel};
use crate::config::LlmSettings;
use crate::error::{BuddyError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Sends prompts to a [`LanguageModel`].
///
/// Each attempt is bounded by `timeout`. Transient failures are retried up to
/// `max_retries` times; rejections are returned at once.
#[derive(Clone)]
pub struct GenerationClient {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
    max_tokens: u32,
    temperature: f32,
}

impl GenerationClient {
    pub fn new(model: Arc<dyn LanguageModel>, settings: &LlmSettings) -> Self {
        Self {
            model,
            timeout: Duration::from_secs(settings.timeout_seconds),
            max_retries: settings.max_retries,
            backoff: Duration::from_millis(settings.retry_backoff_ms),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Generate and clean a response for `prompt`.
    #[instrument(skip(self, prompt), fields(prompt_chars = prompt.len()))]
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, self.model.generate(&request)).await {
                Ok(Ok(raw)) => {
                    let cleaned = clean_output(&raw);
                    if cleaned.is_empty() {
                        Err(BuddyError::GenerationUnavailable("model returned no text".into()))
                    } else {
                        Ok(cleaned)
                    }
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(BuddyError::GenerationTimeout(self.timeout.as_secs())),
            };

            match outcome {
                Ok(text) => {
                    debug!(attempt, "Generation succeeded");
                    return Ok(text);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(attempt, max = self.max_retries, "Generation failed, retrying: {}", e);
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    warn!("Generation failed: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
