//! OpenAI-compatible client configuration.
//!
//! The language model and embedding backends are reached through an
//! OpenAI-compatible API, which local servers such as Ollama expose under `/v1`.

use crate::config::LlmSettings;
use crate::error::{BuddyError, Result};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Create a client for the configured model server.
///
/// The HTTP timeout is a backstop; callers enforce their own per-call timeout.
pub fn create_client(settings: &LlmSettings) -> Result<Client<OpenAIConfig>> {
    create_client_with_timeout(
        &settings.base_url,
        settings.api_key.as_deref(),
        Duration::from_secs(settings.timeout_seconds.saturating_mul(2).max(1)),
    )
}

/// Create a client with a custom base URL and timeout.
pub fn create_client_with_timeout(
    base_url: &str,
    api_key: Option<&str>,
    timeout: Duration,
) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BuddyError::Config(format!("Failed to create HTTP client: {}", e)))?;

    // Local servers ignore the key, but the client always sends one.
    let config = OpenAIConfig::new()
        .with_api_base(base_url.trim_end_matches('/'))
        .with_api_key(api_key.unwrap_or("ollama"));

    Ok(Client::with_config(config).with_http_client(http_client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let settings = LlmSettings::default();
        assert!(create_client(&settings).is_ok());
    }
}
