//! OpenAI-compatible chat completion backend.

use super::{GenerationRequest, LanguageModel};
use crate::config::LlmSettings;
use crate::error::{BuddyError, Result};
use crate::openai::create_client;
use async_openai::error::OpenAIError;
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs};
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Chat completions against an OpenAI-compatible server.
pub struct OpenAICompatibleModel {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    timeout_seconds: u64,
}

impl OpenAICompatibleModel {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        Ok(Self {
            client: create_client(settings)?,
            model: settings.model.clone(),
            timeout_seconds: settings.timeout_seconds,
        })
    }

    fn map_error(&self, error: OpenAIError) -> BuddyError {
        match error {
            OpenAIError::Reqwest(e) if e.is_timeout() => {
                BuddyError::GenerationTimeout(self.timeout_seconds)
            }
            OpenAIError::Reqwest(e) => BuddyError::GenerationUnavailable(e.to_string()),
            OpenAIError::ApiError(api) => {
                let server_side = api
                    .r#type
                    .as_deref()
                    .is_some_and(|t| t.contains("server") || t.contains("unavailable"));
                if server_side {
                    BuddyError::GenerationUnavailable(api.message)
                } else {
                    BuddyError::GenerationRejected(api.message)
                }
            }
            OpenAIError::InvalidArgument(msg) => BuddyError::GenerationRejected(msg),
            other => BuddyError::GenerationUnavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAICompatibleModel {
    #[instrument(skip(self, request), fields(model = %self.model, prompt_chars = request.prompt.len()))]
    #[allow(deprecated)]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestUserMessageArgs::default()
                .content(request.prompt.clone())
                .build()
                .map_err(|e| BuddyError::GenerationRejected(e.to_string()))?
                .into()];

        let completion = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build()
            .map_err(|e| BuddyError::GenerationRejected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(completion)
            .await
            .map_err(|e| self.map_error(e))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| BuddyError::GenerationUnavailable("Empty response from model".into()))?;

        debug!("Generated {} chars", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn model() -> OpenAICompatibleModel {
        OpenAICompatibleModel::new(&LlmSettings::default()).unwrap()
    }

    #[test]
    fn test_api_errors_are_rejections() {
        let err = model().map_error(OpenAIError::ApiError(ApiError {
            message: "model 'nope' not found".into(),
            r#type: Some("invalid_request_error".into()),
            param: None,
            code: None,
        }));
        assert!(matches!(err, BuddyError::GenerationRejected(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = model().map_error(OpenAIError::ApiError(ApiError {
            message: "overloaded".into(),
            r#type: Some("server_error".into()),
            param: None,
            code: None,
        }));
        assert!(err.is_transient());
    }
}
