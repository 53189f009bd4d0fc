//! Language model access.
//!
//! [`LanguageModel`] is the raw backend boundary. [`GenerationClient`] adds
//! the per-call timeout, bounded retries and output cleaning that every
//! caller relies on.

mod client;
mod openai;

pub use client::GenerationClient;
pub use openai::OpenAICompatibleModel;

use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A text generation backend.
///
/// Errors must be classified: [`crate::error::BuddyError::GenerationTimeout`]
/// and [`crate::error::BuddyError::GenerationUnavailable`] are retried,
/// [`crate::error::BuddyError::GenerationRejected`] is not.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>|<thinking>.*?</thinking>").unwrap());
static UNCLOSED_THINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think(ing)?>.*$").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());

/// Strip reasoning blocks and collapse whitespace.
pub fn clean_output(text: &str) -> String {
    let text = THINK_BLOCK.replace_all(text, "");
    let text = UNCLOSED_THINK.replace_all(&text, "");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    let text = SPACES.replace_all(&text, " ");
    text.trim().to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted language model for orchestrator tests.

    use super::*;
    use crate::error::BuddyError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) enum Step {
        Reply(String),
        Fail(BuddyError),
        /// Sleep, then reply. Used to trip the client timeout.
        Stall(Duration, String),
    }

    /// Plays back steps in order; repeats `fallback` once they run out.
    pub(crate) struct ScriptedModel {
        steps: Mutex<VecDeque<Step>>,
        fallback: Option<String>,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                fallback: None,
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn always(reply: impl Into<String>) -> Self {
            Self {
                steps: Mutex::new(VecDeque::new()),
                fallback: Some(reply.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub(crate) fn last_prompt(&self) -> Option<String> {
            self.prompts.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(text)) => Ok(text),
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Stall(delay, text)) => {
                    tokio::time::sleep(delay).await;
                    Ok(text)
                }
                None => self
                    .fallback
                    .clone()
                    .ok_or_else(|| BuddyError::GenerationUnavailable("script exhausted".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_output_strips_reasoning() {
        let raw = "<think>\nThe user wants a quiz.\n</think>\n\n[{\"question\": \"Q\"}]";
        assert_eq!(clean_output(raw), "[{\"question\": \"Q\"}]");

        let raw = "Answer<thinking>hmm</thinking>   text";
        assert_eq!(clean_output(raw), "Answer text");
    }

    #[test]
    fn test_clean_output_unclosed_block() {
        assert_eq!(clean_output("Intro.\n<think>never closed"), "Intro.");
    }

    #[test]
    fn test_clean_output_whitespace() {
        assert_eq!(clean_output("  a\t\tb\n\n\n\nc  "), "a b\n\nc");
    }
}
