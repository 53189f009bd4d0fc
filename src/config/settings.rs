//! Configuration settings for AI Buddy.

use crate::error::{BuddyError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub quiz: QuizSettings,
    pub tutor: TutorSettings,
    pub voice: VoiceSettings,
    pub store: StoreSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data (uploaded PDFs, database).
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.ai-buddy".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Language model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Base URL of an OpenAI-compatible server (Ollama serves one under /v1).
    pub base_url: String,
    /// API key. Local servers ignore it.
    pub api_key: Option<String>,
    /// Model used for quiz generation and tutoring.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Hard timeout per generation call.
    pub timeout_seconds: u64,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    /// Delay between generation retries.
    pub retry_backoff_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            model: "deepseek-r1:8b".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout_seconds: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// Embedding provider type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible embeddings endpoint (default, served by the local model server).
    #[default]
    OpenAI,
    /// Deterministic feature-hashing embedder. Needs no backend.
    Hashing,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "ollama" => Ok(EmbeddingProvider::OpenAI),
            "hashing" | "hash" => Ok(EmbeddingProvider::Hashing),
            _ => Err(format!("Unknown embedding provider: {}", s)),
        }
    }
}

impl std::fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingProvider::OpenAI => write!(f, "openai"),
            EmbeddingProvider::Hashing => write!(f, "hashing"),
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
    /// Total attempts per embedding call, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_base_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAI,
            model: "all-minilm".to_string(),
            dimensions: 384,
            max_attempts: 3,
            retry_base_ms: 200,
        }
    }
}

/// Text chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Retrieval and prompt budget settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Chunks retrieved for a tutoring turn.
    pub top_k: usize,
    /// Chunks retrieved for quiz generation.
    pub quiz_top_k: usize,
    /// Maximum characters of retrieved context in one prompt.
    pub context_char_budget: usize,
    /// Maximum characters of conversation history in one prompt.
    pub history_char_budget: usize,
    /// Maximum number of history turns in one prompt.
    pub history_turn_budget: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 6,
            quiz_top_k: 8,
            context_char_budget: 6000,
            history_char_budget: 3000,
            history_turn_budget: 10,
        }
    }
}

/// What quiz generation does when the scope has no indexed chunks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NoContextPolicy {
    /// Mark the quiz failed without calling the model.
    #[default]
    Fail,
    /// Generate from the model's own knowledge with a no-context instruction.
    Generate,
}

impl std::str::FromStr for NoContextPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail" => Ok(NoContextPolicy::Fail),
            "generate" => Ok(NoContextPolicy::Generate),
            _ => Err(format!("Unknown no-context policy: {}", s)),
        }
    }
}

/// One row of the open-ended grading table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GradingBand {
    /// Minimum cosine similarity to the reference answer.
    pub min_similarity: f32,
    /// Score on a 0-100 scale awarded at or above `min_similarity`.
    pub score: u8,
}

/// Quiz generation and grading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizSettings {
    pub default_question_count: usize,
    pub max_question_count: usize,
    /// Options per multiple choice question. Only 4 is supported.
    pub mcq_option_count: usize,
    pub no_context_policy: NoContextPolicy,
    /// Append a model-written judgment to open-ended feedback.
    pub llm_feedback: bool,
    pub grading_bands: Vec<GradingBand>,
    /// Quizzes stuck in `generating` longer than this are reaped as failed.
    pub stale_after_seconds: u64,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            default_question_count: 5,
            max_question_count: 10,
            mcq_option_count: 4,
            no_context_policy: NoContextPolicy::Fail,
            llm_feedback: true,
            grading_bands: vec![
                GradingBand { min_similarity: 0.85, score: 100 },
                GradingBand { min_similarity: 0.65, score: 50 },
            ],
            stale_after_seconds: 600,
        }
    }
}

/// Tutoring session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorSettings {
    /// Total characters kept in a session before the oldest turns are dropped.
    pub session_char_budget: usize,
    /// Sessions stuck `active` longer than this are returned to `open`.
    pub stale_after_seconds: u64,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            session_char_budget: 20_000,
            stale_after_seconds: 300,
        }
    }
}

/// Voice microservice settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub service_url: String,
    pub timeout_seconds: u64,
    /// Word cap for spoken replies.
    pub max_spoken_words: usize,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8001".to_string(),
            timeout_seconds: 30,
            max_spoken_words: 30,
        }
    }
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Store provider (sqlite, memory).
    pub provider: String,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.ai-buddy/buddy.db".to_string(),
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Settings>(&content)?
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BuddyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject combinations the engines cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(BuddyError::Config("chunking.chunk_size must be positive".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(BuddyError::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 || self.retrieval.quiz_top_k == 0 {
            return Err(BuddyError::Config("retrieval top_k values must be positive".into()));
        }
        if self.quiz.mcq_option_count != 4 {
            return Err(BuddyError::Config(format!(
                "quiz.mcq_option_count must be 4, got {}",
                self.quiz.mcq_option_count
            )));
        }
        if self.quiz.max_question_count == 0 {
            return Err(BuddyError::Config("quiz.max_question_count must be positive".into()));
        }
        if self.embedding.max_attempts == 0 {
            return Err(BuddyError::Config("embedding.max_attempts must be positive".into()));
        }

        // Bands must be ordered so that higher similarity never earns less.
        for pair in self.quiz.grading_bands.windows(2) {
            if pair[0].min_similarity <= pair[1].min_similarity || pair[0].score < pair[1].score {
                return Err(BuddyError::Config(
                    "quiz.grading_bands must be sorted by descending similarity and score".into(),
                ));
            }
        }
        if self.quiz.grading_bands.iter().any(|b| b.score > 100) {
            return Err(BuddyError::Config("grading band scores are on a 0-100 scale".into()));
        }

        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ai-buddy")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Directory holding uploaded documents.
    pub fn documents_dir(&self) -> PathBuf {
        self.data_dir().join("documents")
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.llm.timeout_seconds, 60);
        assert_eq!(settings.llm.max_retries, 2);
        assert_eq!(settings.embedding.max_attempts, 3);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut settings = Settings::default();
        settings.chunking.chunk_overlap = settings.chunking.chunk_size;
        assert!(matches!(settings.validate(), Err(BuddyError::Config(_))));
    }

    #[test]
    fn test_non_monotonic_bands_rejected() {
        let mut settings = Settings::default();
        settings.quiz.grading_bands = vec![
            GradingBand { min_similarity: 0.9, score: 40 },
            GradingBand { min_similarity: 0.5, score: 80 },
        ];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [chunking]
            chunk_size = 500
            chunk_overlap = 50

            [quiz]
            no_context_policy = "generate"
            "#,
        )
        .unwrap();

        assert_eq!(settings.chunking.chunk_size, 500);
        assert_eq!(settings.quiz.no_context_policy, NoContextPolicy::Generate);
        assert_eq!(settings.retrieval.top_k, 6);
        assert_eq!(settings.embedding.provider, EmbeddingProvider::OpenAI);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.llm.model = "llama3.1:8b".to_string();
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.llm.model, "llama3.1:8b");
    }
}
