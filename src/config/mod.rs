//! Configuration module for AI Buddy.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{Prompts, QuizPrompts, TutorPrompts};
pub use settings::{
    ChunkingSettings, EmbeddingProvider, EmbeddingSettings, GeneralSettings, GradingBand,
    LlmSettings, NoContextPolicy, PromptSettings, QuizSettings, RetrievalSettings, Settings,
    StoreSettings, TutorSettings, VoiceSettings,
};
