//! Error types for AI Buddy.

use serde::Serialize;
use thiserror::Error;

/// Library-level error type for AI Buddy operations.
#[derive(Error, Debug)]
pub enum BuddyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document extraction failed: {0}")]
    Extraction(String),

    #[error("Document has no text after normalization")]
    EmptyDocument,

    #[error("Embedding service unavailable: {0}")]
    EmbeddingService(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    VectorStore(String),

    #[error("Document store error: {0}")]
    Store(String),

    #[error("Generation timed out after {0} seconds")]
    GenerationTimeout(u64),

    #[error("Language model unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Language model rejected the request: {0}")]
    GenerationRejected(String),

    #[error("Generated output failed validation: {0}")]
    Validation(String),

    #[error("Grading failed: {0}")]
    Grading(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Tutoring session {0} is closed")]
    SessionClosed(String),

    #[error("Tutoring session {0} is already answering a turn")]
    SessionBusy(String),

    #[error("Voice service error: {0}")]
    Voice(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Coarse error taxonomy used by the orchestrators to decide on terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Extraction or embedding failures; recoverable by re-ingesting.
    Ingestion,
    /// Index unavailable; callers fall back to no-context generation.
    Retrieval,
    /// Timeout, unavailable or rejected generation.
    Generation,
    /// Malformed structured output from the model.
    Validation,
    /// Open-ended scoring backend failure.
    Grading,
    Other,
}

impl BuddyError {
    /// Map this error onto the taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BuddyError::Extraction(_)
            | BuddyError::EmptyDocument
            | BuddyError::EmbeddingService(_)
            | BuddyError::Embedding(_) => ErrorCategory::Ingestion,
            BuddyError::VectorStore(_) => ErrorCategory::Retrieval,
            BuddyError::GenerationTimeout(_)
            | BuddyError::GenerationUnavailable(_)
            | BuddyError::GenerationRejected(_) => ErrorCategory::Generation,
            BuddyError::Validation(_) => ErrorCategory::Validation,
            BuddyError::Grading(_) => ErrorCategory::Grading,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether a local retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BuddyError::EmbeddingService(_)
                | BuddyError::GenerationTimeout(_)
                | BuddyError::GenerationUnavailable(_)
        )
    }

    /// A message suitable for end users. Backend details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            BuddyError::EmptyDocument => {
                "This document has no readable text. Try a different file.".to_string()
            }
            BuddyError::Extraction(_) | BuddyError::EmbeddingService(_) | BuddyError::Embedding(_) => {
                "The document could not be processed. Please re-upload it.".to_string()
            }
            BuddyError::VectorStore(_) => {
                "Search over your material is temporarily unavailable.".to_string()
            }
            BuddyError::GenerationTimeout(_) => {
                "The tutor took too long to respond. Please try again.".to_string()
            }
            BuddyError::GenerationUnavailable(_) => {
                "The tutor is not reachable right now. Please try again.".to_string()
            }
            BuddyError::GenerationRejected(_) => {
                "The tutor could not handle this request. Try rephrasing it.".to_string()
            }
            BuddyError::Validation(_) => {
                "The generated quiz was malformed. Use regenerate to try again.".to_string()
            }
            BuddyError::Grading(_) => "This answer is pending manual review.".to_string(),
            BuddyError::Cancelled(_) => "The request was cancelled.".to_string(),
            BuddyError::SessionClosed(_) => "This tutoring session has ended.".to_string(),
            BuddyError::SessionBusy(_) => {
                "Please wait for the current answer to finish.".to_string()
            }
            BuddyError::NotFound(what) => format!("Not found: {}", what),
            BuddyError::InvalidInput(msg) => msg.clone(),
            BuddyError::Voice(_) => "Voice mode is not available right now.".to_string(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Result type alias for AI Buddy operations.
pub type Result<T> = std::result::Result<T, BuddyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(BuddyError::EmptyDocument.category(), ErrorCategory::Ingestion);
        assert_eq!(
            BuddyError::GenerationTimeout(60).category(),
            ErrorCategory::Generation
        );
        assert_eq!(
            BuddyError::Validation("bad".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            BuddyError::VectorStore("down".into()).category(),
            ErrorCategory::Retrieval
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(BuddyError::GenerationTimeout(1).is_transient());
        assert!(BuddyError::GenerationUnavailable("x".into()).is_transient());
        assert!(BuddyError::EmbeddingService("x".into()).is_transient());
        assert!(!BuddyError::GenerationRejected("x".into()).is_transient());
        assert!(!BuddyError::Validation("x".into()).is_transient());
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = BuddyError::GenerationUnavailable("connection refused at 10.0.0.3:11434".into());
        assert!(!err.user_message().contains("10.0.0.3"));
    }
}
