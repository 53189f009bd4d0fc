//! AI Buddy - a local-first study tutor
//!
//! Turns your own PDFs and notes into quizzes and a tutor that answers from
//! that material.
//!
//! # Overview
//!
//! AI Buddy allows you to:
//! - Ingest PDF, text and markdown documents into a per-document vector index
//! - Generate multiple-choice or open-ended quizzes grounded in a document
//! - Grade attempts, with similarity-based scoring for open answers
//! - Hold tutoring sessions in explain, tutor or hint mode, by text or voice
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - `config` - Settings and prompt templates
//! - `extraction` - Text extraction from uploaded files
//! - `chunking` - Recursive character chunking
//! - `embedding` - Embedding generation
//! - `vector_store` - Per-document vector index
//! - `store` - Persistence for documents, quizzes, attempts and sessions
//! - `ingest` - The document ingestion pipeline
//! - `rag` - Retrieval and prompt composition
//! - `generation` - Language model client with timeouts and retries
//! - `quiz` - Quiz generation, validation and grading
//! - `tutor` - Tutoring sessions
//! - `voice` - Speech-to-text and text-to-speech over HTTP
//! - `orchestrator` - Wires everything into a [`orchestrator::Buddy`]
//!
//! # Example
//!
//! ```rust,no_run
//! use aibuddy::config::Settings;
//! use aibuddy::orchestrator::Buddy;
//! use aibuddy::quiz::QuizRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let buddy = Buddy::open(Settings::load()?).await?;
//!
//!     let doc = buddy.add_document("ana", "notes/biology.pdf".as_ref()).await?;
//!     let quiz = buddy
//!         .quizzes()
//!         .generate(QuizRequest {
//!             owner: "ana".into(),
//!             document_ids: vec![doc.id],
//!             kind: Default::default(),
//!             difficulty: Default::default(),
//!             count: Some(5),
//!             topic: None,
//!             name: None,
//!         })
//!         .await?;
//!     println!("{}", quiz.render_questions());
//!
//!     Ok(())
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod generation;
pub mod ingest;
pub mod openai;
pub mod orchestrator;
pub mod quiz;
pub mod rag;
pub mod store;
pub mod tutor;
pub mod vector_store;
pub mod voice;

pub use error::{BuddyError, Result};
