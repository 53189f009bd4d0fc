//! Application context for AI Buddy.
//!
//! [`Buddy`] wires every component from [`Settings`] and is passed explicitly
//! to the CLI commands and HTTP handlers. There is no global state.

use crate::chunking::{ChunkingConfig, RecursiveChunker};
use crate::config::{Prompts, Settings};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{BuddyError, Result};
use crate::extraction::FileExtractor;
use crate::generation::{GenerationClient, LanguageModel, OpenAICompatibleModel};
use crate::ingest::{Document, Ingestor};
use crate::quiz::{Grader, Judge, QuizEngine};
use crate::rag::{PromptBudget, PromptComposer, RetrievedContext, Retriever};
use crate::store::Repository;
use crate::tutor::TutorEngine;
use crate::vector_store::{MemoryVectorIndex, VectorIndex};
use crate::voice::{HttpVoiceClient, VoiceAssistant, VoiceService};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Backends that differ between production and tests.
pub struct Components {
    pub repo: Repository,
    pub embedder: Arc<dyn Embedder>,
    pub model: Arc<dyn LanguageModel>,
    pub voice: Arc<dyn VoiceService>,
}

/// Outcome of a stale-state sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapResult {
    pub quizzes: usize,
    pub sessions: usize,
}

/// The assembled application.
pub struct Buddy {
    settings: Settings,
    repo: Repository,
    files: FileExtractor,
    index: Arc<dyn VectorIndex>,
    ingestor: Ingestor,
    retriever: Arc<Retriever>,
    quizzes: QuizEngine,
    tutor: Arc<TutorEngine>,
    voice: VoiceAssistant,
}

impl Buddy {
    /// Build from settings with the configured backends.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let components = Components {
            repo: Repository::from_settings(&settings)?,
            embedder: create_embedder(&settings.embedding, &settings.llm)?,
            model: Arc::new(OpenAICompatibleModel::new(&settings.llm)?),
            voice: Arc::new(HttpVoiceClient::new(&settings.voice)?),
        };

        Self::with_components(settings, prompts, components)
    }

    /// Build from settings and restore the vector index from the store.
    pub async fn open(settings: Settings) -> Result<Self> {
        let buddy = Self::new(settings)?;
        buddy.restore_index().await?;
        Ok(buddy)
    }

    /// Build with custom components.
    pub fn with_components(settings: Settings, prompts: Prompts, components: Components) -> Result<Self> {
        let Components {
            repo,
            embedder,
            model,
            voice,
        } = components;

        let chunker = RecursiveChunker::new(ChunkingConfig {
            chunk_size: settings.chunking.chunk_size,
            overlap: settings.chunking.chunk_overlap,
        })?;
        let files = FileExtractor::new(settings.documents_dir());
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new());

        let ingestor = Ingestor::new(
            repo.clone(),
            Arc::new(files.clone()),
            Arc::new(chunker),
            embedder.clone(),
            index.clone(),
        );
        let retriever = Arc::new(Retriever::new(repo.clone(), embedder.clone(), index.clone()));
        let composer = Arc::new(PromptComposer::new(
            prompts.clone(),
            PromptBudget::from(&settings.retrieval),
        ));
        let generator = GenerationClient::new(model, &settings.llm);

        let judge = settings.quiz.llm_feedback.then(|| Judge {
            generator: generator.clone(),
            prompts: prompts.clone(),
        });
        let grader = Grader::new(embedder, settings.quiz.grading_bands.clone(), judge);

        let quizzes = QuizEngine::new(
            repo.clone(),
            retriever.clone(),
            composer.clone(),
            generator.clone(),
            grader,
            settings.quiz.clone(),
            settings.retrieval.quiz_top_k,
            settings.retrieval.top_k,
        );
        let tutor = Arc::new(TutorEngine::new(
            repo.clone(),
            retriever.clone(),
            composer,
            generator,
            settings.tutor.clone(),
            settings.retrieval.top_k,
        ));
        let voice = VoiceAssistant::new(voice, settings.voice.max_spoken_words);

        Ok(Self {
            settings,
            repo,
            files,
            index,
            ingestor,
            retriever,
            quizzes,
            tutor,
            voice,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn quizzes(&self) -> &QuizEngine {
        &self.quizzes
    }

    pub fn tutor(&self) -> &Arc<TutorEngine> {
        &self.tutor
    }

    pub fn voice(&self) -> &VoiceAssistant {
        &self.voice
    }

    /// Rebuild the in-memory index from stored chunk embeddings.
    pub async fn restore_index(&self) -> Result<usize> {
        self.ingestor.restore_index().await
    }

    /// Upload and index a file. The document is kept (as failed) if indexing fails.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn add_document(&self, owner: &str, path: &Path) -> Result<Document> {
        let title = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BuddyError::InvalidInput(format!("not a file: {}", path.display())))?;

        let doc = self.ingestor.register(owner, title).await?;
        if let Err(e) = self.files.store_upload(doc.id, path).await {
            self.ingestor.delete(doc.id).await?;
            return Err(e);
        }
        self.ingestor.ingest(doc.id).await
    }

    /// Store plain text as a document and index it.
    pub async fn add_text(&self, owner: &str, title: &str, text: &str) -> Result<Document> {
        let title = title.trim();
        if title.is_empty() {
            return Err(BuddyError::InvalidInput("document title cannot be empty".into()));
        }
        let doc = self.ingestor.register(owner, title).await?;

        let dir = self.files.documents_dir();
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(format!("{}.txt", doc.id)), text).await?;

        self.ingestor.ingest(doc.id).await
    }

    /// Re-extract, re-chunk and re-index a document.
    pub async fn reingest(&self, document_id: Uuid) -> Result<Document> {
        self.ingestor.ingest(document_id).await
    }

    pub async fn document(&self, document_id: Uuid) -> Result<Document> {
        self.ingestor
            .get(document_id)
            .await?
            .ok_or_else(|| BuddyError::NotFound(format!("document {}", document_id)))
    }

    pub async fn documents(&self, owner: Option<&str>) -> Result<Vec<Document>> {
        self.ingestor.list(owner).await
    }

    /// Delete a document with its quizzes, index entries and stored file.
    /// Sessions that include it are closed.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, document_id: Uuid) -> Result<bool> {
        let quizzes = self.quizzes.delete_for_document(document_id).await?;

        let mut sessions = 0;
        for session in self.tutor.list(None).await? {
            if session.document_ids.contains(&document_id) {
                self.tutor.close(session.id).await?;
                sessions += 1;
            }
        }

        let removed = self.ingestor.delete(document_id).await?;
        if let Err(e) = self.files.remove(document_id).await {
            warn!("Could not remove stored file for {}: {}", document_id, e);
        }

        info!(
            "Deleted document {} ({} quizzes, {} sessions closed)",
            document_id, quizzes, sessions
        );
        Ok(removed)
    }

    /// Semantic search over documents.
    pub async fn search(&self, document_ids: &[Uuid], query: &str, k: usize) -> Result<RetrievedContext> {
        if query.trim().is_empty() {
            return Err(BuddyError::InvalidInput("query cannot be empty".into()));
        }
        self.retriever.retrieve(query, document_ids, k).await
    }

    /// Number of indexed chunks for a document.
    pub async fn indexed_chunks(&self, document_id: Uuid) -> Result<usize> {
        self.index.len(document_id).await
    }

    /// Fail stuck quizzes and reopen stuck sessions.
    pub async fn reap_stale(&self) -> Result<ReapResult> {
        let now = Utc::now();
        Ok(ReapResult {
            quizzes: self.quizzes.reap_stale(now).await?,
            sessions: self.tutor.reap_stale(now).await?,
        })
    }

    /// Run [`Buddy::reap_stale`] every `period` until the task is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let buddy = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = buddy.reap_stale().await {
                    warn!("Stale-state sweep failed: {}", e);
                }
            }
        })
    }
}
