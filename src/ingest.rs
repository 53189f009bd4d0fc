//! Ingestion pipeline: extract, chunk, embed, index.
//!
//! A document's chunks are persisted with their embeddings inside the
//! document record, so the vector index can be rebuilt from the store at
//! startup without calling the embedder.

use crate::chunking::Chunker;
use crate::embedding::Embedder;
use crate::error::{BuddyError, Result};
use crate::extraction::TextExtractor;
use crate::store::{Collection, Record, Repository};
use crate::vector_store::{ChunkId, VectorIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Ingestion status of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Indexed,
    Failed { reason: String },
}

/// A chunk of document text. Never edited; re-ingesting replaces all chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: Uuid,
    pub sequence: u32,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        ChunkId::new(self.document_id, self.sequence)
    }
}

/// An uploaded study document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    pub status: DocumentStatus,
    pub chunks: Vec<Chunk>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(owner: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            title: title.into(),
            status: DocumentStatus::Pending,
            chunks: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn chunk(&self, sequence: u32) -> Option<&Chunk> {
        self.chunks.get(sequence as usize).filter(|c| c.sequence == sequence)
    }

    pub fn is_indexed(&self) -> bool {
        self.status == DocumentStatus::Indexed
    }
}

impl Record for Document {
    const COLLECTION: Collection = Collection::Documents;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Document listing entry without chunk bodies.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub owner: String,
    pub title: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&Document> for DocumentSummary {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            owner: doc.owner.clone(),
            title: doc.title.clone(),
            status: doc.status.clone(),
            chunk_count: doc.chunks.len(),
            created_at: doc.created_at,
        }
    }
}

/// Runs documents through extraction, chunking, embedding and indexing.
pub struct Ingestor {
    repo: Repository,
    extractor: Arc<dyn TextExtractor>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Ingestor {
    pub fn new(
        repo: Repository,
        extractor: Arc<dyn TextExtractor>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            repo,
            extractor,
            chunker,
            embedder,
            index,
        }
    }

    /// Record a new pending document.
    pub async fn register(&self, owner: &str, title: &str) -> Result<Document> {
        let doc = Document::new(owner, title);
        self.repo.save(&doc).await?;
        Ok(doc)
    }

    /// Extract and index a registered document. Also used to re-ingest.
    #[instrument(skip(self))]
    pub async fn ingest(&self, document_id: Uuid) -> Result<Document> {
        let doc = self.repo.require::<Document>(&document_id.to_string()).await?;
        match self.extractor.extract(document_id).await {
            Ok(text) => self.index_text(doc, &text).await,
            Err(e) => self.fail(doc, e).await,
        }
    }

    /// Index already-extracted text for a registered document.
    pub async fn ingest_text(&self, document_id: Uuid, text: &str) -> Result<Document> {
        let doc = self.repo.require::<Document>(&document_id.to_string()).await?;
        self.index_text(doc, text).await
    }

    async fn index_text(&self, doc: Document, text: &str) -> Result<Document> {
        match self.build_chunks(doc.id, text).await {
            Ok(chunks) => self.commit(doc, chunks).await,
            Err(e) => self.fail(doc, e).await,
        }
    }

    async fn build_chunks(&self, document_id: Uuid, text: &str) -> Result<Vec<Chunk>> {
        let spans = self.chunker.chunk(text)?;
        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != spans.len() {
            return Err(BuddyError::Embedding(format!(
                "expected {} embeddings, got {}",
                spans.len(),
                embeddings.len()
            )));
        }

        Ok(spans
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (span, embedding))| Chunk {
                document_id,
                sequence: i as u32,
                text: span.text,
                start_offset: span.start_offset,
                end_offset: span.end_offset,
                embedding: Some(embedding),
            })
            .collect())
    }

    /// Swap the document's index scope in one step, then persist the record.
    ///
    /// Readers of the scope see either the old entries or the new ones, never
    /// an empty or partly filled scope.
    async fn commit(&self, mut doc: Document, chunks: Vec<Chunk>) -> Result<Document> {
        let entries: Vec<(u32, Vec<f32>)> = chunks
            .iter()
            .filter_map(|c| c.embedding.clone().map(|e| (c.sequence, e)))
            .collect();
        if let Err(e) = self.index.rebuild(doc.id, entries).await {
            return self.fail(doc, e).await;
        }

        doc.chunks = chunks;
        doc.status = DocumentStatus::Indexed;
        doc.updated_at = Utc::now();
        self.repo.save(&doc).await?;

        info!("Indexed document {} ({} chunks)", doc.id, doc.chunks.len());
        Ok(doc)
    }

    async fn fail(&self, mut doc: Document, cause: BuddyError) -> Result<Document> {
        error!("Ingestion of {} failed: {}", doc.id, cause);
        if let Err(e) = self.index.remove_scope(doc.id).await {
            warn!("Could not clear index scope for {}: {}", doc.id, e);
        }
        doc.chunks.clear();
        doc.status = DocumentStatus::Failed {
            reason: cause.to_string(),
        };
        doc.updated_at = Utc::now();
        self.repo.save(&doc).await?;
        Err(cause)
    }

    /// Delete a document, its chunks and its index entries.
    pub async fn delete(&self, document_id: Uuid) -> Result<bool> {
        self.index.remove_scope(document_id).await?;
        self.repo.remove::<Document>(&document_id.to_string()).await
    }

    pub async fn get(&self, document_id: Uuid) -> Result<Option<Document>> {
        self.repo.load(&document_id.to_string()).await
    }

    /// Documents, optionally restricted to one owner, oldest first.
    pub async fn list(&self, owner: Option<&str>) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.repo.all().await?;
        if let Some(owner) = owner {
            docs.retain(|d| d.owner == owner);
        }
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }

    /// Rebuild every indexed document's scope from stored embeddings.
    #[instrument(skip(self))]
    pub async fn restore_index(&self) -> Result<usize> {
        let mut restored = 0;
        for doc in self.repo.all::<Document>().await? {
            if !doc.is_indexed() {
                continue;
            }
            let entries: Vec<(u32, Vec<f32>)> = doc
                .chunks
                .iter()
                .filter_map(|c| c.embedding.clone().map(|e| (c.sequence, e)))
                .collect();
            self.index.rebuild(doc.id, entries).await?;
            restored += 1;
        }
        info!("Restored vector index for {} documents", restored);
        Ok(restored)
    }
}
