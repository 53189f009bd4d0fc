//! Document text extraction.
//!
//! Uploaded files live in the documents directory as `<document id>.<ext>`.
//! PDFs are read with lopdf page by page; `.txt` and `.md` files are read as-is.

use crate::error::{BuddyError, Result};
use async_trait::async_trait;
use lopdf::Document as PdfDocument;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// File extensions the extractor understands, in lookup order.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md"];

/// Supplies the raw text of a stored document.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Raw text, possibly blank. Fails with [`BuddyError::Extraction`].
    async fn extract(&self, document_id: Uuid) -> Result<String>;
}

/// Extracts text from files in a documents directory.
#[derive(Debug, Clone)]
pub struct FileExtractor {
    documents_dir: PathBuf,
}

impl FileExtractor {
    pub fn new(documents_dir: impl Into<PathBuf>) -> Self {
        Self {
            documents_dir: documents_dir.into(),
        }
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Copy an uploaded file into the documents directory under `document_id`.
    pub async fn store_upload(&self, document_id: Uuid, source: &Path) -> Result<PathBuf> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .filter(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
            .ok_or_else(|| {
                BuddyError::InvalidInput(format!(
                    "unsupported file type: {} (expected one of {})",
                    source.display(),
                    SUPPORTED_EXTENSIONS.join(", ")
                ))
            })?;

        tokio::fs::create_dir_all(&self.documents_dir).await?;
        let target = self.documents_dir.join(format!("{}.{}", document_id, ext));
        tokio::fs::copy(source, &target).await?;
        debug!("Stored upload {:?} as {:?}", source, target);
        Ok(target)
    }

    /// Remove every stored file for a document.
    pub async fn remove(&self, document_id: Uuid) -> Result<()> {
        for ext in SUPPORTED_EXTENSIONS {
            let path = self.documents_dir.join(format!("{}.{}", document_id, ext));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn locate(&self, document_id: Uuid) -> Option<PathBuf> {
        SUPPORTED_EXTENSIONS
            .iter()
            .map(|ext| self.documents_dir.join(format!("{}.{}", document_id, ext)))
            .find(|p| p.exists())
    }
}

/// Extract all page text from a PDF, pages separated by blank lines.
pub fn extract_pdf_text(path: &Path) -> Result<String> {
    let document =
        PdfDocument::load(path).map_err(|e| BuddyError::Extraction(e.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        match document.extract_text(&[page_no]) {
            Ok(text) if !text.trim().is_empty() => pages.push(text),
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable page {} of {:?}: {}", page_no, path, e),
        }
    }

    Ok(pages.join("\n\n"))
}

#[async_trait]
impl TextExtractor for FileExtractor {
    #[instrument(skip(self))]
    async fn extract(&self, document_id: Uuid) -> Result<String> {
        let path = self.locate(document_id).ok_or_else(|| {
            BuddyError::Extraction(format!("no stored file for document {}", document_id))
        })?;

        let is_pdf = path.extension().and_then(|e| e.to_str()) == Some("pdf");
        if is_pdf {
            tokio::task::spawn_blocking(move || extract_pdf_text(&path))
                .await
                .map_err(|e| BuddyError::Extraction(format!("extraction task failed: {}", e)))?
        } else {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| BuddyError::Extraction(format!("{:?}: {}", path, e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extracts_stored_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, "Osmosis moves water across membranes.").unwrap();

        let extractor = FileExtractor::new(dir.path().join("documents"));
        let id = Uuid::new_v4();
        extractor.store_upload(id, &source).await.unwrap();

        let text = extractor.extract(id).await.unwrap();
        assert_eq!(text, "Osmosis moves water across membranes.");

        extractor.remove(id).await.unwrap();
        assert!(matches!(
            extractor.extract(id).await,
            Err(BuddyError::Extraction(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_upload() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("slides.pptx");
        std::fs::write(&source, b"binary").unwrap();

        let extractor = FileExtractor::new(dir.path());
        let result = extractor.store_upload(Uuid::new_v4(), &source).await;
        assert!(matches!(result, Err(BuddyError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_corrupt_pdf_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        std::fs::write(dir.path().join(format!("{}.pdf", id)), b"not a pdf").unwrap();

        let extractor = FileExtractor::new(dir.path());
        assert!(matches!(
            extractor.extract(id).await,
            Err(BuddyError::Extraction(_))
        ));
    }
}
