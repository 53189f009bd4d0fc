//! Ingest command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::ingest::DocumentStatus;
use crate::orchestrator::Buddy;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// Run the ingest command.
pub async fn run_ingest(file: &str, title: Option<String>, user: &str, settings: Settings) -> Result<()> {
    let path = PathBuf::from(shellexpand::tilde(file).as_ref());
    if !path.is_file() {
        bail!("File not found: {}", path.display());
    }

    let buddy = Buddy::open(settings).await?;

    let spinner = Output::spinner(&format!("Indexing {}...", path.display()));
    // Custom titles apply to text files; PDFs keep their file name.
    let result = match title {
        Some(title) if !is_pdf(&path) => {
            let text = tokio::fs::read_to_string(&path).await?;
            buddy.add_text(user, &title, &text).await
        }
        _ => buddy.add_document(user, &path).await,
    };
    spinner.finish_and_clear();

    let doc = match result {
        Ok(doc) => doc,
        Err(e) => {
            Output::error(&e.user_message());
            return Err(e.into());
        }
    };

    match &doc.status {
        DocumentStatus::Indexed => {
            Output::success(&format!("Indexed '{}'", doc.title));
            Output::kv("ID", &doc.id.to_string());
            Output::kv("Chunks", &doc.chunks.len().to_string());
        }
        DocumentStatus::Failed { reason } => {
            Output::error(&format!("'{}' could not be indexed: {}", doc.title, reason));
        }
        DocumentStatus::Pending => {
            Output::warning(&format!("'{}' is still pending", doc.title));
        }
    }

    Ok(())
}

fn is_pdf(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}
