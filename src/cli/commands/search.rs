//! Search command implementation.

use super::resolve_document;
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Buddy;
use crate::rag::RetrievedContext;
use anyhow::Result;

/// Run the search command.
pub async fn run_search(document: &str, query: &str, limit: usize, user: &str, settings: Settings) -> Result<()> {
    let buddy = Buddy::open(settings).await?;
    let doc = resolve_document(&buddy, user, document).await?;

    let spinner = Output::spinner("Searching...");
    let results = buddy.search(&[doc.id], query, limit).await;
    spinner.finish_and_clear();

    match results {
        Ok(RetrievedContext::NoContext) => {
            Output::warning("No passages in this document match your query.");
        }
        Ok(context) => {
            let chunks = context.chunks();
            Output::success(&format!("Found {} results", chunks.len()));
            for chunk in chunks {
                Output::search_result(
                    &chunk.document_title,
                    &format!("chars {}-{}", chunk.start_offset, chunk.end_offset),
                    chunk.score,
                    &chunk.text,
                );
            }
        }
        Err(e) => {
            Output::error(&format!("Search failed: {}", e.user_message()));
            return Err(e.into());
        }
    }

    Ok(())
}
