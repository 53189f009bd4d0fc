//! CLI command implementations.

mod ask;
mod chat;
mod config;
mod delete;
mod ingest;
mod list;
mod quiz;
mod search;
mod serve;

pub use ask::run_ask;
pub use chat::run_chat;
pub use config::run_config;
pub use delete::run_delete;
pub use ingest::run_ingest;
pub use list::{run_list, run_quizzes};
pub use quiz::run_quiz;
pub use search::run_search;
pub use serve::{router, run_serve};

use crate::ingest::Document;
use crate::orchestrator::Buddy;
use anyhow::{anyhow, bail, Result};
use uuid::Uuid;

/// Find a document by ID, or by a title owned by `owner` (case-insensitive).
pub(crate) async fn resolve_document(buddy: &Buddy, owner: &str, reference: &str) -> Result<Document> {
    if let Ok(id) = Uuid::parse_str(reference.trim()) {
        return Ok(buddy.document(id).await?);
    }

    let wanted = reference.trim().to_lowercase();
    let mut matches: Vec<Document> = buddy
        .documents(Some(owner))
        .await?
        .into_iter()
        .filter(|d| d.title.to_lowercase() == wanted)
        .collect();

    match matches.len() {
        0 => Err(anyhow!("No document named '{}'. Run 'ai-buddy list' to see your library.", reference)),
        1 => Ok(matches.remove(0)),
        n => bail!("{} documents are named '{}'; use the document ID instead.", n, reference),
    }
}
