//! Delete command implementation.

use super::resolve_document;
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Buddy;
use anyhow::Result;

/// Run the delete command.
pub async fn run_delete(document: &str, user: &str, settings: Settings) -> Result<()> {
    let buddy = Buddy::new(settings)?;
    let doc = resolve_document(&buddy, user, document).await?;

    if buddy.delete_document(doc.id).await? {
        Output::success(&format!("Deleted '{}' and its quizzes", doc.title));
    } else {
        Output::warning(&format!("'{}' was already gone", doc.title));
    }

    Ok(())
}
