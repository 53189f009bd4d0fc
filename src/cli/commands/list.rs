//! List commands.

use super::resolve_document;
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Buddy;
use anyhow::Result;

/// Run the list command.
pub async fn run_list(user: &str, settings: Settings) -> Result<()> {
    let buddy = Buddy::new(settings)?;
    let docs = buddy.documents(Some(user)).await?;

    if docs.is_empty() {
        Output::info("No documents yet. Use 'ai-buddy ingest <file>' to add one.");
        return Ok(());
    }

    Output::header(&format!("Documents ({})", docs.len()));
    println!();
    for doc in &docs {
        Output::document_info(doc);
    }

    let total_chunks: usize = docs.iter().map(|d| d.chunks.len()).sum();
    println!();
    Output::kv("Total documents", &docs.len().to_string());
    Output::kv("Total chunks", &total_chunks.to_string());

    Ok(())
}

/// List quizzes, for one document or all of the user's.
pub async fn run_quizzes(document: Option<&str>, user: &str, settings: Settings) -> Result<()> {
    let buddy = Buddy::new(settings)?;

    let document_id = match document {
        Some(reference) => Some(resolve_document(&buddy, user, reference).await?.id),
        None => None,
    };
    let quizzes = buddy.quizzes().list(document_id, Some(user)).await?;

    if quizzes.is_empty() {
        Output::info("No quizzes yet. Use 'ai-buddy quiz <document>' to create one.");
        return Ok(());
    }

    Output::header(&format!("Quizzes ({})", quizzes.len()));
    println!();
    for quiz in &quizzes {
        Output::quiz_info(quiz);
        if let Some(analytics) = buddy.quizzes().analytics(quiz.id, user).await? {
            if let Some(best) = analytics.best_score {
                println!(
                    "      {}",
                    Output::dim_style().apply_to(format!(
                        "{} attempts, best {:.0}%",
                        analytics.attempts, best
                    ))
                );
            }
        }
    }

    Ok(())
}
