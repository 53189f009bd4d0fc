//! Retrieval-augmented prompting: find the relevant chunks, then build a
//! bounded prompt around them.

mod composer;
mod retriever;

pub use composer::{ComposedPrompt, PromptBudget, PromptComposer, Task};
pub use retriever::{RetrievedChunk, RetrievedContext, Retriever};

/// Format retrieved chunks for display to the user.
pub fn format_sources(context: &RetrievedContext) -> String {
    context
        .chunks()
        .iter()
        .map(|chunk| {
            format!(
                "{} [chars {}-{}] (score: {:.2})",
                chunk.document_title, chunk.start_offset, chunk.end_offset, chunk.score
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
