//! CLI output formatting utilities.

use crate::ingest::{Document, DocumentStatus};
use crate::quiz::{Quiz, QuizStatus};
use console::{style, Style};
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print one library entry.
    pub fn document_info(doc: &Document) {
        let status = match &doc.status {
            DocumentStatus::Indexed => style("indexed".to_string()).green(),
            DocumentStatus::Pending => style("pending".to_string()).yellow(),
            DocumentStatus::Failed { reason } => style(format!("failed: {}", reason)).red(),
        };
        println!(
            "  {} {} ({}, {} chunks, {})",
            style("*").cyan(),
            style(&doc.title).bold(),
            style(doc.id).dim(),
            doc.chunks.len(),
            status
        );
    }

    /// Print one quiz entry.
    pub fn quiz_info(quiz: &Quiz) {
        let status = match &quiz.status {
            QuizStatus::Ready => style(format!("{} questions", quiz.questions.len())).green(),
            QuizStatus::Requested | QuizStatus::Generating => style("generating".to_string()).yellow(),
            QuizStatus::Failed { reason } => style(format!("failed: {}", reason)).red(),
        };
        println!(
            "  {} {} ({}, {}, {})",
            style("*").cyan(),
            style(&quiz.name).bold(),
            style(quiz.id).dim(),
            quiz.difficulty,
            status
        );
    }

    /// Print search result.
    pub fn search_result(title: &str, position: &str, score: f32, content: &str) {
        println!(
            "\n{} {} @ {} (score: {:.2})",
            style(">>").green(),
            style(title).bold(),
            style(position).cyan(),
            score
        );
        println!("   {}", content_preview(content, 200));
    }

    /// Print the assistant's side of a conversation.
    pub fn reply(text: &str) {
        println!("\n{} {}\n", style("Buddy:").cyan().bold(), text);
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(template);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }

    /// Style for dim text.
    pub fn dim_style() -> Style {
        Style::new().dim()
    }
}

/// Single-line preview, cut on a character boundary.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_short_text() {
        assert_eq!(content_preview("line one\nline two", 50), "line one line two");
    }

    #[test]
    fn preview_cuts_multibyte_text_safely() {
        let text = "é".repeat(10);
        assert_eq!(content_preview(&text, 4), "éééé...");
    }
}
