//! CLI module for AI Buddy.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// AI Buddy - a study tutor for your own material
///
/// Upload PDFs or notes, then generate quizzes, get graded feedback and ask
/// questions answered from the material you provided.
#[derive(Parser, Debug)]
#[command(name = "ai-buddy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// User that owns documents, quizzes and sessions
    #[arg(short, long, global = true, env = "AI_BUDDY_USER", default_value = "local")]
    pub user: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a PDF, text or markdown file to your library
    Ingest {
        /// Path to the document
        file: String,

        /// Title to show instead of the file name
        #[arg(short, long)]
        title: Option<String>,
    },

    /// List documents in your library
    List,

    /// Delete a document with its quizzes and index entries
    Delete {
        /// Document ID or title
        document: String,
    },

    /// Search a document for passages relevant to a query
    Search {
        /// Document ID or title
        document: String,

        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Ask a single question about a document
    Ask {
        /// Document ID or title
        document: String,

        /// The question to ask
        question: String,

        /// Answer mode (explain, tutor, hint)
        #[arg(short, long, default_value = "explain")]
        mode: String,
    },

    /// Start an interactive tutoring session
    Chat {
        /// Document IDs or titles to study
        #[arg(required = true)]
        documents: Vec<String>,

        /// Answer mode (explain, tutor, hint)
        #[arg(short, long, default_value = "tutor")]
        mode: String,
    },

    /// Generate a quiz and take it in the terminal
    Quiz {
        /// Document ID or title
        document: String,

        /// Number of questions
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Difficulty (easy, medium, hard)
        #[arg(short, long, default_value = "medium")]
        difficulty: String,

        /// Question type (mcq, open)
        #[arg(short, long, default_value = "mcq")]
        kind: String,

        /// Focus the questions on a topic
        #[arg(short, long)]
        topic: Option<String>,

        /// Name for the quiz
        #[arg(long)]
        name: Option<String>,
    },

    /// List quizzes, optionally for one document
    Quizzes {
        /// Document ID or title
        document: Option<String>,
    },

    /// Start the HTTP API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the current configuration to the config file
    Init,

    /// Show configuration file path
    Path,
}
