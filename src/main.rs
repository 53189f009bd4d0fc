//! AI Buddy CLI entry point.

use aibuddy::cli::{commands, Cli, Commands};
use aibuddy::config::Settings;
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    // Initialize logging
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("aibuddy={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.documents_dir())?;

    let user = cli.user.as_str();

    // Execute command
    match &cli.command {
        Commands::Ingest { file, title } => {
            commands::run_ingest(file, title.clone(), user, settings).await?;
        }

        Commands::List => {
            commands::run_list(user, settings).await?;
        }

        Commands::Delete { document } => {
            commands::run_delete(document, user, settings).await?;
        }

        Commands::Search {
            document,
            query,
            limit,
        } => {
            commands::run_search(document, query, *limit, user, settings).await?;
        }

        Commands::Ask {
            document,
            question,
            mode,
        } => {
            commands::run_ask(document, question, mode, user, settings).await?;
        }

        Commands::Chat { documents, mode } => {
            commands::run_chat(documents, mode, user, settings).await?;
        }

        Commands::Quiz {
            document,
            count,
            difficulty,
            kind,
            topic,
            name,
        } => {
            commands::run_quiz(
                document,
                *count,
                difficulty,
                kind,
                topic.clone(),
                name.clone(),
                user,
                settings,
            )
            .await?;
        }

        Commands::Quizzes { document } => {
            commands::run_quizzes(document.as_deref(), user, settings).await?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host, *port, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings)?;
        }
    }

    Ok(())
}
