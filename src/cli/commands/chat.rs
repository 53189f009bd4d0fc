//! Interactive tutoring session.

use super::ask::print_reply;
use super::resolve_document;
use crate::cli::Output;
use crate::config::Settings;
use crate::error::BuddyError;
use crate::orchestrator::Buddy;
use crate::tutor::TutorMode;
use anyhow::{anyhow, Result};
use console::style;
use std::io::{self, BufRead, Write};

/// A line typed at the chat prompt.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Empty,
    Exit,
    Mode(Option<TutorMode>),
    Message(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
        return Input::Exit;
    }
    if let Some(mode) = line.strip_prefix("/mode") {
        return Input::Mode(mode.trim().parse().ok());
    }
    Input::Message(line)
}

/// Run the interactive chat command.
pub async fn run_chat(documents: &[String], mode: &str, user: &str, settings: Settings) -> Result<()> {
    let mut mode: TutorMode = mode.parse().map_err(|e: String| anyhow!(e))?;

    let buddy = Buddy::open(settings).await?;
    let mut document_ids = Vec::with_capacity(documents.len());
    let mut titles = Vec::with_capacity(documents.len());
    for reference in documents {
        let doc = resolve_document(&buddy, user, reference).await?;
        document_ids.push(doc.id);
        titles.push(doc.title);
    }

    let session = buddy.tutor().create_session(user, document_ids).await?;

    println!("\n{}", style("AI Buddy").bold().cyan());
    println!("{}", style(format!("Studying: {}", titles.join(", "))).dim());
    println!(
        "{}\n",
        style("Ask anything, '/mode explain|tutor|hint' to switch modes, 'exit' to quit.").dim()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style(format!("You ({}):", mode)).green().bold());
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Exit => {
                Output::info("Goodbye!");
                break;
            }
            Input::Mode(Some(new_mode)) => {
                mode = new_mode;
                Output::info(&format!("Switched to {} mode.", mode));
            }
            Input::Mode(None) => Output::warning("Modes are explain, tutor and hint."),
            Input::Message(text) => {
                let spinner = Output::spinner("Thinking...");
                let result = buddy.tutor().ask(session.id, text, mode, None).await;
                spinner.finish_and_clear();

                match result {
                    Ok(reply) => print_reply(&reply),
                    Err(e @ BuddyError::SessionClosed(_)) => {
                        Output::error(&e.user_message());
                        break;
                    }
                    Err(e) => Output::error(&e.user_message()),
                }
            }
        }
    }

    buddy.tutor().close(session.id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_commands() {
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input("Quit\n"), Input::Exit);
        assert_eq!(parse_input("/mode hint"), Input::Mode(Some(TutorMode::Hint)));
        assert_eq!(parse_input("/mode loud"), Input::Mode(None));
        assert_eq!(
            parse_input("What is ATP?\n"),
            Input::Message("What is ATP?")
        );
    }
}
