//! Ask command implementation.

use super::resolve_document;
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Buddy;
use crate::tutor::{TutorMode, TutorReply};
use anyhow::{anyhow, Result};

/// Run the ask command: a one-turn tutoring session.
pub async fn run_ask(document: &str, question: &str, mode: &str, user: &str, settings: Settings) -> Result<()> {
    let mode: TutorMode = mode.parse().map_err(|e: String| anyhow!(e))?;

    let buddy = Buddy::open(settings).await?;
    let doc = resolve_document(&buddy, user, document).await?;
    let session = buddy.tutor().create_session(user, vec![doc.id]).await?;

    let spinner = Output::spinner("Thinking...");
    let result = buddy.tutor().ask(session.id, question, mode, None).await;
    spinner.finish_and_clear();

    buddy.tutor().close(session.id).await?;

    match result {
        Ok(reply) => {
            print_reply(&reply);
            Ok(())
        }
        Err(e) => {
            Output::error(&e.user_message());
            Err(e.into())
        }
    }
}

/// Print an answer followed by the passages it drew on.
pub(crate) fn print_reply(reply: &TutorReply) {
    Output::reply(&reply.text);

    if !reply.grounded {
        Output::warning("No matching passages were found; this answer is not drawn from your material.");
    } else if !reply.sources.is_empty() {
        Output::header("Sources");
        for source in reply.sources.lines() {
            Output::list_item(source);
        }
        println!();
    }
}
