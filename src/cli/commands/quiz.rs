//! Interactive quiz command.

use super::resolve_document;
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Buddy;
use crate::quiz::{
    option_index, Attempt, Difficulty, Question, QuestionKind, Quiz, QuizRequest, QuizStatus, SubmittedAnswer,
    NO_CONTEXT_REASON,
};
use anyhow::{anyhow, bail, Result};
use console::style;
use std::io::{self, BufRead, Write};

/// What the student typed for one question.
#[derive(Debug, PartialEq)]
enum Response {
    Hint,
    Answer(SubmittedAnswer),
    Invalid(String),
}

fn parse_response(question: &Question, line: &str) -> Response {
    let line = line.trim();
    if line == "?" {
        return Response::Hint;
    }
    match question {
        Question::Mcq { options, .. } => match option_index(line) {
            Some(i) if i < options.len() => Response::Answer(SubmittedAnswer::Choice(i)),
            _ => Response::Invalid(format!(
                "Answer with a letter from A to {}.",
                crate::quiz::option_letter(options.len().saturating_sub(1))
            )),
        },
        Question::Open { .. } if line.is_empty() => Response::Invalid("Type an answer, or ? for a hint.".into()),
        Question::Open { .. } => Response::Answer(SubmittedAnswer::Text(line.to_string())),
    }
}

fn prompt_line(label: &str) -> Result<String> {
    print!("{} ", style(label).green().bold());
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("Input closed");
    }
    Ok(line)
}

/// Run the quiz command.
#[allow(clippy::too_many_arguments)]
pub async fn run_quiz(
    document: &str,
    count: Option<usize>,
    difficulty: &str,
    kind: &str,
    topic: Option<String>,
    name: Option<String>,
    user: &str,
    settings: Settings,
) -> Result<()> {
    let difficulty: Difficulty = difficulty.parse().map_err(|e: String| anyhow!(e))?;
    let kind: QuestionKind = kind.parse().map_err(|e: String| anyhow!(e))?;

    let buddy = Buddy::open(settings).await?;
    let doc = resolve_document(&buddy, user, document).await?;

    let request = QuizRequest {
        owner: user.to_string(),
        document_ids: vec![doc.id],
        kind,
        difficulty,
        count,
        topic,
        name,
    };

    let spinner = Output::spinner(&format!(
        "Writing {} {} questions...",
        buddy.quizzes().clamp_count(count),
        kind
    ));
    let result = buddy.quizzes().generate(request).await;
    spinner.finish_and_clear();

    let quiz = match result {
        Ok(quiz) => quiz,
        Err(e) => {
            Output::error(&e.user_message());
            return Err(e.into());
        }
    };

    if let QuizStatus::Failed { reason } = &quiz.status {
        if reason == NO_CONTEXT_REASON {
            Output::error(&format!("'{}' has no indexed text to quiz you on.", doc.title));
        } else {
            Output::error(&format!("Quiz generation failed: {}", reason));
            Output::info("Run the command again to regenerate.");
        }
        bail!("quiz {} failed", quiz.id);
    }

    Output::header(&quiz.name);
    println!(
        "{}\n",
        Output::dim_style().apply_to("Type ? for a hint on any question.")
    );

    let answers = take_quiz(&buddy, &quiz).await?;

    let spinner = Output::spinner("Grading...");
    let attempt = buddy.quizzes().submit(quiz.id, user, answers).await;
    spinner.finish_and_clear();
    let attempt = attempt?;

    show_results(&buddy, &quiz, &attempt).await?;

    if let Some(stats) = buddy.quizzes().analytics(quiz.id, user).await? {
        Output::header("Progress");
        Output::kv("Attempts", &stats.attempts.to_string());
        if let Some(best) = stats.best_score {
            Output::kv("Best score", &format!("{:.0}%", best));
        }
        if let Some(average) = stats.average_score {
            Output::kv("Average score", &format!("{:.0}%", average));
        }
    }

    Ok(())
}

async fn take_quiz(buddy: &Buddy, quiz: &Quiz) -> Result<Vec<SubmittedAnswer>> {
    let mut answers = Vec::with_capacity(quiz.questions.len());

    for (i, question) in quiz.questions.iter().enumerate() {
        println!("{}\n", question.render(i + 1));
        loop {
            let line = prompt_line("Your answer:")?;
            match parse_response(question, &line) {
                Response::Answer(answer) => {
                    answers.push(answer);
                    break;
                }
                Response::Hint => {
                    let spinner = Output::spinner("Thinking of a hint...");
                    let hint = buddy.quizzes().hint(quiz.id, i).await;
                    spinner.finish_and_clear();
                    match hint {
                        Ok(hint) => Output::reply(&hint),
                        Err(e) => Output::error(&e.user_message()),
                    }
                }
                Response::Invalid(msg) => Output::warning(&msg),
            }
        }
        println!();
    }

    Ok(answers)
}

async fn show_results(buddy: &Buddy, quiz: &Quiz, attempt: &Attempt) -> Result<()> {
    Output::header("Results");

    for (i, (question, result)) in quiz.questions.iter().zip(&attempt.results).enumerate() {
        let mark = match (result.correct, result.score) {
            (_, None) => style("pending review".to_string()).yellow(),
            (Some(true), _) => style("correct".to_string()).green(),
            (Some(false), Some(score)) if score > 0 => style(format!("partial ({}%)", score)).yellow(),
            _ => style("incorrect".to_string()).red(),
        };
        println!("\n  {}. {} {}", i + 1, question.prompt(), mark);

        if result.correct == Some(true) {
            continue;
        }
        Output::kv("Answer", &question.correct_answer());
        if let Some(feedback) = &result.feedback {
            Output::kv("Feedback", feedback);
        }

        let line = prompt_line("  Explain this one? [y/N]")?;
        if line.trim().eq_ignore_ascii_case("y") {
            let spinner = Output::spinner("Explaining...");
            let explanation = buddy.quizzes().explain_answer(quiz.id, i, &result.answer).await;
            spinner.finish_and_clear();
            match explanation {
                Ok(text) => Output::reply(&text),
                Err(e) => Output::error(&e.user_message()),
            }
        }
    }

    println!();
    match attempt.score {
        Some(score) => Output::success(&format!("Score: {:.0}%", score)),
        None => Output::warning("Nothing could be graded automatically."),
    }
    let pending = attempt.pending_review();
    if pending > 0 {
        Output::info(&format!("{} answers are pending manual review.", pending));
    }

    Ok(())
}
