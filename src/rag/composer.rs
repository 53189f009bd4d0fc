//! Prompt composition under character budgets.
//!
//! Context chunks go in rank order until the next one would not fit; the rest
//! are dropped whole. History is taken newest first under its own budget and
//! rendered oldest first. Identical inputs always yield identical prompts.

use super::RetrievedContext;
use crate::config::{Prompts, RetrievalSettings};
use crate::quiz::{Difficulty, QuestionKind};
use crate::tutor::{Role, Turn, TutorMode};
use crate::vector_store::ChunkId;
use std::collections::HashMap;

const CONTEXT_SEPARATOR: &str = "\n\n";

/// What the prompt asks the model to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    QuizGeneration {
        kind: QuestionKind,
        count: usize,
        difficulty: Difficulty,
        topic: Option<String>,
    },
    TutorAnswer {
        question: String,
        mode: TutorMode,
    },
    /// Always withholds the answer.
    Hint {
        question: String,
    },
    Explanation {
        question: String,
        correct_answer: String,
        student_answer: String,
    },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::QuizGeneration { .. } => "quiz_generation",
            Task::TutorAnswer { .. } => "tutor_answer",
            Task::Hint { .. } => "hint",
            Task::Explanation { .. } => "explanation",
        }
    }
}

/// Character budgets for one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBudget {
    pub context_chars: usize,
    pub history_chars: usize,
    pub history_turns: usize,
}

impl From<&RetrievalSettings> for PromptBudget {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            context_chars: settings.context_char_budget,
            history_chars: settings.history_char_budget,
            history_turns: settings.history_turn_budget,
        }
    }
}

/// A rendered prompt and what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedPrompt {
    pub text: String,
    /// Chunks included, in rank order.
    pub context_ids: Vec<ChunkId>,
    pub dropped_chunks: usize,
    pub dropped_turns: usize,
    /// False when the no-context instruction was used.
    pub grounded: bool,
}

/// Builds prompts from templates, retrieved context and history.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    prompts: Prompts,
    budget: PromptBudget,
}

impl PromptComposer {
    pub fn new(prompts: Prompts, budget: PromptBudget) -> Self {
        Self { prompts, budget }
    }

    pub fn budget(&self) -> PromptBudget {
        self.budget
    }

    pub fn compose(
        &self,
        task: &Task,
        context: &RetrievedContext,
        history: &[Turn],
        quiz_context: Option<&str>,
    ) -> ComposedPrompt {
        let (context_text, context_ids, dropped_chunks) = self.render_context(context);
        let grounded = !context_ids.is_empty();
        let context_text = if grounded {
            context_text
        } else {
            self.prompts.tutor.no_context.clone()
        };

        let mut vars = HashMap::new();
        vars.insert("context".to_string(), context_text);

        let mut dropped_turns = 0;
        let template = match task {
            Task::QuizGeneration {
                kind,
                count,
                difficulty,
                topic,
            } => {
                vars.insert("count".to_string(), count.to_string());
                vars.insert("difficulty".to_string(), difficulty.to_string());
                vars.insert(
                    "topic".to_string(),
                    topic
                        .as_deref()
                        .map(|t| format!("- Focus the questions on: {}\n", t))
                        .unwrap_or_default(),
                );
                match kind {
                    QuestionKind::Mcq => &self.prompts.quiz.mcq,
                    QuestionKind::Open => &self.prompts.quiz.open,
                }
            }
            Task::TutorAnswer { question, mode } => {
                dropped_turns = self.insert_conversation(&mut vars, history, quiz_context);
                vars.insert("question".to_string(), question.clone());
                match mode {
                    TutorMode::Explain => &self.prompts.tutor.answer,
                    TutorMode::Tutor => &self.prompts.tutor.guide,
                    TutorMode::Hint => &self.prompts.tutor.hint,
                }
            }
            Task::Hint { question } => {
                dropped_turns = self.insert_conversation(&mut vars, history, quiz_context);
                vars.insert("question".to_string(), question.clone());
                &self.prompts.tutor.hint
            }
            Task::Explanation {
                question,
                correct_answer,
                student_answer,
            } => {
                vars.insert("question".to_string(), question.clone());
                vars.insert("correct_answer".to_string(), correct_answer.clone());
                vars.insert("student_answer".to_string(), student_answer.clone());
                &self.prompts.tutor.explanation
            }
        };

        ComposedPrompt {
            text: self.prompts.render_with_custom(template, &vars),
            context_ids,
            dropped_chunks,
            dropped_turns,
            grounded,
        }
    }

    /// Rank-ordered prefix of the context that fits the budget.
    fn render_context(&self, context: &RetrievedContext) -> (String, Vec<ChunkId>, usize) {
        let chunks = context.chunks();
        let mut blocks: Vec<String> = Vec::new();
        let mut ids = Vec::new();
        let mut used = 0;

        for chunk in chunks {
            let block = format!("[{}] {}\n{}", blocks.len() + 1, chunk.document_title, chunk.text);
            let cost = block.chars().count()
                + if blocks.is_empty() { 0 } else { CONTEXT_SEPARATOR.len() };
            if used + cost > self.budget.context_chars {
                break;
            }
            used += cost;
            blocks.push(block);
            ids.push(chunk.chunk_id);
        }

        let dropped = chunks.len() - ids.len();
        (blocks.join(CONTEXT_SEPARATOR), ids, dropped)
    }

    fn insert_conversation(
        &self,
        vars: &mut HashMap<String, String>,
        history: &[Turn],
        quiz_context: Option<&str>,
    ) -> usize {
        let (history_text, dropped) = self.render_history(history);
        vars.insert("history".to_string(), history_text);
        vars.insert(
            "quiz_context".to_string(),
            quiz_context
                .filter(|q| !q.trim().is_empty())
                .map(|q| format!("Current quiz:\n{}\n\n", q.trim()))
                .unwrap_or_default(),
        );
        dropped
    }

    /// Most recent successful turns within both history budgets.
    fn render_history(&self, history: &[Turn]) -> (String, usize) {
        let usable: Vec<&Turn> = history.iter().filter(|t| !t.is_failed()).collect();

        let mut kept: Vec<String> = Vec::new();
        let mut used = 0;
        for turn in usable.iter().rev() {
            if kept.len() >= self.budget.history_turns {
                break;
            }
            let speaker = match turn.role {
                Role::User => "Student",
                Role::Assistant => "Tutor",
            };
            let line = format!("{}: {}", speaker, turn.text);
            let cost = line.chars().count() + 1;
            if used + cost > self.budget.history_chars {
                break;
            }
            used += cost;
            kept.push(line);
        }

        let dropped = usable.len() - kept.len();
        if kept.is_empty() {
            return (String::new(), dropped);
        }
        kept.reverse();
        (format!("Conversation so far:\n{}\n\n", kept.join("\n")), dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::RetrievedChunk;
    use uuid::Uuid;

    fn chunk(seq: u32, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: ChunkId::new(Uuid::nil(), seq),
            document_title: "Bio".into(),
            text: text.into(),
            start_offset: 0,
            end_offset: text.len(),
            score: 1.0 - seq as f32 * 0.1,
        }
    }

    fn composer(context_chars: usize, history_chars: usize, history_turns: usize) -> PromptComposer {
        PromptComposer::new(
            Prompts::default(),
            PromptBudget {
                context_chars,
                history_chars,
                history_turns,
            },
        )
    }

    fn tutor_task() -> Task {
        Task::TutorAnswer {
            question: "What is ATP?".into(),
            mode: TutorMode::Explain,
        }
    }

    #[test]
    fn test_drops_lowest_ranked_chunks_whole() {
        let context = RetrievedContext::Chunks(vec![
            chunk(0, &"a".repeat(40)),
            chunk(1, &"b".repeat(40)),
            chunk(2, &"c".repeat(40)),
        ]);
        // Each block is "[n] Bio\n" (8 chars) + 40 chars; two blocks plus separator fit in 100.
        let prompt = composer(100, 1000, 10).compose(&tutor_task(), &context, &[], None);

        assert_eq!(prompt.context_ids.len(), 2);
        assert_eq!(prompt.dropped_chunks, 1);
        assert!(prompt.text.contains(&"b".repeat(40)));
        assert!(!prompt.text.contains(&"c".repeat(40)));
        assert!(prompt.grounded);
    }

    #[test]
    fn test_stops_at_first_chunk_that_does_not_fit() {
        let context = RetrievedContext::Chunks(vec![
            chunk(0, &"a".repeat(40)),
            chunk(1, &"b".repeat(200)),
            chunk(2, &"c".repeat(5)),
        ]);
        let prompt = composer(100, 1000, 10).compose(&tutor_task(), &context, &[], None);
        assert_eq!(prompt.context_ids, vec![ChunkId::new(Uuid::nil(), 0)]);
        assert_eq!(prompt.dropped_chunks, 2);
    }

    #[test]
    fn test_no_context_instruction() {
        let c = composer(1000, 1000, 10);
        let prompt = c.compose(&tutor_task(), &RetrievedContext::NoContext, &[], None);
        assert!(!prompt.grounded);
        assert!(prompt.text.contains("No relevant study material"));

        // A first chunk larger than the whole budget also falls back.
        let huge = RetrievedContext::Chunks(vec![chunk(0, &"x".repeat(2000))]);
        let prompt = c.compose(&tutor_task(), &huge, &[], None);
        assert!(!prompt.grounded);
        assert_eq!(prompt.dropped_chunks, 1);
    }

    #[test]
    fn test_history_newest_first_rendered_oldest_first() {
        let mut failed = Turn::user("this failed");
        failed.mark_failed("timeout");
        let history = vec![
            Turn::user("first question"),
            Turn::assistant("first answer", vec![]),
            failed,
            Turn::user("second question"),
            Turn::assistant("second answer", vec![]),
        ];

        let prompt = composer(1000, 1000, 3).compose(&tutor_task(), &RetrievedContext::NoContext, &history, None);

        assert!(!prompt.text.contains("this failed"));
        assert!(!prompt.text.contains("first question"));
        assert_eq!(prompt.dropped_turns, 1);
        let a = prompt.text.find("first answer").unwrap();
        let b = prompt.text.find("second question").unwrap();
        let c = prompt.text.find("second answer").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_history_char_budget() {
        let history = vec![Turn::user("x".repeat(50)), Turn::user("y".repeat(50))];
        // "Student: " + 50 + newline = 60 chars per turn.
        let prompt = composer(1000, 100, 10).compose(&tutor_task(), &RetrievedContext::NoContext, &history, None);
        assert!(prompt.text.contains(&"y".repeat(50)));
        assert!(!prompt.text.contains(&"x".repeat(50)));
    }

    #[test]
    fn test_quiz_prompt_parameters() {
        let task = Task::QuizGeneration {
            kind: QuestionKind::Mcq,
            count: 5,
            difficulty: Difficulty::Hard,
            topic: Some("cell respiration".into()),
        };
        let context = RetrievedContext::Chunks(vec![chunk(0, "Mitochondria make ATP.")]);
        let prompt = composer(1000, 1000, 10).compose(&task, &context, &[], None);

        assert!(prompt.text.contains("EXACTLY 5 multiple choice"));
        assert!(prompt.text.contains("hard difficulty"));
        assert!(prompt.text.contains("Focus the questions on: cell respiration"));
        assert!(prompt.text.contains("Mitochondria make ATP."));
    }

    #[test]
    fn test_hint_and_quiz_context() {
        let task = Task::Hint {
            question: "Is B correct?".into(),
        };
        let prompt = composer(1000, 1000, 10).compose(
            &task,
            &RetrievedContext::NoContext,
            &[],
            Some("Question 1: Where is ATP made?"),
        );
        assert!(prompt.text.contains("Never state the final answer"));
        assert!(prompt.text.contains("Current quiz:\nQuestion 1: Where is ATP made?"));
    }

    #[test]
    fn test_deterministic() {
        let context = RetrievedContext::Chunks(vec![chunk(0, "alpha"), chunk(1, "beta")]);
        let history = vec![Turn::user("hello")];
        let c = composer(1000, 1000, 10);
        let a = c.compose(&tutor_task(), &context, &history, Some("quiz"));
        let b = c.compose(&tutor_task(), &context, &history, Some("quiz"));
        assert_eq!(a, b);
    }
}
