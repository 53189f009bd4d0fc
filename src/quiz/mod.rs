//! Quiz generation, validation and grading.

mod engine;
pub mod grading;
mod model;
pub mod parser;

pub use engine::{default_quiz_name, QuizEngine, CANCELLED_REASON, NO_CONTEXT_REASON, STALE_REASON};
pub use grading::{Grader, Judge, PENDING_REVIEW};
pub use model::{
    option_index, option_letter, Attempt, Difficulty, Question, QuestionKind, QuestionResult,
    Quiz, QuizAnalytics, QuizRequest, QuizStatus, SubmittedAnswer,
};
pub use parser::parse_questions;
