//! Quiz, question, attempt and analytics records.

use crate::store::{Collection, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Question difficulty requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(format!("Unknown difficulty: {}", s)),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => write!(f, "easy"),
            Difficulty::Medium => write!(f, "medium"),
            Difficulty::Hard => write!(f, "hard"),
        }
    }
}

/// Question format of a quiz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    #[default]
    Mcq,
    Open,
}

impl std::str::FromStr for QuestionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mcq" | "multiple-choice" | "choice" => Ok(QuestionKind::Mcq),
            "open" | "open-ended" => Ok(QuestionKind::Open),
            _ => Err(format!("Unknown question type: {}", s)),
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionKind::Mcq => write!(f, "multiple choice"),
            QuestionKind::Open => write!(f, "open-ended"),
        }
    }
}

/// A validated quiz question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Question {
    Mcq {
        prompt: String,
        options: Vec<String>,
        correct_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    Open {
        prompt: String,
        reference_answer: String,
        rubric: String,
    },
}

impl Question {
    pub fn prompt(&self) -> &str {
        match self {
            Question::Mcq { prompt, .. } | Question::Open { prompt, .. } => prompt,
        }
    }

    pub fn kind(&self) -> QuestionKind {
        match self {
            Question::Mcq { .. } => QuestionKind::Mcq,
            Question::Open { .. } => QuestionKind::Open,
        }
    }

    /// The correct answer as display text, e.g. `B) Mitochondria`.
    pub fn correct_answer(&self) -> String {
        match self {
            Question::Mcq {
                options,
                correct_index,
                ..
            } => options
                .get(*correct_index)
                .map(|o| format!("{}) {}", option_letter(*correct_index), o))
                .unwrap_or_default(),
            Question::Open {
                reference_answer, ..
            } => reference_answer.clone(),
        }
    }

    /// Render for a prompt or terminal, without revealing the answer.
    pub fn render(&self, number: usize) -> String {
        match self {
            Question::Mcq {
                prompt, options, ..
            } => {
                let mut out = format!("Question {}: {}", number, prompt);
                for (i, option) in options.iter().enumerate() {
                    out.push_str(&format!("\n  {}) {}", option_letter(i), option));
                }
                out
            }
            Question::Open { prompt, .. } => format!("Question {}: {}", number, prompt),
        }
    }
}

/// `0 -> 'A'`, `1 -> 'B'`, ...
pub fn option_letter(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}

/// Inverse of [`option_letter`], case-insensitive.
pub fn option_index(letter: &str) -> Option<usize> {
    let mut chars = letter.trim().chars();
    let c = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !c.is_ascii_uppercase() {
        return None;
    }
    Some((c as u8 - b'A') as usize)
}

/// Lifecycle of a quiz. Attempts never change it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QuizStatus {
    Requested,
    Generating,
    Ready,
    Failed { reason: String },
}

impl QuizStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QuizStatus::Ready | QuizStatus::Failed { .. })
    }
}

/// Parameters of a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizRequest {
    pub owner: String,
    pub document_ids: Vec<Uuid>,
    #[serde(default)]
    pub kind: QuestionKind,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Clamped to the configured range; the default count when absent.
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A generated quiz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub document_ids: Vec<Uuid>,
    pub kind: QuestionKind,
    pub difficulty: Difficulty,
    pub requested_count: usize,
    pub topic: Option<String>,
    /// Empty until the quiz is ready.
    pub questions: Vec<Question>,
    pub status: QuizStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quiz {
    pub fn is_ready(&self) -> bool {
        self.status == QuizStatus::Ready
    }

    pub fn covers(&self, document_id: Uuid) -> bool {
        self.document_ids.contains(&document_id)
    }

    /// Every question rendered for a tutoring prompt, without answers.
    pub fn render_questions(&self) -> String {
        self.questions
            .iter()
            .enumerate()
            .map(|(i, q)| q.render(i + 1))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Record for Quiz {
    const COLLECTION: Collection = Collection::Quizzes;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// A submitted answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmittedAnswer {
    /// Index of the chosen option.
    Choice(usize),
    Text(String),
}

/// The graded result for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResult {
    pub answer: SubmittedAnswer,
    /// 0-100, or `None` when the answer awaits manual review.
    pub score: Option<u8>,
    pub correct: Option<bool>,
    /// Similarity to the reference answer, for open questions.
    pub similarity: Option<f32>,
    pub feedback: Option<String>,
}

impl QuestionResult {
    pub fn pending_review(&self) -> bool {
        self.score.is_none()
    }
}

/// One user's scored submission. Resubmitting creates a new attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub user: String,
    pub results: Vec<QuestionResult>,
    /// Mean of the graded question scores; `None` if nothing could be graded.
    pub score: Option<f32>,
    pub submitted_at: DateTime<Utc>,
}

impl Attempt {
    pub fn pending_review(&self) -> usize {
        self.results.iter().filter(|r| r.pending_review()).count()
    }
}

impl Record for Attempt {
    const COLLECTION: Collection = Collection::Attempts;

    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// Running statistics for one user on one quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAnalytics {
    pub quiz_id: Uuid,
    pub user: String,
    pub attempts: u32,
    /// Attempts that produced a score; the averages are over these.
    pub scored_attempts: u32,
    pub best_score: Option<f32>,
    pub average_score: Option<f32>,
    pub last_score: Option<f32>,
    pub last_attempt_at: DateTime<Utc>,
}

impl QuizAnalytics {
    pub fn key_for(user: &str, quiz_id: Uuid) -> String {
        format!("{}:{}", user, quiz_id)
    }

    /// Fold one attempt into the statistics.
    pub fn record(previous: Option<Self>, attempt: &Attempt) -> Self {
        let mut stats = previous.unwrap_or_else(|| Self {
            quiz_id: attempt.quiz_id,
            user: attempt.user.clone(),
            attempts: 0,
            scored_attempts: 0,
            best_score: None,
            average_score: None,
            last_score: None,
            last_attempt_at: attempt.submitted_at,
        });

        stats.attempts += 1;
        stats.last_attempt_at = attempt.submitted_at;
        stats.last_score = attempt.score;

        if let Some(score) = attempt.score {
            let n = stats.scored_attempts as f32;
            stats.average_score = Some(match stats.average_score {
                Some(avg) => (avg * n + score) / (n + 1.0),
                None => score,
            });
            stats.best_score = Some(stats.best_score.map_or(score, |b| b.max(score)));
            stats.scored_attempts += 1;
        }
        stats
    }
}

impl Record for QuizAnalytics {
    const COLLECTION: Collection = Collection::Analytics;

    fn key(&self) -> String {
        Self::key_for(&self.user, self.quiz_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_letters() {
        assert_eq!(option_letter(0), 'A');
        assert_eq!(option_letter(3), 'D');
        assert_eq!(option_index("c"), Some(2));
        assert_eq!(option_index(" D "), Some(3));
        assert_eq!(option_index("AB"), None);
        assert_eq!(option_index("1"), None);
    }

    #[test]
    fn test_question_serialization() {
        let q = Question::Mcq {
            prompt: "Where does glycolysis occur?".into(),
            options: vec!["Nucleus".into(), "Cytoplasm".into(), "Ribosome".into(), "Golgi".into()],
            correct_index: 1,
            explanation: None,
        };
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["type"], "mcq");
        assert_eq!(q.correct_answer(), "B) Cytoplasm");
        assert!(q.render(1).contains("D) Golgi"));
    }

    #[test]
    fn test_analytics_accumulate() {
        let quiz_id = Uuid::new_v4();
        let attempt = |score: Option<f32>| Attempt {
            id: Uuid::new_v4(),
            quiz_id,
            user: "ana".into(),
            results: Vec::new(),
            score,
            submitted_at: Utc::now(),
        };

        let stats = QuizAnalytics::record(None, &attempt(Some(40.0)));
        let stats = QuizAnalytics::record(Some(stats), &attempt(None));
        let stats = QuizAnalytics::record(Some(stats), &attempt(Some(80.0)));

        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.scored_attempts, 2);
        assert_eq!(stats.best_score, Some(80.0));
        assert_eq!(stats.average_score, Some(60.0));
        assert_eq!(stats.last_score, Some(80.0));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Hard".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert_eq!("open-ended".parse::<QuestionKind>().unwrap(), QuestionKind::Open);
        assert!("trivia".parse::<QuestionKind>().is_err());
    }
}
