//! Answer grading.
//!
//! Multiple choice is an exact index match. Open answers are scored by
//! embedding similarity to the reference answer through a threshold table,
//! with an optional model-written judgment appended as feedback.

use super::model::{Question, QuestionResult, SubmittedAnswer};
use crate::config::{GradingBand, Prompts};
use crate::embedding::Embedder;
use crate::error::{BuddyError, Result};
use crate::generation::GenerationClient;
use crate::vector_store::cosine_similarity;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const PENDING_REVIEW: &str = "Ungraded: pending manual review.";

/// Highest band score whose threshold `similarity` reaches; 0 if none.
///
/// Taking the maximum keeps scoring monotonic in similarity for any table.
pub fn score_for_similarity(bands: &[GradingBand], similarity: f32) -> u8 {
    bands
        .iter()
        .filter(|b| similarity >= b.min_similarity)
        .map(|b| b.score)
        .max()
        .unwrap_or(0)
}

/// Grade a multiple choice answer.
pub fn grade_mcq(correct_index: usize, choice: usize) -> QuestionResult {
    let correct = choice == correct_index;
    QuestionResult {
        answer: SubmittedAnswer::Choice(choice),
        score: Some(if correct { 100 } else { 0 }),
        correct: Some(correct),
        similarity: None,
        feedback: None,
    }
}

/// Optional qualitative judgment of open answers.
#[derive(Clone)]
pub struct Judge {
    pub generator: GenerationClient,
    pub prompts: Prompts,
}

/// Grades open-ended answers.
#[derive(Clone)]
pub struct Grader {
    embedder: Arc<dyn Embedder>,
    bands: Vec<GradingBand>,
    judge: Option<Judge>,
}

impl Grader {
    pub fn new(embedder: Arc<dyn Embedder>, bands: Vec<GradingBand>, judge: Option<Judge>) -> Self {
        Self {
            embedder,
            bands,
            judge,
        }
    }

    /// Grade one answer against its question. Never fails: scoring backend
    /// errors yield a result pending manual review.
    pub async fn grade(&self, question: &Question, answer: &SubmittedAnswer) -> Result<QuestionResult> {
        match (question, answer) {
            (Question::Mcq { correct_index, options, .. }, SubmittedAnswer::Choice(choice)) => {
                if *choice >= options.len() {
                    return Err(BuddyError::InvalidInput(format!(
                        "option {} does not exist",
                        choice
                    )));
                }
                Ok(grade_mcq(*correct_index, *choice))
            }
            (
                Question::Open {
                    prompt,
                    reference_answer,
                    rubric,
                },
                SubmittedAnswer::Text(text),
            ) => Ok(self.grade_open(prompt, reference_answer, rubric, text).await),
            _ => Err(BuddyError::InvalidInput(format!(
                "answer type does not match question \"{}\"",
                question.prompt()
            ))),
        }
    }

    async fn grade_open(&self, prompt: &str, reference: &str, rubric: &str, text: &str) -> QuestionResult {
        let answer = SubmittedAnswer::Text(text.to_string());

        if text.trim().is_empty() {
            return QuestionResult {
                answer,
                score: Some(0),
                correct: Some(false),
                similarity: None,
                feedback: Some("No answer given.".to_string()),
            };
        }

        let similarity = match self.similarity(reference, text).await {
            Ok(s) => s,
            Err(e) => {
                let e = BuddyError::Grading(e.to_string());
                warn!("Open answer left for manual review: {}", e);
                return QuestionResult {
                    answer,
                    score: None,
                    correct: None,
                    similarity: None,
                    feedback: Some(PENDING_REVIEW.to_string()),
                };
            }
        };

        let score = score_for_similarity(&self.bands, similarity);
        debug!(similarity, score, "Graded open answer");

        let feedback = match &self.judge {
            Some(judge) => match Self::judgment(judge, prompt, reference, rubric, text).await {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!("Judgment unavailable, keeping numeric score: {}", e);
                    None
                }
            },
            None => None,
        };

        QuestionResult {
            answer,
            score: Some(score),
            correct: Some(score == 100),
            similarity: Some(similarity),
            feedback,
        }
    }

    async fn similarity(&self, reference: &str, text: &str) -> Result<f32> {
        let vectors = self
            .embedder
            .embed_batch(&[reference.to_string(), text.to_string()])
            .await?;
        match vectors.as_slice() {
            [a, b] => Ok(cosine_similarity(a, b)),
            _ => Err(BuddyError::Embedding("expected two embeddings".into())),
        }
    }

    async fn judgment(judge: &Judge, prompt: &str, reference: &str, rubric: &str, text: &str) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("question".to_string(), prompt.to_string());
        vars.insert("reference_answer".to_string(), reference.to_string());
        vars.insert("rubric".to_string(), rubric.to_string());
        vars.insert("answer".to_string(), text.to_string());
        let rendered = judge.prompts.render_with_custom(&judge.prompts.quiz.judgment, &vars);
        judge.generator.generate(&rendered).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmSettings, QuizSettings};
    use crate::embedding::HashingEmbedder;
    use crate::generation::testing::{ScriptedModel, Step};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Down;

    #[async_trait]
    impl Embedder for Down {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(BuddyError::EmbeddingService("refused".into()))
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(BuddyError::EmbeddingService("refused".into()))
        }
        fn dimensions(&self) -> usize {
            8
        }
    }

    fn open_question() -> Question {
        Question::Open {
            prompt: "What does the mitochondria do?".into(),
            reference_answer: "The mitochondria produces ATP energy for the cell through respiration.".into(),
            rubric: "ATP, energy, respiration".into(),
        }
    }

    fn grader(judge: Option<Judge>) -> Grader {
        Grader::new(
            Arc::new(HashingEmbedder::new(512)),
            QuizSettings::default().grading_bands,
            judge,
        )
    }

    #[test]
    fn test_band_table() {
        let bands = QuizSettings::default().grading_bands;
        assert_eq!(score_for_similarity(&bands, 0.9), 100);
        assert_eq!(score_for_similarity(&bands, 0.85), 100);
        assert_eq!(score_for_similarity(&bands, 0.7), 50);
        assert_eq!(score_for_similarity(&bands, 0.2), 0);
    }

    #[test]
    fn test_band_scoring_is_monotonic() {
        let bands = QuizSettings::default().grading_bands;
        let mut previous = 0;
        for step in 0..=100 {
            let score = score_for_similarity(&bands, step as f32 / 100.0);
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn test_mcq_exact_match() {
        for choice in 0..4 {
            let result = grade_mcq(2, choice);
            assert_eq!(result.score, Some(if choice == 2 { 100 } else { 0 }));
        }
    }

    #[tokio::test]
    async fn test_open_answer_closer_scores_no_lower() {
        let g = grader(None);
        let q = open_question();
        let close = g
            .grade(&q, &SubmittedAnswer::Text("The mitochondria produces ATP energy for the cell through respiration.".into()))
            .await
            .unwrap();
        let far = g
            .grade(&q, &SubmittedAnswer::Text("Paris is the capital of France.".into()))
            .await
            .unwrap();

        assert!(close.similarity.unwrap() > far.similarity.unwrap());
        assert!(close.score >= far.score);
        assert_eq!(close.score, Some(100));
        assert_eq!(far.score, Some(0));
    }

    #[tokio::test]
    async fn test_embedding_failure_pending_review() {
        let g = Grader::new(Arc::new(Down), QuizSettings::default().grading_bands, None);
        let result = g
            .grade(&open_question(), &SubmittedAnswer::Text("ATP".into()))
            .await
            .unwrap();
        assert!(result.pending_review());
        assert_eq!(result.feedback.as_deref(), Some(PENDING_REVIEW));
    }

    #[tokio::test]
    async fn test_judgment_failure_keeps_numeric_score() {
        let model = Arc::new(ScriptedModel::new(vec![Step::Fail(BuddyError::GenerationRejected("no".into()))]));
        let generator = GenerationClient::new(model, &LlmSettings::default()).with_backoff(Duration::from_millis(1));
        let g = grader(Some(Judge {
            generator,
            prompts: Prompts::default(),
        }));

        let result = g
            .grade(&open_question(), &SubmittedAnswer::Text("Mitochondria produce ATP energy.".into()))
            .await
            .unwrap();
        assert!(result.score.is_some());
        assert!(result.feedback.is_none());
    }

    #[tokio::test]
    async fn test_judgment_appended() {
        let model = Arc::new(ScriptedModel::always("Good mention of ATP; add respiration."));
        let generator = GenerationClient::new(model.clone(), &LlmSettings::default());
        let g = grader(Some(Judge {
            generator,
            prompts: Prompts::default(),
        }));

        let result = g
            .grade(&open_question(), &SubmittedAnswer::Text("Mitochondria produce ATP.".into()))
            .await
            .unwrap();
        assert_eq!(result.feedback.as_deref(), Some("Good mention of ATP; add respiration."));
        assert!(model.last_prompt().unwrap().contains("Student answer: Mitochondria produce ATP."));
    }

    #[tokio::test]
    async fn test_mismatched_answer_type() {
        let g = grader(None);
        assert!(g.grade(&open_question(), &SubmittedAnswer::Choice(1)).await.is_err());
    }
}
