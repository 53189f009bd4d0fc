//! Quiz lifecycle: `requested -> generating -> ready | failed`.
//!
//! Generation runs as one unit. Questions are only written together with the
//! `ready` status, so a partial set is never visible. Validation failures are
//! terminal for the request; regenerating is an explicit new request.

use super::grading::Grader;
use super::model::{
    Attempt, Question, QuestionResult, Quiz, QuizAnalytics, QuizRequest, QuizStatus,
    SubmittedAnswer,
};
use super::parser::parse_questions;
use crate::config::{NoContextPolicy, QuizSettings};
use crate::error::{BuddyError, Result};
use crate::generation::GenerationClient;
use crate::ingest::Document;
use crate::rag::{PromptComposer, RetrievedContext, Retriever, Task};
use crate::store::Repository;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const NO_CONTEXT_REASON: &str = "no_context";
pub const CANCELLED_REASON: &str = "cancelled";
pub const STALE_REASON: &str = "generation did not finish in time";

/// Default name for a saved quiz: `Quiz <n> - <title> - <MM/DD/YYYY>`.
pub fn default_quiz_name(number: usize, document_title: &str, date: DateTime<Utc>) -> String {
    format!("Quiz {} - {} - {}", number, document_title, date.format("%m/%d/%Y"))
}

/// Reason recorded on a failed quiz. Backend details stay in the logs.
fn failure_reason(e: &BuddyError) -> String {
    match e {
        BuddyError::Validation(detail) => detail.clone(),
        _ => e.user_message(),
    }
}

struct Inner {
    repo: Repository,
    retriever: Arc<Retriever>,
    composer: Arc<PromptComposer>,
    generator: GenerationClient,
    grader: Grader,
    settings: QuizSettings,
    quiz_k: usize,
    explain_k: usize,
    tasks: Mutex<HashMap<Uuid, AbortHandle>>,
    /// Held across every load-then-save of a quiz status, so a cancel and a
    /// finishing generation cannot interleave.
    settle: tokio::sync::Mutex<()>,
}

/// Generates, stores and grades quizzes.
#[derive(Clone)]
pub struct QuizEngine {
    inner: Arc<Inner>,
}

impl QuizEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Repository,
        retriever: Arc<Retriever>,
        composer: Arc<PromptComposer>,
        generator: GenerationClient,
        grader: Grader,
        settings: QuizSettings,
        quiz_k: usize,
        explain_k: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repo,
                retriever,
                composer,
                generator,
                grader,
                settings,
                quiz_k,
                explain_k,
                tasks: Mutex::new(HashMap::new()),
                settle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn tasks(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, AbortHandle>>> {
        self.inner
            .tasks
            .lock()
            .map_err(|e| BuddyError::Store(format!("Failed to acquire lock: {}", e)))
    }

    /// Clamp a requested question count to the configured range.
    pub fn clamp_count(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.inner.settings.default_question_count)
            .clamp(1, self.inner.settings.max_question_count.max(1))
    }

    /// Validate a request and record the quiz as `requested`.
    async fn create(&self, request: QuizRequest) -> Result<Quiz> {
        if request.document_ids.is_empty() {
            return Err(BuddyError::InvalidInput("a quiz needs at least one document".into()));
        }
        let mut documents = Vec::with_capacity(request.document_ids.len());
        for id in &request.document_ids {
            documents.push(self.inner.repo.require::<Document>(&id.to_string()).await?);
        }

        let now = Utc::now();
        let name = match request.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => {
                self.ensure_unique_name(&request.document_ids, name, None).await?;
                name.to_string()
            }
            None => self.next_default_name(&request.document_ids, &documents[0].title, now).await?,
        };

        let quiz = Quiz {
            id: Uuid::new_v4(),
            name,
            owner: request.owner,
            document_ids: request.document_ids,
            kind: request.kind,
            difficulty: request.difficulty,
            requested_count: self.clamp_count(request.count),
            topic: request.topic.filter(|t| !t.trim().is_empty()),
            questions: Vec::new(),
            status: QuizStatus::Requested,
            created_at: now,
            updated_at: now,
        };
        self.inner.repo.save(&quiz).await?;
        info!("Quiz {} requested ({} x {})", quiz.id, quiz.requested_count, quiz.kind);
        Ok(quiz)
    }

    /// Create a quiz and generate it before returning. The result is `ready` or `failed`.
    pub async fn generate(&self, request: QuizRequest) -> Result<Quiz> {
        let quiz = self.create(request).await?;
        self.run(quiz).await
    }

    /// Create a quiz and generate it in the background. Returns the `requested` quiz.
    pub async fn request(&self, request: QuizRequest) -> Result<Quiz> {
        let quiz = self.create(request).await?;
        let engine = self.clone();
        let id = quiz.id;
        let background = quiz.clone();

        let mut tasks = self.tasks()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = engine.run(background).await {
                error!("Quiz {} generation task failed: {}", id, e);
            }
            if let Ok(mut tasks) = engine.inner.tasks.lock() {
                tasks.remove(&id);
            }
        });
        tasks.insert(id, handle.abort_handle());
        Ok(quiz)
    }

    /// Drive one quiz through generation and persist the terminal state.
    #[instrument(skip(self, quiz), fields(quiz = %quiz.id))]
    async fn run(&self, mut quiz: Quiz) -> Result<Quiz> {
        {
            let _settle = self.inner.settle.lock().await;
            match self.inner.repo.load::<Quiz>(&quiz.id.to_string()).await? {
                None => return Err(BuddyError::Cancelled(format!("quiz {} was deleted", quiz.id))),
                Some(current) if current.status.is_terminal() => return Ok(current),
                Some(_) => {}
            }
            quiz.status = QuizStatus::Generating;
            quiz.updated_at = Utc::now();
            self.inner.repo.save(&quiz).await?;
        }

        match self.produce_questions(&quiz).await {
            Ok(questions) => {
                quiz.questions = questions;
                quiz.status = QuizStatus::Ready;
                info!("Quiz {} ready with {} questions", quiz.id, quiz.questions.len());
            }
            Err(e) => {
                error!("Quiz {} failed: {}", quiz.id, e);
                quiz.status = QuizStatus::Failed {
                    reason: failure_reason(&e),
                };
            }
        }
        quiz.updated_at = Utc::now();
        self.finish(quiz).await
    }

    /// Persist a terminal state unless the quiz was deleted or already settled meanwhile.
    async fn finish(&self, quiz: Quiz) -> Result<Quiz> {
        let _settle = self.inner.settle.lock().await;
        match self.inner.repo.load::<Quiz>(&quiz.id.to_string()).await? {
            None => Err(BuddyError::Cancelled(format!("quiz {} was deleted", quiz.id))),
            Some(current) if current.status.is_terminal() => Ok(current),
            Some(_) => {
                self.inner.repo.save(&quiz).await?;
                Ok(quiz)
            }
        }
    }

    fn retrieval_query(quiz: &Quiz) -> String {
        let topic = quiz.topic.as_deref().unwrap_or("the main concepts");
        format!(
            "{} {} quiz {} questions about {}",
            quiz.difficulty, quiz.kind, quiz.requested_count, topic
        )
    }

    async fn produce_questions(&self, quiz: &Quiz) -> Result<Vec<Question>> {
        let query = Self::retrieval_query(quiz);
        let context = match self
            .inner
            .retriever
            .retrieve(&query, &quiz.document_ids, self.inner.quiz_k)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {}", e);
                RetrievedContext::NoContext
            }
        };

        if context.is_no_context() && self.inner.settings.no_context_policy == NoContextPolicy::Fail {
            return Err(BuddyError::Validation(NO_CONTEXT_REASON.to_string()));
        }

        let task = Task::QuizGeneration {
            kind: quiz.kind,
            count: quiz.requested_count,
            difficulty: quiz.difficulty,
            topic: quiz.topic.clone(),
        };
        let prompt = self.inner.composer.compose(&task, &context, &[], None);
        let output = self.inner.generator.generate(&prompt.text).await?;

        parse_questions(
            &output,
            quiz.kind,
            quiz.requested_count,
            self.inner.settings.mcq_option_count,
        )
        .inspect_err(|e| {
            let preview: String = output.chars().take(500).collect();
            warn!("Quiz output failed validation ({}); raw output: {}", e, preview);
        })
    }

    pub async fn get(&self, quiz_id: Uuid) -> Result<Quiz> {
        self.inner.repo.require(&quiz_id.to_string()).await
    }

    /// Quizzes, optionally filtered by document and owner, oldest first.
    pub async fn list(&self, document_id: Option<Uuid>, owner: Option<&str>) -> Result<Vec<Quiz>> {
        let mut quizzes: Vec<Quiz> = self.inner.repo.all().await?;
        quizzes.retain(|q| {
            document_id.is_none_or(|d| q.covers(d)) && owner.is_none_or(|o| q.owner == o)
        });
        quizzes.sort_by_key(|q| q.created_at);
        Ok(quizzes)
    }

    async fn ensure_unique_name(&self, document_ids: &[Uuid], name: &str, except: Option<Uuid>) -> Result<()> {
        let wanted = name.trim().to_lowercase();
        for quiz in self.inner.repo.all::<Quiz>().await? {
            if Some(quiz.id) == except {
                continue;
            }
            let shares_document = document_ids.iter().any(|d| quiz.covers(*d));
            if shares_document && quiz.name.trim().to_lowercase() == wanted {
                return Err(BuddyError::InvalidInput(format!(
                    "a quiz named \"{}\" already exists for this document",
                    name.trim()
                )));
            }
        }
        Ok(())
    }

    async fn next_default_name(&self, document_ids: &[Uuid], title: &str, now: DateTime<Utc>) -> Result<String> {
        let existing = self.list(Some(document_ids[0]), None).await?;
        let mut number = existing.len() + 1;
        loop {
            let name = default_quiz_name(number, title, now);
            if !existing.iter().any(|q| q.name.eq_ignore_ascii_case(&name)) {
                return Ok(name);
            }
            number += 1;
        }
    }

    /// Rename a quiz. Names are unique among quizzes sharing a document.
    pub async fn rename(&self, quiz_id: Uuid, new_name: &str) -> Result<Quiz> {
        let name = new_name.trim();
        if name.is_empty() {
            return Err(BuddyError::InvalidInput("quiz name cannot be empty".into()));
        }
        let mut quiz = self.get(quiz_id).await?;
        self.ensure_unique_name(&quiz.document_ids, name, Some(quiz_id)).await?;

        quiz.name = name.to_string();
        quiz.updated_at = Utc::now();
        self.inner.repo.save(&quiz).await?;
        Ok(quiz)
    }

    /// Abort an in-flight generation and mark the quiz failed.
    pub async fn cancel(&self, quiz_id: Uuid) -> Result<Quiz> {
        if let Some(handle) = self.tasks()?.remove(&quiz_id) {
            handle.abort();
        }
        let _settle = self.inner.settle.lock().await;
        let mut quiz = self.get(quiz_id).await?;
        if !quiz.status.is_terminal() {
            quiz.status = QuizStatus::Failed {
                reason: CANCELLED_REASON.to_string(),
            };
            quiz.updated_at = Utc::now();
            self.inner.repo.save(&quiz).await?;
            info!("Quiz {} cancelled", quiz_id);
        }
        Ok(quiz)
    }

    /// Delete a quiz, cancelling its generation if still running.
    pub async fn delete(&self, quiz_id: Uuid) -> Result<bool> {
        if let Some(handle) = self.tasks()?.remove(&quiz_id) {
            handle.abort();
        }
        let removed = {
            let _settle = self.inner.settle.lock().await;
            self.inner.repo.remove::<Quiz>(&quiz_id.to_string()).await?
        };
        if removed {
            for stats in self.inner.repo.all::<QuizAnalytics>().await? {
                if stats.quiz_id == quiz_id {
                    self.inner
                        .repo
                        .remove::<QuizAnalytics>(&QuizAnalytics::key_for(&stats.user, quiz_id))
                        .await?;
                }
            }
        }
        Ok(removed)
    }

    /// Delete every quiz that uses `document_id`. Returns how many were removed.
    pub async fn delete_for_document(&self, document_id: Uuid) -> Result<usize> {
        let mut removed = 0;
        for quiz in self.list(Some(document_id), None).await? {
            if self.delete(quiz.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Mark quizzes stuck before `ready`/`failed` for too long as failed.
    pub async fn reap_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::seconds(self.inner.settings.stale_after_seconds as i64);
        let mut reaped = 0;
        let _settle = self.inner.settle.lock().await;
        for mut quiz in self.inner.repo.all::<Quiz>().await? {
            if quiz.status.is_terminal() || quiz.updated_at > cutoff {
                continue;
            }
            if let Some(handle) = self.tasks()?.remove(&quiz.id) {
                handle.abort();
            }
            quiz.status = QuizStatus::Failed {
                reason: STALE_REASON.to_string(),
            };
            quiz.updated_at = now;
            self.inner.repo.save(&quiz).await?;
            reaped += 1;
        }
        if reaped > 0 {
            warn!("Reaped {} stale quizzes", reaped);
        }
        Ok(reaped)
    }

    /// Grade a submission and record it as a new attempt.
    #[instrument(skip(self, answers))]
    pub async fn submit(&self, quiz_id: Uuid, user: &str, answers: Vec<SubmittedAnswer>) -> Result<Attempt> {
        let quiz = self.get(quiz_id).await?;
        if !quiz.is_ready() {
            return Err(BuddyError::InvalidInput(format!("quiz {} is not ready", quiz_id)));
        }
        if answers.len() != quiz.questions.len() {
            return Err(BuddyError::InvalidInput(format!(
                "expected {} answers, got {}",
                quiz.questions.len(),
                answers.len()
            )));
        }

        let mut results: Vec<QuestionResult> = Vec::with_capacity(answers.len());
        for (question, answer) in quiz.questions.iter().zip(&answers) {
            results.push(self.inner.grader.grade(question, answer).await?);
        }

        let graded: Vec<f32> = results.iter().filter_map(|r| r.score).map(f32::from).collect();
        let score = if graded.is_empty() {
            None
        } else {
            Some(graded.iter().sum::<f32>() / graded.len() as f32)
        };

        let attempt = Attempt {
            id: Uuid::new_v4(),
            quiz_id,
            user: user.to_string(),
            results,
            score,
            submitted_at: Utc::now(),
        };
        self.inner.repo.save(&attempt).await?;

        let key = QuizAnalytics::key_for(user, quiz_id);
        let previous = self.inner.repo.load::<QuizAnalytics>(&key).await?;
        let stats = QuizAnalytics::record(previous, &attempt);
        self.inner.repo.save(&stats).await?;

        info!(
            "Attempt {} on quiz {} scored {:?} ({} pending review)",
            attempt.id,
            quiz_id,
            attempt.score,
            attempt.pending_review()
        );
        Ok(attempt)
    }

    /// A user's attempts on a quiz, oldest first.
    pub async fn attempts(&self, quiz_id: Uuid, user: &str) -> Result<Vec<Attempt>> {
        let mut attempts: Vec<Attempt> = self.inner.repo.all().await?;
        attempts.retain(|a| a.quiz_id == quiz_id && a.user == user);
        attempts.sort_by_key(|a| a.submitted_at);
        Ok(attempts)
    }

    pub async fn analytics(&self, quiz_id: Uuid, user: &str) -> Result<Option<QuizAnalytics>> {
        self.inner.repo.load(&QuizAnalytics::key_for(user, quiz_id)).await
    }

    fn question(quiz: &Quiz, index: usize) -> Result<&Question> {
        quiz.questions.get(index).ok_or_else(|| {
            BuddyError::NotFound(format!("question {} of quiz {}", index + 1, quiz.id))
        })
    }

    async fn context_for(&self, quiz: &Quiz, query: &str) -> RetrievedContext {
        match self
            .inner
            .retriever
            .retrieve(query, &quiz.document_ids, self.inner.explain_k)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {}", e);
                RetrievedContext::NoContext
            }
        }
    }

    /// Explain why the correct answer is right and the given one is not.
    pub async fn explain_answer(&self, quiz_id: Uuid, index: usize, answer: &SubmittedAnswer) -> Result<String> {
        let quiz = self.get(quiz_id).await?;
        let question = Self::question(&quiz, index)?;

        let student_answer = match (question, answer) {
            (Question::Mcq { options, .. }, SubmittedAnswer::Choice(i)) => options
                .get(*i)
                .map(|o| format!("{}) {}", super::model::option_letter(*i), o))
                .ok_or_else(|| BuddyError::InvalidInput(format!("option {} does not exist", i)))?,
            (_, SubmittedAnswer::Text(t)) => t.clone(),
            (_, SubmittedAnswer::Choice(i)) => {
                return Err(BuddyError::InvalidInput(format!("choice {} on an open question", i)));
            }
        };

        let context = self.context_for(&quiz, question.prompt()).await;
        let task = Task::Explanation {
            question: question.render(index + 1),
            correct_answer: question.correct_answer(),
            student_answer,
        };
        let prompt = self.inner.composer.compose(&task, &context, &[], None);
        self.inner.generator.generate(&prompt.text).await
    }

    /// A hint for one question that does not reveal the answer.
    pub async fn hint(&self, quiz_id: Uuid, index: usize) -> Result<String> {
        let quiz = self.get(quiz_id).await?;
        let question = Self::question(&quiz, index)?;

        let context = self.context_for(&quiz, question.prompt()).await;
        let task = Task::Hint {
            question: question.render(index + 1),
        };
        let prompt = self.inner.composer.compose(&task, &context, &[], None);
        self.inner.generator.generate(&prompt.text).await
    }
}
