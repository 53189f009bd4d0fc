//! Tutoring turns: `open -> active -> open`, `closed` is terminal.
//!
//! A failed turn is recorded with an error marker and the session returns to
//! `open`, so one bad generation never costs the conversation.

use super::model::{SessionState, Turn, TutorMode, TutoringSession};
use crate::config::TutorSettings;
use crate::error::{BuddyError, Result};
use crate::generation::GenerationClient;
use crate::ingest::Document;
use crate::rag::{format_sources, PromptComposer, RetrievedContext, Retriever, Task};
use crate::store::Repository;
use crate::vector_store::ChunkId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// The answer to one tutoring turn.
#[derive(Debug, Clone, Serialize)]
pub struct TutorReply {
    pub session_id: Uuid,
    pub mode: TutorMode,
    pub text: String,
    pub context_ids: Vec<ChunkId>,
    /// False when no study material backed the answer.
    pub grounded: bool,
    pub sources: String,
}

/// Marks a session as answering; released on drop, including cancellation.
struct TurnGuard<'a> {
    active: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.id);
        }
    }
}

/// Runs tutoring sessions over a document scope.
pub struct TutorEngine {
    repo: Repository,
    retriever: Arc<Retriever>,
    composer: Arc<PromptComposer>,
    generator: GenerationClient,
    settings: TutorSettings,
    top_k: usize,
    active: Mutex<HashSet<Uuid>>,
}

impl TutorEngine {
    pub fn new(
        repo: Repository,
        retriever: Arc<Retriever>,
        composer: Arc<PromptComposer>,
        generator: GenerationClient,
        settings: TutorSettings,
        top_k: usize,
    ) -> Self {
        Self {
            repo,
            retriever,
            composer,
            generator,
            settings,
            top_k,
            active: Mutex::new(HashSet::new()),
        }
    }

    fn begin_turn(&self, session_id: Uuid) -> Result<TurnGuard<'_>> {
        let mut active = self
            .active
            .lock()
            .map_err(|e| BuddyError::Store(format!("Failed to acquire lock: {}", e)))?;
        if !active.insert(session_id) {
            return Err(BuddyError::SessionBusy(session_id.to_string()));
        }
        Ok(TurnGuard {
            active: &self.active,
            id: session_id,
        })
    }

    fn is_answering(&self, session_id: Uuid) -> bool {
        self.active
            .lock()
            .map(|a| a.contains(&session_id))
            .unwrap_or(false)
    }

    /// Open a session over `document_ids`.
    pub async fn create_session(&self, user: &str, document_ids: Vec<Uuid>) -> Result<TutoringSession> {
        if document_ids.is_empty() {
            return Err(BuddyError::InvalidInput("a session needs at least one document".into()));
        }
        for id in &document_ids {
            self.repo.require::<Document>(&id.to_string()).await?;
        }
        let session = TutoringSession::new(user, document_ids);
        self.repo.save(&session).await?;
        info!("Opened tutoring session {}", session.id);
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<TutoringSession> {
        self.repo.require(&session_id.to_string()).await
    }

    /// Sessions, optionally for one user, newest first.
    pub async fn list(&self, user: Option<&str>) -> Result<Vec<TutoringSession>> {
        let mut sessions: Vec<TutoringSession> = self.repo.all().await?;
        sessions.retain(|s| user.is_none_or(|u| s.user == u));
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    /// Close a session. A turn still in flight finishes but the session stays closed.
    pub async fn close(&self, session_id: Uuid) -> Result<TutoringSession> {
        let mut session = self.get(session_id).await?;
        if session.state != SessionState::Closed {
            session.state = SessionState::Closed;
            session.updated_at = Utc::now();
            self.repo.save(&session).await?;
            info!("Closed tutoring session {}", session_id);
        }
        Ok(session)
    }

    /// Answer one student message.
    ///
    /// On generation failure the exchange is recorded as failed, the session
    /// returns to `open` and the error is returned.
    #[instrument(skip(self, text, quiz_context), fields(mode = %mode))]
    pub async fn ask(
        &self,
        session_id: Uuid,
        text: &str,
        mode: TutorMode,
        quiz_context: Option<&str>,
    ) -> Result<TutorReply> {
        let question = text.trim();
        if question.is_empty() {
            return Err(BuddyError::InvalidInput("message cannot be empty".into()));
        }

        let mut session = self.get(session_id).await?;
        if session.state == SessionState::Closed {
            return Err(BuddyError::SessionClosed(session_id.to_string()));
        }
        let _guard = self.begin_turn(session_id)?;

        session.state = SessionState::Active;
        session.updated_at = Utc::now();
        self.repo.save(&session).await?;

        let context = match self
            .retriever
            .retrieve(question, &session.document_ids, self.top_k)
            .await
        {
            Ok(context) => context,
            Err(e) => {
                warn!("Retrieval failed, answering without context: {}", e);
                RetrievedContext::NoContext
            }
        };

        let task = Task::TutorAnswer {
            question: question.to_string(),
            mode,
        };
        let prompt = self
            .composer
            .compose(&task, &context, &session.turns, quiz_context);
        if prompt.dropped_turns > 0 {
            debug!("{} history turns left out of the prompt", prompt.dropped_turns);
        }

        let outcome = self.generator.generate(&prompt.text).await;

        // Another request may have closed the session while we waited.
        let mut session = self.get(session_id).await?;
        let mut user_turn = Turn::user(question);
        let result = match outcome {
            Ok(answer) => {
                session.turns.push(user_turn);
                session
                    .turns
                    .push(Turn::assistant(answer.clone(), prompt.context_ids.clone()));
                Ok(TutorReply {
                    session_id,
                    mode,
                    text: answer,
                    context_ids: prompt.context_ids,
                    grounded: prompt.grounded,
                    sources: format_sources(&context),
                })
            }
            Err(e) => {
                warn!("Tutoring turn in session {} failed: {}", session_id, e);
                let reason = e.user_message();
                user_turn.mark_failed(reason.clone());
                let mut error_turn = Turn::assistant(reason.clone(), Vec::new());
                error_turn.mark_failed(reason);
                session.turns.push(user_turn);
                session.turns.push(error_turn);
                Err(e)
            }
        };

        let dropped = session.trim_to(self.settings.session_char_budget);
        if dropped > 0 {
            debug!("Trimmed {} old turns from session {}", dropped, session_id);
        }
        if session.state == SessionState::Active {
            session.state = SessionState::Open;
        }
        session.updated_at = Utc::now();
        self.repo.save(&session).await?;

        result
    }

    /// Return sessions stuck in `active` with no turn in flight to `open`.
    pub async fn reap_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - chrono::Duration::seconds(self.settings.stale_after_seconds as i64);
        let mut reaped = 0;
        for mut session in self.repo.all::<TutoringSession>().await? {
            if session.state != SessionState::Active
                || session.updated_at > cutoff
                || self.is_answering(session.id)
            {
                continue;
            }
            session.state = SessionState::Open;
            session.updated_at = now;
            self.repo.save(&session).await?;
            reaped += 1;
        }
        if reaped > 0 {
            warn!("Returned {} stale tutoring sessions to open", reaped);
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmSettings, Prompts, RetrievalSettings};
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::generation::testing::{ScriptedModel, Step};
    use crate::ingest::tests::{biology_text, ingestor, MapExtractor};
    use crate::rag::PromptBudget;
    use crate::tutor::TurnStatus;
    use crate::vector_store::{MemoryVectorIndex, VectorIndex};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    struct Fixture {
        engine: Arc<TutorEngine>,
        model: Arc<ScriptedModel>,
        document: Uuid,
        empty_document: Uuid,
    }

    async fn fixture_with(model: ScriptedModel, settings: TutorSettings) -> Fixture {
        let repo = Repository::in_memory();
        let index: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(256));
        let ingest = ingestor(repo.clone(), Arc::new(MapExtractor::default()), index.clone());

        let doc = ingest.register("ana", "Biology").await.unwrap();
        ingest.ingest_text(doc.id, &biology_text()).await.unwrap();
        let empty = ingest.register("ana", "Unprocessed").await.unwrap();

        let model = Arc::new(model);
        let generator = GenerationClient::new(model.clone(), &LlmSettings::default())
            .with_backoff(Duration::from_millis(1));
        let retriever = Arc::new(Retriever::new(repo.clone(), embedder, index));
        let composer = Arc::new(PromptComposer::new(
            Prompts::default(),
            PromptBudget::from(&RetrievalSettings::default()),
        ));

        Fixture {
            engine: Arc::new(TutorEngine::new(repo, retriever, composer, generator, settings, 2)),
            model,
            document: doc.id,
            empty_document: empty.id,
        }
    }

    async fn fixture(model: ScriptedModel) -> Fixture {
        fixture_with(model, TutorSettings::default()).await
    }

    #[tokio::test]
    async fn test_grounded_turn_records_provenance() {
        let f = fixture(ScriptedModel::always("Chlorophyll absorbs light for photosynthesis.")).await;
        let session = f.engine.create_session("ana", vec![f.document]).await.unwrap();

        let reply = f
            .engine
            .ask(session.id, "What does chlorophyll absorb?", TutorMode::Explain, None)
            .await
            .unwrap();

        assert!(reply.grounded);
        assert_eq!(reply.context_ids.len(), 2);
        assert!(reply.context_ids.iter().all(|id| id.document == f.document));
        assert!(f.model.last_prompt().unwrap().contains("Chlorophyll in the chloroplasts"));

        let stored = f.engine.get(session.id).await.unwrap();
        assert_eq!(stored.state, SessionState::Open);
        assert_eq!(stored.turns.len(), 2);
        assert_eq!(stored.turns[1].context_ids, reply.context_ids);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_session_open() {
        let f = fixture(ScriptedModel::new(vec![
            Step::Reply("ATP is the energy currency of the cell.".into()),
            Step::Fail(BuddyError::GenerationRejected("prompt too long".into())),
            Step::Reply("Glycolysis happens in the cytoplasm.".into()),
        ]))
        .await;
        let session = f.engine.create_session("ana", vec![f.document]).await.unwrap();

        assert_ok!(f.engine.ask(session.id, "What is ATP?", TutorMode::Explain, None).await);
        assert_err!(f.engine.ask(session.id, "Explain quantum tunnelling", TutorMode::Explain, None).await);

        let stored = f.engine.get(session.id).await.unwrap();
        assert_eq!(stored.state, SessionState::Open);
        assert_eq!(stored.turns.len(), 4);
        assert!(stored.turns[2].is_failed());
        assert!(matches!(stored.turns[3].status, TurnStatus::Failed { .. }));

        assert_ok!(f.engine.ask(session.id, "Where does glycolysis happen?", TutorMode::Explain, None).await);
        let prompt = f.model.last_prompt().unwrap();
        assert!(prompt.contains("Student: What is ATP?"));
        assert!(prompt.contains("Tutor: ATP is the energy currency of the cell."));
        assert!(!prompt.contains("quantum"));

        let stored = f.engine.get(session.id).await.unwrap();
        assert_eq!(stored.turns.len(), 6);
        assert!(!stored.turns[5].is_failed());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_turns() {
        let f = fixture(ScriptedModel::always("ok")).await;
        let session = f.engine.create_session("ana", vec![f.document]).await.unwrap();
        f.engine.close(session.id).await.unwrap();

        let err = f
            .engine
            .ask(session.id, "Anything?", TutorMode::Explain, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BuddyError::SessionClosed(_)));
        assert_eq!(f.model.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_turn_is_busy() {
        let f = fixture(ScriptedModel::new(vec![Step::Stall(
            Duration::from_millis(200),
            "slow answer".into(),
        )]))
        .await;
        let session = f.engine.create_session("ana", vec![f.document]).await.unwrap();

        let engine = f.engine.clone();
        let id = session.id;
        let first = tokio::spawn(async move {
            engine.ask(id, "What is ATP?", TutorMode::Explain, None).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(f.engine.get(id).await.unwrap().state, SessionState::Active);
        let second = f.engine.ask(id, "And glucose?", TutorMode::Explain, None).await;
        assert!(matches!(second, Err(BuddyError::SessionBusy(_))));

        let reply = first.await.unwrap().unwrap();
        assert_eq!(reply.text, "slow answer");
        assert_eq!(f.engine.get(id).await.unwrap().state, SessionState::Open);
    }

    #[tokio::test]
    async fn test_no_context_answer() {
        let f = fixture(ScriptedModel::always("Your material does not cover this.")).await;
        let session = f.engine.create_session("ana", vec![f.empty_document]).await.unwrap();

        let reply = f
            .engine
            .ask(session.id, "What is ATP?", TutorMode::Explain, None)
            .await
            .unwrap();
        assert!(!reply.grounded);
        assert!(reply.context_ids.is_empty());
        assert!(f.model.last_prompt().unwrap().contains("No relevant study material"));
    }

    #[tokio::test]
    async fn test_hint_mode_and_quiz_context() {
        let f = fixture(ScriptedModel::always("Think about where glucose is broken down.")).await;
        let session = f.engine.create_session("ana", vec![f.document]).await.unwrap();

        f.engine
            .ask(
                session.id,
                "Is B correct for question 2?",
                TutorMode::Hint,
                Some("Question 2: Where does glycolysis occur?"),
            )
            .await
            .unwrap();
        let prompt = f.model.last_prompt().unwrap();
        assert!(prompt.contains("Never state the final answer"));
        assert!(prompt.contains("Current quiz:\nQuestion 2: Where does glycolysis occur?"));
    }

    #[tokio::test]
    async fn test_session_trimmed_to_budget() {
        let settings = TutorSettings {
            session_char_budget: 100,
            ..Default::default()
        };
        let f = fixture_with(ScriptedModel::always("a".repeat(30)), settings).await;
        let session = f.engine.create_session("ana", vec![f.document]).await.unwrap();

        for question in ["first question", "second question", "third question"] {
            f.engine
                .ask(session.id, question, TutorMode::Explain, None)
                .await
                .unwrap();
        }
        let stored = f.engine.get(session.id).await.unwrap();
        assert!(stored.total_chars() <= 100);
        assert_eq!(stored.turns.last().unwrap().text, "a".repeat(30));
        assert_eq!(stored.turns[stored.turns.len() - 2].text, "third question");
    }

    #[tokio::test]
    async fn test_oversized_reply_keeps_provenance() {
        let settings = TutorSettings {
            session_char_budget: 100,
            ..Default::default()
        };
        let f = fixture_with(ScriptedModel::always("m".repeat(150)), settings).await;
        let session = f.engine.create_session("ana", vec![f.document]).await.unwrap();

        let reply = f
            .engine
            .ask(session.id, "Explain mitochondria in depth", TutorMode::Explain, None)
            .await
            .unwrap();
        assert!(!reply.context_ids.is_empty());

        let stored = f.engine.get(session.id).await.unwrap();
        assert_eq!(stored.turns.len(), 2);
        assert_eq!(stored.turns[0].text, "Explain mitochondria in depth");
        assert_eq!(stored.turns[1].context_ids, reply.context_ids);
    }

    #[tokio::test]
    async fn test_reap_stale_active_session() {
        let f = fixture(ScriptedModel::always("ok")).await;
        let mut session = f.engine.create_session("ana", vec![f.document]).await.unwrap();
        session.state = SessionState::Active;
        session.updated_at = Utc::now() - chrono::Duration::hours(1);
        f.engine.repo.save(&session).await.unwrap();

        assert_eq!(f.engine.reap_stale(Utc::now()).await.unwrap(), 1);
        assert_eq!(f.engine.get(session.id).await.unwrap().state, SessionState::Open);
    }

    #[tokio::test]
    async fn test_create_session_validates_scope() {
        let f = fixture(ScriptedModel::always("ok")).await;
        assert!(f.engine.create_session("ana", vec![]).await.is_err());
        let err = f
            .engine
            .create_session("ana", vec![Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(matches!(err, BuddyError::NotFound(_)));
    }
}
