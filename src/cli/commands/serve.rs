//! HTTP API server for web and mobile clients.
//!
//! Provides REST endpoints for documents, search, quizzes and tutoring
//! sessions. Quiz questions are served without their answers.

use crate::cli::Output;
use crate::config::Settings;
use crate::error::BuddyError;
use crate::ingest::DocumentSummary;
use crate::orchestrator::Buddy;
use crate::quiz::{Difficulty, Question, QuestionKind, Quiz, QuizRequest, QuizStatus, SubmittedAnswer};
use crate::tutor::TutorMode;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;
use uuid::Uuid;

/// How often stuck quizzes and sessions are swept while serving.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

type AppState = Arc<Buddy>;

/// Run the HTTP API server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    let buddy = Arc::new(Buddy::open(settings).await?);
    let _reaper = buddy.spawn_reaper(REAP_INTERVAL);

    let app = router(buddy);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("AI Buddy API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Documents", "GET|POST /documents, GET|DELETE /documents/{id}");
    Output::kv("Search", "POST /search");
    Output::kv("Quizzes", "GET|POST /quizzes, GET|PATCH|DELETE /quizzes/{id}");
    Output::kv("Attempts", "GET|POST /quizzes/{id}/attempts");
    Output::kv("Sessions", "GET|POST /sessions, POST /sessions/{id}/turns");
    Output::kv("Voice", "POST /sessions/{id}/voice");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the API router over an assembled [`Buddy`].
pub fn router(buddy: Arc<Buddy>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/documents", get(list_documents).post(add_document))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .route("/documents/{id}/reingest", post(reingest_document))
        .route("/search", post(search))
        .route("/quizzes", get(list_quizzes).post(create_quiz))
        .route(
            "/quizzes/{id}",
            get(get_quiz).patch(rename_quiz).delete(delete_quiz),
        )
        .route("/quizzes/{id}/cancel", post(cancel_quiz))
        .route("/quizzes/{id}/attempts", get(list_attempts).post(submit_attempt))
        .route("/quizzes/{id}/analytics", get(quiz_analytics))
        .route("/quizzes/{id}/questions/{index}/hint", post(question_hint))
        .route("/quizzes/{id}/questions/{index}/explain", post(explain_answer))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/turns", post(session_turn))
        .route("/sessions/{id}/voice", post(session_voice))
        .route("/sessions/{id}/close", post(close_session))
        .layer(cors)
        .with_state(buddy)
}

// === Errors ===

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    category: crate::error::ErrorCategory,
}

/// A [`BuddyError`] rendered as an HTTP response.
struct ApiError(BuddyError);

impl From<BuddyError> for ApiError {
    fn from(e: BuddyError) -> Self {
        Self(e)
    }
}

fn status_for(e: &BuddyError) -> StatusCode {
    match e {
        BuddyError::NotFound(_) => StatusCode::NOT_FOUND,
        BuddyError::InvalidInput(_) | BuddyError::Json(_) => StatusCode::BAD_REQUEST,
        BuddyError::SessionClosed(_) | BuddyError::SessionBusy(_) | BuddyError::Cancelled(_) => {
            StatusCode::CONFLICT
        }
        BuddyError::EmptyDocument | BuddyError::Extraction(_) | BuddyError::GenerationRejected(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        BuddyError::GenerationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        BuddyError::GenerationUnavailable(_)
        | BuddyError::EmbeddingService(_)
        | BuddyError::VectorStore(_)
        | BuddyError::Voice(_) => StatusCode::SERVICE_UNAVAILABLE,
        BuddyError::Validation(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.user_message(),
                category: self.0.category(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// === Request/Response Types ===

#[derive(Deserialize)]
struct OwnerQuery {
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Deserialize)]
struct UserQuery {
    user: String,
}

#[derive(Deserialize)]
struct AddDocumentRequest {
    owner: String,
    /// Title for inline text; ignored for files.
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    /// Path of a PDF, text or markdown file on the server.
    #[serde(default)]
    path: Option<String>,
}

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
    total: usize,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
}

#[derive(Deserialize)]
struct SearchRequest {
    document_ids: Vec<Uuid>,
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    5
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Serialize)]
struct SearchResult {
    document_id: Uuid,
    document_title: String,
    sequence: u32,
    content: String,
    start_offset: usize,
    end_offset: usize,
    score: f32,
}

#[derive(Deserialize)]
struct CreateQuizRequest {
    #[serde(flatten)]
    request: QuizRequest,
    /// Generate before responding instead of in the background.
    #[serde(default)]
    wait: bool,
}

#[derive(Deserialize)]
struct QuizListQuery {
    #[serde(default)]
    document_id: Option<Uuid>,
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Deserialize)]
struct RenameQuizRequest {
    name: String,
}

/// A question as shown to the student.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum QuestionView {
    Mcq { prompt: String, options: Vec<String> },
    Open { prompt: String },
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        match question {
            Question::Mcq { prompt, options, .. } => QuestionView::Mcq {
                prompt: prompt.clone(),
                options: options.clone(),
            },
            Question::Open { prompt, .. } => QuestionView::Open {
                prompt: prompt.clone(),
            },
        }
    }
}

/// A quiz without its answer key.
#[derive(Serialize)]
struct QuizView {
    id: Uuid,
    name: String,
    owner: String,
    document_ids: Vec<Uuid>,
    kind: QuestionKind,
    difficulty: Difficulty,
    requested_count: usize,
    topic: Option<String>,
    status: QuizStatus,
    questions: Vec<QuestionView>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Quiz> for QuizView {
    fn from(quiz: Quiz) -> Self {
        Self {
            questions: quiz.questions.iter().map(QuestionView::from).collect(),
            id: quiz.id,
            name: quiz.name,
            owner: quiz.owner,
            document_ids: quiz.document_ids,
            kind: quiz.kind,
            difficulty: quiz.difficulty,
            requested_count: quiz.requested_count,
            topic: quiz.topic,
            status: quiz.status,
            created_at: quiz.created_at,
            updated_at: quiz.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct SubmitRequest {
    user: String,
    answers: Vec<SubmittedAnswer>,
}

#[derive(Deserialize)]
struct ExplainRequest {
    answer: SubmittedAnswer,
}

#[derive(Serialize)]
struct TextResponse {
    text: String,
}

#[derive(Deserialize)]
struct SessionListQuery {
    #[serde(default)]
    user: Option<String>,
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    user: String,
    document_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct TurnRequest {
    text: String,
    #[serde(default)]
    mode: TutorMode,
    /// Quiz the student is working on; its questions are shown to the tutor.
    #[serde(default)]
    quiz_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct VoiceRequest {
    /// Base64-encoded recording.
    audio: String,
    #[serde(default)]
    mode: TutorMode,
    #[serde(default)]
    quiz_id: Option<Uuid>,
    #[serde(default = "default_speak")]
    speak: bool,
}

fn default_speak() -> bool {
    true
}

#[derive(Serialize)]
struct VoiceResponse {
    #[serde(flatten)]
    reply: crate::voice::VoiceReply,
    /// Base64-encoded synthesized reply, when available.
    audio: Option<String>,
}

// === Handlers ===

async fn health(State(buddy): State<AppState>) -> impl IntoResponse {
    let voice = buddy.voice().service().is_available().await;
    Json(serde_json::json!({ "status": "ok", "voice": voice }))
}

async fn list_documents(
    State(buddy): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<DocumentListResponse>> {
    let docs = buddy.documents(query.owner.as_deref()).await?;
    Ok(Json(DocumentListResponse {
        total: docs.len(),
        documents: docs.iter().map(DocumentSummary::from).collect(),
    }))
}

async fn add_document(
    State(buddy): State<AppState>,
    Json(req): Json<AddDocumentRequest>,
) -> ApiResult<impl IntoResponse> {
    let doc = match (req.path, req.text) {
        (Some(path), _) => {
            let path = PathBuf::from(shellexpand::tilde(&path).as_ref());
            buddy.add_document(&req.owner, &path).await?
        }
        (None, Some(text)) => {
            let title = req.title.unwrap_or_default();
            buddy.add_text(&req.owner, &title, &text).await?
        }
        (None, None) => {
            return Err(BuddyError::InvalidInput("provide either 'path' or 'text'".into()).into());
        }
    };
    Ok((StatusCode::CREATED, Json(DocumentSummary::from(&doc))))
}

async fn get_document(State(buddy): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<DocumentSummary>> {
    let doc = buddy.document(id).await?;
    Ok(Json(DocumentSummary::from(&doc)))
}

async fn delete_document(State(buddy): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<DeletedResponse>> {
    if !buddy.delete_document(id).await? {
        return Err(BuddyError::NotFound(format!("document {}", id)).into());
    }
    Ok(Json(DeletedResponse { deleted: true }))
}

async fn reingest_document(
    State(buddy): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentSummary>> {
    let doc = buddy.reingest(id).await?;
    Ok(Json(DocumentSummary::from(&doc)))
}

async fn search(State(buddy): State<AppState>, Json(req): Json<SearchRequest>) -> ApiResult<Json<SearchResponse>> {
    let context = buddy.search(&req.document_ids, &req.query, req.limit).await?;
    Ok(Json(SearchResponse {
        results: context
            .chunks()
            .iter()
            .map(|c| SearchResult {
                document_id: c.chunk_id.document,
                document_title: c.document_title.clone(),
                sequence: c.chunk_id.sequence,
                content: c.text.clone(),
                start_offset: c.start_offset,
                end_offset: c.end_offset,
                score: c.score,
            })
            .collect(),
    }))
}

async fn list_quizzes(
    State(buddy): State<AppState>,
    Query(query): Query<QuizListQuery>,
) -> ApiResult<Json<Vec<QuizView>>> {
    let quizzes = buddy
        .quizzes()
        .list(query.document_id, query.owner.as_deref())
        .await?;
    Ok(Json(quizzes.into_iter().map(QuizView::from).collect()))
}

async fn create_quiz(
    State(buddy): State<AppState>,
    Json(req): Json<CreateQuizRequest>,
) -> ApiResult<impl IntoResponse> {
    let (status, quiz) = if req.wait {
        (StatusCode::CREATED, buddy.quizzes().generate(req.request).await?)
    } else {
        (StatusCode::ACCEPTED, buddy.quizzes().request(req.request).await?)
    };
    Ok((status, Json(QuizView::from(quiz))))
}

async fn get_quiz(State(buddy): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<QuizView>> {
    Ok(Json(buddy.quizzes().get(id).await?.into()))
}

async fn rename_quiz(
    State(buddy): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameQuizRequest>,
) -> ApiResult<Json<QuizView>> {
    Ok(Json(buddy.quizzes().rename(id, &req.name).await?.into()))
}

async fn delete_quiz(State(buddy): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<DeletedResponse>> {
    if !buddy.quizzes().delete(id).await? {
        return Err(BuddyError::NotFound(format!("quiz {}", id)).into());
    }
    Ok(Json(DeletedResponse { deleted: true }))
}

async fn cancel_quiz(State(buddy): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<QuizView>> {
    Ok(Json(buddy.quizzes().cancel(id).await?.into()))
}

async fn submit_attempt(
    State(buddy): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<impl IntoResponse> {
    let attempt = buddy.quizzes().submit(id, &req.user, req.answers).await?;
    Ok((StatusCode::CREATED, Json(attempt)))
}

async fn list_attempts(
    State(buddy): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(buddy.quizzes().attempts(id, &query.user).await?))
}

async fn quiz_analytics(
    State(buddy): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<impl IntoResponse> {
    let stats = buddy
        .quizzes()
        .analytics(id, &query.user)
        .await?
        .ok_or_else(|| BuddyError::NotFound(format!("no attempts by {} on quiz {}", query.user, id)))?;
    Ok(Json(stats))
}

async fn question_hint(
    State(buddy): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> ApiResult<Json<TextResponse>> {
    let text = buddy.quizzes().hint(id, index).await?;
    Ok(Json(TextResponse { text }))
}

async fn explain_answer(
    State(buddy): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(req): Json<ExplainRequest>,
) -> ApiResult<Json<TextResponse>> {
    let text = buddy.quizzes().explain_answer(id, index, &req.answer).await?;
    Ok(Json(TextResponse { text }))
}

async fn list_sessions(
    State(buddy): State<AppState>,
    Query(query): Query<SessionListQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(buddy.tutor().list(query.user.as_deref()).await?))
}

async fn create_session(
    State(buddy): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = buddy.tutor().create_session(&req.user, req.document_ids).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(State(buddy): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(buddy.tutor().get(id).await?))
}

async fn close_session(State(buddy): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(buddy.tutor().close(id).await?))
}

/// Questions of the quiz a turn refers to, for the tutor's prompt.
async fn quiz_context(buddy: &Buddy, quiz_id: Option<Uuid>) -> ApiResult<Option<String>> {
    match quiz_id {
        Some(id) => Ok(Some(buddy.quizzes().get(id).await?.render_questions())),
        None => Ok(None),
    }
}

async fn session_turn(
    State(buddy): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TurnRequest>,
) -> ApiResult<impl IntoResponse> {
    let context = quiz_context(&buddy, req.quiz_id).await?;
    let reply = buddy
        .tutor()
        .ask(id, &req.text, req.mode, context.as_deref())
        .await?;
    Ok(Json(reply))
}

async fn session_voice(
    State(buddy): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<VoiceRequest>,
) -> ApiResult<Json<VoiceResponse>> {
    let audio = base64::engine::general_purpose::STANDARD
        .decode(req.audio.trim())
        .map_err(|e| BuddyError::InvalidInput(format!("audio is not valid base64: {}", e)))?;
    let context = quiz_context(&buddy, req.quiz_id).await?;

    let mut reply = buddy
        .voice()
        .converse(buddy.tutor(), id, audio, req.mode, context.as_deref(), req.speak)
        .await?;
    let audio = reply
        .audio
        .take()
        .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes));

    Ok(Json(VoiceResponse { reply, audio }))
}
