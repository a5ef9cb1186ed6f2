use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Utc};
use finance_core::{
    CompletionConfig, CompletionService, Diagnostic, Extractor, FormatExtractor, OpenRouterClient,
    Session, SessionError, UploadedDocument, config::ConfigError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Upper bound on one multipart upload (all files together).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

type ApiError = (StatusCode, String);
type SessionHandle = Arc<Mutex<Session>>;

#[derive(Clone)]
pub struct AppState {
    completion: Arc<dyn CompletionService>,
    extractor: Arc<dyn Extractor>,
    config: Arc<CompletionConfig>,
    // Each session has its own lock, so a slow model call only blocks its own session.
    sessions: Arc<Mutex<HashMap<Uuid, SessionHandle>>>,
}

impl AppState {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        extractor: Arc<dyn Extractor>,
        config: CompletionConfig,
    ) -> Self {
        Self {
            completion,
            extractor,
            config: Arc::new(config),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: CompletionConfig) -> Self {
        let completion = Arc::new(OpenRouterClient::from_config(&config));
        tracing::info!("Using completion model {}", completion.model());
        Self::new(completion, Arc::new(FormatExtractor), config)
    }

    async fn session(&self, id: Uuid) -> Result<SessionHandle, ApiError> {
        self.sessions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Session not found: {}", id)))
    }
}

// Lifting this logic out of the main function makes it easier to test
pub async fn create_app(custom_state: Option<AppState>) -> Result<Router, ConfigError> {
    let app_state = match custom_state {
        Some(state) => state,
        None => AppState::from_config(CompletionConfig::from_env()?),
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/sessions", post(create_session_handler))
        .route("/sessions/:id", delete(end_session_handler))
        .route(
            "/sessions/:id/documents",
            put(upload_documents_handler).delete(clear_documents_handler),
        )
        .route("/sessions/:id/text", get(text_handler))
        .route("/sessions/:id/suggestions", get(suggestions_handler))
        .route(
            "/sessions/:id/suggestions/:index/select",
            post(select_suggestion_handler),
        )
        .route("/sessions/:id/analyze", post(analyze_handler))
        .route("/sessions/:id/analysis", get(analysis_handler))
        .route("/sessions/:id/export", get(export_handler))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );
    Ok(app)
}

fn session_error(e: SessionError) -> ApiError {
    let status = match e {
        SessionError::EmptyQuery | SessionError::SuggestionOutOfRange(_) => StatusCode::BAD_REQUEST,
        SessionError::NoDocuments | SessionError::NoSuggestions => StatusCode::CONFLICT,
    };
    (status, e.to_string())
}

pub async fn root() -> &'static str {
    "Finance Analyzer API is running!"
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

pub async fn create_session_handler(
    State(state): State<AppState>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let session = Session::new();
    let response = CreateSessionResponse {
        session_id: Uuid::new_v4(),
        created_at: session.created_at(),
    };
    state
        .sessions
        .lock()
        .await
        .insert(response.session_id, Arc::new(Mutex::new(session)));
    tracing::info!("Session started: {}", response.session_id);
    (StatusCode::CREATED, Json(response))
}

pub async fn end_session_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.sessions.lock().await.remove(&id) {
        Some(_) => {
            tracing::info!("Session ended: {}", id);
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err((StatusCode::NOT_FOUND, format!("Session not found: {}", id))),
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DocumentsResponse {
    /// Every uploaded file name, in upload order.
    pub files: Vec<String>,
    /// The files that were actually extracted.
    pub processed: Vec<String>,
    pub combined_chars: usize,
    pub notices: Vec<Diagnostic>,
}

pub async fn upload_documents_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let handle = state.session(id).await?;

    let mut documents = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?
    {
        let Some(file_name) = field.file_name().map(String::from) else {
            tracing::warn!("Skipping multipart field without a file name: {:?}", field.name());
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?;
        documents.push(UploadedDocument::new(file_name, bytes.to_vec()));
    }

    if documents.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No files in upload".to_string()));
    }
    tracing::info!("Session {}: received {} file(s)", id, documents.len());

    let mut session = handle.lock().await;
    let combined = session.set_documents(&documents, state.extractor.as_ref());
    let mut notices = combined.diagnostics.clone();
    notices.extend(combined.truncation_notice());

    Ok(Json(DocumentsResponse {
        files: documents.into_iter().map(|doc| doc.name).collect(),
        processed: combined.file_names.clone(),
        combined_chars: combined.text.chars().count(),
        notices,
    }))
}

pub async fn clear_documents_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let handle = state.session(id).await?;
    handle.lock().await.clear();
    tracing::info!("Session {}: documents cleared", id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TextResponse {
    pub text: String,
}

pub async fn text_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TextResponse>, ApiError> {
    let handle = state.session(id).await?;
    let session = handle.lock().await;
    Ok(Json(TextResponse {
        text: session.combined().text.clone(),
    }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<String>,
}

pub async fn suggestions_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuggestionsResponse>, ApiError> {
    let handle = state.session(id).await?;
    let mut session = handle.lock().await;
    let suggestions = session
        .suggestions(state.completion.as_ref(), state.config.suggestion_max_tokens)
        .await
        .ok_or_else(|| {
            (
                StatusCode::CONFLICT,
                "No extracted text to suggest questions from".to_string(),
            )
        })?;
    Ok(Json(SuggestionsResponse {
        suggestions: suggestions.to_vec(),
    }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct QueryResponse {
    pub query: String,
}

pub async fn select_suggestion_handler(
    State(state): State<AppState>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<QueryResponse>, ApiError> {
    let handle = state.session(id).await?;
    let mut session = handle.lock().await;
    let query = session.select_suggestion(index).map_err(session_error)?;
    Ok(Json(QueryResponse {
        query: query.to_string(),
    }))
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct AnalyzeRequest {
    /// Falls back to the session's current query (e.g. a selected suggestion).
    pub query: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AnalysisResponse {
    pub query: String,
    pub markdown: String,
}

pub async fn analyze_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AnalyzeRequest>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let handle = state.session(id).await?;
    let mut session = handle.lock().await;
    let query = payload
        .query
        .unwrap_or_else(|| session.query().to_string());

    let markdown = session
        .analyze(state.completion.as_ref(), &query, state.config.analysis_max_tokens)
        .await
        .map_err(session_error)?
        .to_string();
    Ok(Json(AnalysisResponse { query, markdown }))
}

pub async fn analysis_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let handle = state.session(id).await?;
    let session = handle.lock().await;
    let markdown = session
        .analysis()
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No analysis yet".to_string()))?;
    Ok(Json(AnalysisResponse {
        query: session.query().to_string(),
        markdown: markdown.to_string(),
    }))
}

pub async fn export_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = state.session(id).await?;
    let export = handle
        .lock()
        .await
        .export()
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No analysis to export".to_string()))?;

    let headers = [
        (header::CONTENT_TYPE, format!("{}; charset=utf-8", export.mime_type)),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", export.file_name),
        ),
    ];
    Ok((headers, export.contents))
}
