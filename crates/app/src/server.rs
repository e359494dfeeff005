//! HTTP API over a [`KnowledgeBase`].
//!
//! | Method   | Path                              | Description                        |
//! |----------|-----------------------------------|------------------------------------|
//! | `GET`    | `/`                               | Pointer to the API                 |
//! | `GET`    | `/health`                         | Health check with version          |
//! | `POST`   | `/api/documents/upload`           | Multipart upload, field `file`     |
//! | `GET`    | `/api/documents`                  | Documents ordered by upload time   |
//! | `DELETE` | `/api/documents`                  | Drop all documents and chunks      |
//! | `GET`    | `/api/documents/{id}`             | One document                       |
//! | `GET`    | `/api/documents/stats/collection` | Chunk and document counts          |
//! | `POST`   | `/api/query`                      | Answer a question                  |
//! | `GET`    | `/api/query/history`              | Recent questions, oldest first     |
//! | `DELETE` | `/api/query/history`              | Clear the history                  |
//!
//! Errors are returned as `{ "detail": "..." }`.
//!
//! Uploads and queries run in their own task, so a client that disconnects
//! mid-request cannot leave a half-committed document or history record.

use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pdf_rag_core::{
    Answer, CollectionStats, Document, ErrorClass, GatewayError, IngestError, KnowledgeBase,
    PdfUpload, PersistenceError, QueryError, QueryRecord,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Clone)]
struct AppState {
    knowledge: Arc<KnowledgeBase>,
}

pub fn router(knowledge: Arc<KnowledgeBase>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route(
            "/api/documents",
            get(handle_list_documents).delete(handle_reset_documents),
        )
        .route("/api/documents/upload", post(handle_upload))
        .route("/api/documents/stats/collection", get(handle_stats))
        .route("/api/documents/{document_id}", get(handle_get_document))
        .route("/api/query", post(handle_query))
        .route(
            "/api/query/history",
            get(handle_history).delete(handle_clear_history),
        )
        .layer(DefaultBodyLimit::max(
            max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { knowledge })
}

pub async fn run_server(
    knowledge: KnowledgeBase,
    bind: &str,
    max_upload_bytes: usize,
) -> anyhow::Result<()> {
    let app = router(Arc::new(knowledge), max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => error!(%error, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    fn classified(class: ErrorClass, detail: String) -> Self {
        let status = status_for(class);
        if class.is_client_error() {
            warn!(status = status.as_u16(), %detail, "request rejected");
        } else {
            error!(status = status.as_u16(), %detail, "request failed");
        }
        Self::new(status, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorClass::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorClass::BadGateway => StatusCode::BAD_GATEWAY,
        ErrorClass::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        Self::classified(error.class(), error.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        Self::classified(error.class(), error.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self::classified(ErrorClass::Internal, error.to_string())
    }
}

impl From<PersistenceError> for ApiError {
    fn from(error: PersistenceError) -> Self {
        Self::classified(ErrorClass::Internal, error.to_string())
    }
}

/// Runs `work` detached from the request so it completes even if the client goes away.
async fn run_detached<T, E>(work: impl Future<Output = Result<T, E>> + Send + 'static) -> Result<T, ApiError>
where
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result.map_err(Into::into),
        Err(join_error) => Err(ApiError::classified(
            ErrorClass::Internal,
            format!("request task failed: {join_error}"),
        )),
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
    health: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "PDF question answering API. Upload documents to /api/documents/upload and ask at /api/query.",
        version: env!("CARGO_PKG_VERSION"),
        health: "/health",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ Documents ============

async fn handle_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Document>, ApiError> {
    let mut multipart =
        multipart.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::new(error.status(), error.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ApiError::new(error.status(), error.body_text()))?;

        upload = Some(PdfUpload {
            filename,
            content_type,
            bytes: bytes.to_vec(),
        });
        break;
    }

    let upload = upload.ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "No file provided"))?;
    let knowledge = Arc::clone(&state.knowledge);
    let document = run_detached(async move { knowledge.upload(upload).await }).await?;
    Ok(Json(document))
}

async fn handle_list_documents(State(state): State<AppState>) -> Json<Vec<Document>> {
    Json(state.knowledge.documents().await)
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    state
        .knowledge
        .document(&document_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Document not found"))
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<CollectionStats>, ApiError> {
    Ok(Json(state.knowledge.stats().await?))
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

async fn handle_reset_documents(
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    let knowledge = Arc::clone(&state.knowledge);
    run_detached(async move { knowledge.reset_documents().await }).await?;
    Ok(Json(MessageResponse {
        message: "All documents deleted",
    }))
}

// ============ Queries ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    max_results: Option<usize>,
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Answer>, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text()))?;

    let knowledge = Arc::clone(&state.knowledge);
    let answer = run_detached(async move {
        knowledge
            .ask(&request.question, request.max_results)
            .await
    })
    .await?;
    Ok(Json(answer))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryEntry {
    timestamp: f64,
    question: String,
    answer: String,
    sources_count: usize,
    processing_time: f64,
}

impl From<QueryRecord> for HistoryEntry {
    fn from(record: QueryRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            question: record.question,
            answer: record.answer,
            sources_count: record.sources.len(),
            processing_time: record.processing_time,
        }
    }
}

#[derive(Serialize)]
struct HistoryResponse {
    queries: Vec<HistoryEntry>,
    total_count: usize,
}

async fn handle_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Json<HistoryResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let queries = state
        .knowledge
        .history(limit)
        .await
        .into_iter()
        .map(HistoryEntry::from)
        .collect();

    Json(HistoryResponse {
        queries,
        total_count: state.knowledge.history_total().await,
    })
}

async fn handle_clear_history(
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    let knowledge = Arc::clone(&state.knowledge);
    run_detached(async move { knowledge.clear_history().await }).await?;
    Ok(Json(MessageResponse {
        message: "Query history cleared",
    }))
}
