//! HTTP server for the rewrite protocol.
//!
//! Exposes chunking, normalization and single-request rewriting so that a
//! browser editor, or another `redraft` configured with a remote backend,
//! can drive the pipeline over HTTP. Runs are orchestrated by the caller:
//! `/api/rewrite` handles exactly one [`RewriteRequest`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and backend name) |
//! | `POST` | `/api/chunk` | Split text, or a stored document, into chunks |
//! | `POST` | `/api/normalize` | Run the text normalizer |
//! | `POST` | `/api/rewrite` | Rewrite one chunk; SSE frames when `stream` is set |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "instructions must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `payload_too_large`
//! (413), `rate_limited` (429), `backend_error` (502), `timeout` (504).
//!
//! A streaming rewrite that fails after the first frame cannot change its
//! status any more; the failure is sent as an `error` frame instead.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! editors.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::chunk::{chunk_document, word_count};
use crate::completion::frame::RewriteResponse;
use crate::completion::{create_client, CompletionClient, StreamFrame};
use crate::config::{ChunkingConfig, Config};
use crate::error::{BackendError, StoreError};
use crate::models::{ChunkSummary, RewriteRequest};
use crate::normalize::normalize;
use crate::store::{DocumentStore, FsDocumentStore};

/// Request bodies larger than this are rejected with 413.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    client: Arc<dyn CompletionClient>,
    store: Arc<dyn DocumentStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            client,
            store,
        }
    }
}

/// Build the router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port with their own client and store.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chunk", post(handle_chunk))
        .route("/api/normalize", post(handle_normalize))
        .route("/api/rewrite", post(handle_rewrite))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind`, backed by the configured
/// completion client and a filesystem document store rooted at
/// `[documents].root`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let client = create_client(config)?;
    let store = Arc::new(FsDocumentStore::new(&config.documents.root));
    let bind_addr = config.server.bind.clone();

    tracing::info!(
        backend = client.name(),
        documents = %config.documents.root.display(),
        "starting server"
    );
    let app = router(AppState::new(config.clone(), client, store));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    eprintln!("redraft listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        let (status, code) = match &err {
            BackendError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            BackendError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            BackendError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            _ => (StatusCode::BAD_GATEWAY, "backend_error"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message: err.to_string(),
            },
            StoreError::InvalidId(_) => bad_request(err.to_string()),
            StoreError::Io { .. } => {
                tracing::error!(error = %err, "document store failure");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: err.to_string(),
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    backend: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.client.name().to_string(),
    })
}

// ============ POST /api/chunk ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkApiRequest {
    content: Option<String>,
    document_id: Option<String>,
    target_words: Option<usize>,
    min_words: Option<usize>,
    max_words: Option<usize>,
}

async fn handle_chunk(
    State(state): State<AppState>,
    Json(req): Json<ChunkApiRequest>,
) -> Result<Json<Vec<ChunkSummary>>, AppError> {
    let defaults = &state.config.chunking;
    let chunking = ChunkingConfig {
        target_words: req.target_words.unwrap_or(defaults.target_words),
        min_words: req.min_words.unwrap_or(defaults.min_words),
        max_words: req.max_words.unwrap_or(defaults.max_words),
    };
    chunking.validate().map_err(|e| bad_request(e.to_string()))?;

    let text = match (req.content, req.document_id) {
        (Some(content), _) => content,
        (None, Some(id)) => state.store.fetch(&id).await?.text,
        (None, None) => return Err(bad_request("one of content or documentId is required")),
    };

    let chunks = chunk_document(&text, &chunking)
        .iter()
        .map(ChunkSummary::from)
        .collect();
    Ok(Json(chunks))
}

// ============ POST /api/normalize ============

#[derive(Debug, Deserialize)]
struct NormalizeRequest {
    content: String,
}

#[derive(Debug, Serialize)]
struct NormalizeResponse {
    content: String,
    words: usize,
}

async fn handle_normalize(Json(req): Json<NormalizeRequest>) -> Json<NormalizeResponse> {
    let content = normalize(&req.content);
    let words = word_count(&content);
    Json(NormalizeResponse { content, words })
}

// ============ POST /api/rewrite ============

async fn handle_rewrite(
    State(state): State<AppState>,
    Json(req): Json<RewriteRequest>,
) -> Result<Response, AppError> {
    if req.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    if req.instructions.trim().is_empty() {
        return Err(bad_request("instructions must not be empty"));
    }

    tracing::info!(
        model = %req.model,
        chunk = req.chunk_index,
        total = req.total_chunks,
        stream = req.stream,
        "rewrite request"
    );

    let timeout = state.config.run.chunk_timeout();
    if req.stream {
        rewrite_stream(&state, &req, timeout).await
    } else {
        let result = with_timeout(timeout, state.client.complete(&req)).await?;
        Ok(Json(RewriteResponse {
            rewritten_content: result.content,
            explanation: result.explanation,
        })
        .into_response())
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(BackendError::Timeout(limit))),
        None => fut.await,
    }
}

/// Relay the client's frames as SSE events. Errors before the first frame
/// become an HTTP error; later ones become an `error` frame that ends the
/// stream.
async fn rewrite_stream(
    state: &AppState,
    req: &RewriteRequest,
    timeout: Option<Duration>,
) -> Result<Response, AppError> {
    let deadline = timeout.map(|limit| (tokio::time::Instant::now() + limit, limit));
    let mut frames = with_timeout(timeout, state.client.stream(req)).await?;

    let sse_stream = async_stream::stream! {
        loop {
            let next = match deadline {
                Some((at, limit)) => match tokio::time::timeout_at(at, frames.next()).await {
                    Ok(next) => next,
                    Err(_) => Some(Err(BackendError::Timeout(limit))),
                },
                None => frames.next().await,
            };

            let (frame, last) = match next {
                Some(Ok(frame)) => {
                    let last = !matches!(frame, StreamFrame::Chunk { .. });
                    (frame, last)
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "rewrite stream failed");
                    (StreamFrame::Error { error: e.to_string() }, true)
                }
                None => break,
            };

            let json = serde_json::to_string(&frame).unwrap_or_default();
            yield Ok::<_, Infallible>(Event::default().data(json));
            if last {
                break;
            }
        }
    };

    Ok(Sse::new(sse_stream).into_response())
}
