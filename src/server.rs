//! HTTP API for the review front-end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/create-task` | Allocate a new task id |
//! | `POST` | `/api/upload` | Multipart upload (`file`, optional `task_id`) |
//! | `GET`  | `/api/documents/{task_id}` | List a task's documents |
//! | `GET`  | `/api/files/{task_id}/{filename}` | Download an uploaded document |
//! | `GET`  | `/api/schema/{task_id}` | Schema used for the task |
//! | `POST` | `/api/schema/{task_id}` | Save the schema and run extraction |
//! | `GET`  | `/api/multi-channel-results/{task_id}` | Aggregated channel results |
//! | `POST` | `/api/locate/{task_id}` | Re-run text location mapping |
//! | `POST` | `/api/save-decision` | Persist a reviewer decision |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "task task_1a2b3c4d_1700000000 not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `provider_error` (502),
//! `internal` (500).

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::aggregate::collect_results;
use crate::channel::{ChannelRunner, RunReport};
use crate::config::Config;
use crate::error::HarnessError;
use crate::locate::TextLocator;
use crate::models::{DocumentInfo, MultiChannelResults, TextLocationResult};
use crate::provider::Provider;
use crate::tasks::{content_type_for, validate_task_id, TaskStore, UploadedDocument};

/// Uploads larger than this are rejected by the multipart extractor.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
}

impl AppState {
    pub fn new(config: &Config, provider: Arc<dyn Provider>) -> Self {
        Self {
            config: Arc::new(config.clone()),
            provider,
        }
    }

    fn tasks(&self) -> TaskStore {
        TaskStore::new(&self.config)
    }
}

/// Builds the router with all routes and the CORS layer.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/create-task", post(handle_create_task))
        .route("/api/upload", post(handle_upload))
        .route("/api/documents/{task_id}", get(handle_documents))
        .route("/api/files/{task_id}/{filename}", get(handle_file))
        .route(
            "/api/schema/{task_id}",
            get(handle_get_schema).post(handle_post_schema),
        )
        .route(
            "/api/multi-channel-results/{task_id}",
            get(handle_multi_channel_results),
        )
        .route("/api/locate/{task_id}", post(handle_locate))
        .route("/api/save-decision", post(handle_save_decision))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Starts the HTTP server on `[server].bind` and serves until the process exits.
pub async fn run_server(config: &Config, provider: Arc<dyn Provider>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config, provider));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "server listening");
    println!("Extraction server listening on http://{}", bind_addr);

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
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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
                code: self.code.to_string(),
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<HarnessError> for AppError {
    fn from(err: HarnessError) -> Self {
        let message = err.to_string();
        match err {
            HarnessError::NotFound(_) => not_found(message),
            HarnessError::InvalidInput(_) | HarnessError::Extraction(_) => bad_request(message),
            HarnessError::Provider(_) => AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "provider_error",
                message,
            },
            HarnessError::Io(_) | HarnessError::Json(_) => {
                tracing::error!(error = %message, "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message,
                }
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    provider: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.provider.name().to_string(),
    })
}

// ============ Tasks and uploads ============

#[derive(Serialize)]
struct CreateTaskResponse {
    task_id: String,
}

async fn handle_create_task(
    State(state): State<AppState>,
) -> Result<Json<CreateTaskResponse>, AppError> {
    let task_id = state.tasks().create_task()?;
    Ok(Json(CreateTaskResponse { task_id }))
}

/// Handler for `POST /api/upload`.
///
/// Expects a `file` part; a `task_id` text part adds the file to an existing
/// task, otherwise a new task is created.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadedDocument>, AppError> {
    let mut task_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "task_id" => {
                task_id = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
            }
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| bad_request(e.to_string()))?;
                file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let (filename, bytes) = file.ok_or_else(|| bad_request("missing file part"))?;
    let uploaded = state
        .tasks()
        .save_upload(task_id.as_deref(), &filename, &bytes)?;
    Ok(Json(uploaded))
}

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentInfo>,
}

async fn handle_documents(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let documents = state.tasks().list_documents(&task_id)?;
    Ok(Json(DocumentsResponse { documents }))
}

/// Handler for `GET /api/files/{task_id}/{filename}`.
///
/// Serves the stored bytes so the review UI can draw location boxes over
/// the page they refer to.
async fn handle_file(
    State(state): State<AppState>,
    Path((task_id, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let bytes = state.tasks().read_document(&task_id, &filename)?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for(&filename))],
        bytes,
    )
        .into_response())
}

// ============ Schema and extraction ============

async fn handle_get_schema(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(state.tasks().load_schema(&task_id)?))
}

#[derive(Serialize)]
struct ExtractionResponse {
    report: RunReport,
    results: MultiChannelResults,
}

/// Handler for `POST /api/schema/{task_id}`.
///
/// Saves the posted schema and runs the configured channels before
/// answering with the run report and the aggregated results.
async fn handle_post_schema(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(schema): Json<Value>,
) -> Result<Json<ExtractionResponse>, AppError> {
    state.tasks().save_schema(&task_id, &schema)?;

    let runner = ChannelRunner::new(&state.config, state.provider.clone());
    let report = runner.run_configured(&task_id, &schema).await?;
    let results = collect_results(&state.config, &task_id);

    Ok(Json(ExtractionResponse { report, results }))
}

async fn handle_multi_channel_results(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<MultiChannelResults>, AppError> {
    validate_task_id(&task_id)?;
    Ok(Json(collect_results(&state.config, &task_id)))
}

async fn handle_locate(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TextLocationResult>, AppError> {
    validate_task_id(&task_id)?;
    TextLocator::new(&state.config)
        .map_locations(&task_id)?
        .map(Json)
        .ok_or_else(|| {
            not_found(format!(
                "parse result or markdown channel result for task {}",
                task_id
            ))
        })
}

// ============ POST /api/save-decision ============

#[derive(Deserialize)]
struct SaveDecisionRequest {
    document_id: String,
    #[serde(default)]
    decision: Value,
}

#[derive(Serialize)]
struct SaveDecisionResponse {
    message: String,
}

async fn handle_save_decision(
    State(state): State<AppState>,
    Json(req): Json<SaveDecisionRequest>,
) -> Result<Json<SaveDecisionResponse>, AppError> {
    let decision = match req.decision {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let path = state.tasks().save_decision(&req.document_id, &decision)?;
    tracing::info!(path = %path.display(), "decision saved");
    Ok(Json(SaveDecisionResponse {
        message: "decision saved".to_string(),
    }))
}
