//! Request handlers.
//!
//! JSON endpoints answer HTTP 200 with an `ok` flag; failures carry the error
//! message and its category. Downloads use real status codes.

use super::{AppState, WorkerMode, WorkerRequest};
use crate::db::{QueryResult, Records};
use crate::error::{GatewayError, Result};
use crate::query::{QueryOutput, QueryRequest};
use crate::runs::{self, RunSnapshot};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio_util::io::ReaderStream;
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct TablesParams {
    pub backend: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatIn {
    #[serde(default)]
    pub message: String,
}

#[derive(Serialize)]
struct RecordsBody<'a> {
    ok: bool,
    rows: Records<'a>,
    columns: &'a [String],
    row_count: usize,
}

impl<'a> RecordsBody<'a> {
    fn new(result: &'a QueryResult) -> Self {
        Self {
            ok: true,
            rows: result.records(),
            columns: &result.columns,
            row_count: result.row_count(),
        }
    }
}

/// The `{ok: false}` envelope.
fn failure(error: &GatewayError) -> Response {
    Json(json!({
        "ok": false,
        "error": error.to_string(),
        "category": error.category(),
    }))
    .into_response()
}

/// A JSON request body, or the `{ok: false}` envelope explaining why it
/// could not be read.
type JsonPayload<T> = std::result::Result<Json<T>, JsonRejection>;

fn json_body<T>(payload: JsonPayload<T>) -> std::result::Result<T, Response> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        let message = rejection.body_text();
        warn!("Rejected request body: {}", message);
        failure(&GatewayError::invalid_request(message))
    })
}

fn detail(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "detail": message }))).into_response()
}

/// Runs blocking filesystem work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| GatewayError::internal(format!("blocking task failed: {e}")))
}

async fn active_run(state: &AppState) -> Result<Option<PathBuf>> {
    let tracker = state.tracker.clone();
    let base = state.outputs_dir.clone();
    blocking(move || tracker.resolve_active(&base)).await
}

pub async fn query(State(state): State<AppState>, payload: JsonPayload<QueryRequest>) -> Response {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match state.gateway.run(&request).await {
        Ok(QueryOutput::Records(result)) => Json(RecordsBody::new(&result)).into_response(),
        Ok(QueryOutput::Csv(csv)) => Json(json!({ "ok": true, "csv": csv })).into_response(),
        Err(e) => failure(&e),
    }
}

pub async fn tables(State(state): State<AppState>, Query(params): Query<TablesParams>) -> Response {
    match state.gateway.list_tables(&params.backend).await {
        Ok(tables) => Json(json!({
            "ok": true,
            "backend": params.backend,
            "tables": tables,
        }))
        .into_response(),
        Err(e) => failure(&e),
    }
}

pub async fn backends(State(state): State<AppState>) -> Response {
    let backends = state.gateway.connector().backends();
    Json(json!({ "ok": true, "backends": backends })).into_response()
}

pub async fn tools(State(state): State<AppState>) -> Response {
    let Some(catalog) = state.catalog.as_ref() else {
        return failure(&GatewayError::unavailable(
            crate::provider::PROVIDER_NAME,
            "tool provider is not configured",
        ));
    };
    match catalog.attach().await {
        Ok(tools) => Json(json!({ "ok": true, "tools": tools })).into_response(),
        Err(e) => failure(&e),
    }
}

pub async fn files(State(state): State<AppState>) -> Response {
    let tracker = state.tracker.clone();
    let base = state.outputs_dir.clone();
    let extensions = state.data_extensions.clone();

    let listing = blocking(move || {
        let run = tracker.resolve_active(&base);
        let files = run
            .as_deref()
            .map(|dir| runs::list_data_files(dir, &extensions))
            .unwrap_or_default();
        (files, run)
    })
    .await;

    match listing {
        Ok((files, run)) => Json(json!({
            "ok": true,
            "files": files,
            "active_run": run,
        }))
        .into_response(),
        Err(e) => failure(&e),
    }
}

pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Response {
    if runs::check_relative(&params.path).is_err() {
        return detail(StatusCode::BAD_REQUEST, "Invalid path.");
    }

    let tracker = state.tracker.clone();
    let base = state.outputs_dir.clone();
    let rel = params.path.clone();
    let outcome = blocking(move || {
        let run = tracker.resolve_active(&base).ok_or(GatewayError::NoActiveRun)?;
        runs::resolve_file(&run, &rel)
    })
    .await
    .and_then(|inner| inner);

    match outcome {
        Ok(path) => match stream_file(&path).await {
            Ok(response) => response,
            Err(e) => {
                error!("Download of {:?} failed: {}", params.path, e);
                detail(StatusCode::INTERNAL_SERVER_ERROR, "Could not read file.")
            }
        },
        Err(GatewayError::NoActiveRun) => detail(StatusCode::NOT_FOUND, "No active run."),
        Err(GatewayError::NotFound(_)) => detail(StatusCode::NOT_FOUND, "File not found."),
        Err(GatewayError::PathTraversalRejected(_)) => {
            detail(StatusCode::BAD_REQUEST, "Invalid path.")
        }
        Err(e) => {
            error!("Download of {:?} failed: {}", params.path, e);
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Could not read file.")
        }
    }
}

/// Streams a file as an attachment without reading it into memory.
async fn stream_file(path: &Path) -> std::io::Result<Response> {
    let file = tokio::fs::File::open(path).await?;
    let length = file.metadata().await?.len();

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "download".to_string());
    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => "text/csv",
        Some(ext) if ext.eq_ignore_ascii_case("md") => "text/markdown",
        _ => "application/octet-stream",
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
            (header::CONTENT_LENGTH, length.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

pub async fn validation(State(state): State<AppState>) -> Response {
    let tracker = state.tracker.clone();
    let base = state.outputs_dir.clone();
    let report = blocking(move || {
        tracker
            .resolve_active(&base)
            .and_then(|run| runs::validation_report(&run))
    })
    .await;

    match report {
        Ok(md) => Json(json!({ "ok": true, "md": md.unwrap_or_default() })).into_response(),
        Err(e) => failure(&e),
    }
}

pub async fn run_status(State(state): State<AppState>) -> Json<RunSnapshot> {
    Json(state.tracker.snapshot())
}

pub async fn start_full(State(state): State<AppState>, payload: JsonPayload<ChatIn>) -> Response {
    match json_body(payload) {
        Ok(body) => drive_worker(&state, WorkerMode::Full, body.message, true).await,
        Err(response) => response,
    }
}

pub async fn start_convo(State(state): State<AppState>) -> Response {
    drive_worker(&state, WorkerMode::Kickoff, String::new(), true).await
}

pub async fn chat_convo(State(state): State<AppState>, payload: JsonPayload<ChatIn>) -> Response {
    match json_body(payload) {
        Ok(body) => drive_worker(&state, WorkerMode::Chat, body.message, false).await,
        Err(response) => response,
    }
}

/// Stamps the run (for new runs), hands the turn to the worker, then resolves
/// the directory the worker wrote into.
async fn drive_worker(state: &AppState, mode: WorkerMode, message: String, stamp: bool) -> Response {
    if stamp {
        state.tracker.stamp_start();
    }

    let tools = match &state.catalog {
        Some(catalog) => match catalog.attach().await {
            Ok(tools) => tools.iter().map(|t| t.name.clone()).collect(),
            Err(e) => {
                warn!("Continuing without provider tools: {}", e);
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let request = WorkerRequest {
        mode,
        message,
        tools,
    };
    let reply = match state.worker.invoke(&request).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Worker turn failed: {}", e);
            return failure(&e);
        }
    };

    match active_run(state).await {
        Ok(run) => Json(json!({ "ok": true, "reply": reply, "active_run": run })).into_response(),
        Err(e) => failure(&e),
    }
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": env!("CARGO_PKG_NAME") }))
}

pub async fn live() -> &'static str {
    "OK"
}

pub async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "ready": true,
        "backends": state.gateway.connector().backends().len(),
    }))
}
