//! HTTP surface tests: handlers called directly and the router over TCP.

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use pretty_assertions::assert_eq;
use querygate::connection::{BackendConnector, DriverFactory};
use querygate::db::{BackendDescriptor, BackendKind};
use querygate::error::Result;
use querygate::query::QueryGateway;
use querygate::runs::RunPhase;
use querygate::server::handlers::{self, ChatIn, DownloadParams};
use querygate::server::{router, AppState, Worker, WorkerMode, WorkerRequest};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Writes a run directory the way a real worker would.
struct DirectoryWorker {
    outputs: PathBuf,
    seen: Mutex<Vec<WorkerMode>>,
}

#[async_trait]
impl Worker for DirectoryWorker {
    async fn invoke(&self, request: &WorkerRequest) -> Result<String> {
        self.seen.lock().unwrap().push(request.mode);
        let run = self.outputs.join("run_20240101_120000");
        fs::create_dir_all(run.join("tables"))?;
        fs::write(run.join("tables").join("orders.csv"), "id,total\n1,9.5\n")?;
        fs::write(run.join("Validation.md"), "# Checks\n\nAll good.")?;
        fs::write(run.join("notes.txt"), "scratch")?;
        Ok(format!("finished: {}", request.message))
    }
}

fn app(outputs: PathBuf, worker: Arc<dyn Worker>) -> AppState {
    let connector = BackendConnector::new(
        vec![BackendDescriptor::new(
            "duck",
            BackendKind::RelationalDsn {
                dsn: "duckdb://:memory:".to_string(),
            },
        )],
        Arc::new(DriverFactory::new(None, "query")),
    );
    AppState::new(
        Arc::new(QueryGateway::new(Arc::new(connector))),
        outputs,
        worker,
    )
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn download_params(path: &str) -> Query<DownloadParams> {
    Query(DownloadParams {
        path: path.to_string(),
    })
}

#[tokio::test]
async fn test_full_run_then_files_and_download() {
    let outputs = tempfile::tempdir().unwrap();
    let worker = Arc::new(DirectoryWorker {
        outputs: outputs.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    });
    let state = app(outputs.path().to_path_buf(), worker.clone());

    let reply = body_json(
        handlers::start_full(
            State(state.clone()),
            Ok(Json(ChatIn {
                message: "summarize orders".to_string(),
            })),
        )
        .await,
    )
    .await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["reply"], "finished: summarize orders");
    assert!(reply["active_run"]
        .as_str()
        .unwrap()
        .ends_with("run_20240101_120000"));

    let files = body_json(handlers::files(State(state.clone())).await).await;
    assert_eq!(files["files"], serde_json::json!(["tables/orders.csv"]));

    let response = handlers::download(State(state.clone()), download_params("tables/orders.csv")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"orders.csv\""
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "15");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"id,total\n1,9.5\n");

    let validation = body_json(handlers::validation(State(state.clone())).await).await;
    assert_eq!(validation["md"], "# Checks\n\nAll good.");

    let status = handlers::run_status(State(state.clone())).await.0;
    assert_eq!(status.phase, RunPhase::Resolved);

    assert_eq!(*worker.seen.lock().unwrap(), vec![WorkerMode::Full]);
}

#[tokio::test]
async fn test_download_rejections() {
    let outputs = tempfile::tempdir().unwrap();
    let worker = Arc::new(DirectoryWorker {
        outputs: outputs.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    });
    let state = app(outputs.path().to_path_buf(), worker);

    let response = handlers::download(State(state.clone()), download_params("../../etc/passwd")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "Invalid path.");

    let response = handlers::download(State(state.clone()), download_params("a.csv")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "No active run.");

    handlers::start_convo(State(state.clone())).await;
    let response = handlers::download(State(state.clone()), download_params("missing.csv")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["detail"], "File not found.");
}

#[tokio::test]
async fn test_chat_keeps_run_stamp() {
    let outputs = tempfile::tempdir().unwrap();
    let worker = Arc::new(DirectoryWorker {
        outputs: outputs.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    });
    let state = app(outputs.path().to_path_buf(), worker.clone());

    handlers::start_convo(State(state.clone())).await;
    let stamped = state.tracker.snapshot().run_started_at;
    assert!(stamped.is_some());

    let reply = body_json(
        handlers::chat_convo(
            State(state.clone()),
            Ok(Json(ChatIn {
                message: "and by month?".to_string(),
            })),
        )
        .await,
    )
    .await;
    assert_eq!(reply["ok"], true);
    assert_eq!(state.tracker.snapshot().run_started_at, stamped);
    assert_eq!(
        *worker.seen.lock().unwrap(),
        vec![WorkerMode::Kickoff, WorkerMode::Chat]
    );
}

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn http_post(addr: std::net::SocketAddr, path: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

/// The JSON document after the response headers.
fn response_json(response: &str) -> serde_json::Value {
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

async fn serve(state: AppState) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    (addr, server)
}

#[tokio::test]
async fn test_query_over_tcp() {
    let outputs = tempfile::tempdir().unwrap();
    let worker = Arc::new(DirectoryWorker {
        outputs: outputs.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    });
    let (addr, server) = serve(app(outputs.path().to_path_buf(), worker)).await;

    let response = http_post(
        addr,
        "/api/query",
        r#"{"backend":"duck","sql":"SELECT 42 AS answer, CAST(12.50 AS DECIMAL(10,2)) AS amount; -- totals","limit":5}"#,
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response_json(&response);
    assert_eq!(body["ok"], true);
    assert_eq!(body["columns"], serde_json::json!(["answer", "amount"]));
    assert_eq!(
        body["rows"],
        serde_json::json!([{ "answer": 42, "amount": "12.50" }])
    );

    let response = http_post(
        addr,
        "/api/query",
        r#"{"backend":"duck","sql":"SELECT 1","format":"csv"}"#,
    )
    .await;
    assert_eq!(response_json(&response)["csv"], "1\n1\n");

    let response = http_post(addr, "/api/query", r#"{"backend":"duck","sql":"DROP TABLE t"}"#).await;
    let body = response_json(&response);
    assert_eq!(body["ok"], false);
    assert_eq!(body["category"], "Write Statement Rejected");

    server.abort();
}

#[tokio::test]
async fn test_malformed_body_gets_envelope() {
    let outputs = tempfile::tempdir().unwrap();
    let worker = Arc::new(DirectoryWorker {
        outputs: outputs.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    });
    let (addr, server) = serve(app(outputs.path().to_path_buf(), worker.clone())).await;

    // Missing `backend` and `sql`.
    let response = http_post(addr, "/api/query", r#"{"query":"SELECT 1"}"#).await;
    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response_json(&response);
    assert_eq!(body["ok"], false);
    assert_eq!(body["category"], "Invalid Request");
    assert!(body["error"].as_str().unwrap().contains("backend"));

    let response = http_post(addr, "/api/query", "not json").await;
    assert_eq!(response_json(&response)["category"], "Invalid Request");

    let response = http_post(addr, "/api/chat_convo", r#"{"message": 5}"#).await;
    assert_eq!(response_json(&response)["category"], "Invalid Request");
    assert!(worker.seen.lock().unwrap().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_router_over_tcp() {
    let outputs = tempfile::tempdir().unwrap();
    let worker = Arc::new(DirectoryWorker {
        outputs: outputs.path().to_path_buf(),
        seen: Mutex::new(Vec::new()),
    });
    let app = router(app(outputs.path().to_path_buf(), worker));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let health = http_get(addr, "/healthz").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.contains(r#""service":"querygate""#));

    let live = http_get(addr, "/live").await;
    assert!(live.ends_with("OK"));

    let traversal = http_get(addr, "/api/download?path=../../etc/passwd").await;
    assert!(traversal.starts_with("HTTP/1.1 400"));

    let backends = http_get(addr, "/api/backends").await;
    assert!(backends.contains(r#""name":"duck""#));

    server.abort();
}
