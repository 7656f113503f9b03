//! HTTP layer for querygate.
//!
//! Wires the gateway, run tracker, tool catalog and worker into an axum
//! router. Handlers hold no state of their own; everything lives in
//! [`AppState`].

pub mod handlers;
pub mod worker;

pub use worker::{CommandWorker, UnconfiguredWorker, Worker, WorkerMode, WorkerRequest};

use crate::config::{BackendConfig, Config};
use crate::connection::{BackendConnector, DriverFactory};
use crate::db::BackendDescriptor;
use crate::provider::{LazyProcessClient, StdioLauncher, ToolCatalog};
use crate::query::QueryGateway;
use crate::runs::RunTracker;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Shared context for every request.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<QueryGateway>,
    pub tracker: Arc<RunTracker>,
    pub outputs_dir: Arc<PathBuf>,
    pub data_extensions: Arc<Vec<String>>,
    pub worker: Arc<dyn Worker>,
    pub catalog: Option<Arc<ToolCatalog>>,
}

impl AppState {
    /// Creates a state with a fresh run tracker, CSV data files and no tool catalog.
    pub fn new(gateway: Arc<QueryGateway>, outputs_dir: PathBuf, worker: Arc<dyn Worker>) -> Self {
        Self {
            gateway,
            tracker: Arc::new(RunTracker::new()),
            outputs_dir: Arc::new(outputs_dir),
            data_extensions: Arc::new(vec![crate::db::CSV_EXTENSION.to_string()]),
            worker,
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_data_extensions(mut self, extensions: Vec<String>) -> Self {
        self.data_extensions = Arc::new(extensions);
        self
    }

    /// Builds the full application from configuration. Nothing connects yet.
    pub fn from_config(config: &Config) -> Self {
        let descriptors: Vec<BackendDescriptor> = config
            .backends
            .iter()
            .map(|(name, backend)| BackendDescriptor::from_config(name, backend))
            .collect();

        let uses_provider = config
            .backends
            .values()
            .any(|b| matches!(b, BackendConfig::ToolProvider));
        let provider = uses_provider.then(|| {
            Arc::new(LazyProcessClient::new(Arc::new(StdioLauncher::new(
                config.tool_provider.clone(),
            ))))
        });

        let factory = DriverFactory::new(provider.clone(), &config.tool_provider.query_tool);
        let connector = Arc::new(BackendConnector::new(descriptors, Arc::new(factory)));
        let gateway = Arc::new(QueryGateway::new(connector));

        let worker: Arc<dyn Worker> = match &config.worker.command {
            Some(command) => Arc::new(CommandWorker::new(
                command.clone(),
                config.worker.args.clone(),
                config.runs.outputs_dir.clone(),
            )),
            None => Arc::new(UnconfiguredWorker),
        };

        info!(
            "Configured {} backends, outputs in {}",
            config.backends.len(),
            config.runs.outputs_dir.display()
        );

        let state = Self::new(gateway, config.runs.outputs_dir.clone(), worker)
            .with_data_extensions(config.runs.data_extensions.clone());
        match provider {
            Some(client) => state.with_catalog(Arc::new(ToolCatalog::new(client))),
            None => state,
        }
    }
}

/// Builds the router with every endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/query", post(handlers::query))
        .route("/api/tables", get(handlers::tables))
        .route("/api/backends", get(handlers::backends))
        .route("/api/tools", get(handlers::tools))
        .route("/api/files", get(handlers::files))
        .route("/api/download", get(handlers::download))
        .route("/api/validation", get(handlers::validation))
        .route("/api/run", get(handlers::run_status))
        .route("/api/start_full", post(handlers::start_full))
        .route("/api/start_convo", post(handlers::start_convo))
        .route("/api/chat_convo", post(handlers::chat_convo))
        .route("/healthz", get(handlers::healthz))
        .route("/live", get(handlers::live))
        .route("/ready", get(handlers::ready))
        .with_state(state)
}
