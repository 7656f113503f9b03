//! Backend connector: name to handle, created on demand.

use crate::db::{self, Backend, BackendDescriptor, BackendKind, BackendSummary, CsvDirectorySession};
use crate::error::{GatewayError, Result};
use crate::provider::{LazyProcessClient, ToolProviderBackend, PROVIDER_NAME};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Builds a backend handle from its descriptor.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn open(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Backend>>;
}

/// Factory for the real drivers.
pub struct DriverFactory {
    provider: Option<Arc<LazyProcessClient>>,
    query_tool: String,
}

impl DriverFactory {
    /// Creates a factory. `provider` serves tool-provider backends.
    pub fn new(provider: Option<Arc<LazyProcessClient>>, query_tool: &str) -> Self {
        Self {
            provider,
            query_tool: query_tool.to_string(),
        }
    }
}

#[async_trait]
impl BackendFactory for DriverFactory {
    async fn open(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Backend>> {
        let name = descriptor.name.as_str();
        match &descriptor.kind {
            BackendKind::RelationalDsn { dsn } => db::open_dsn(name, dsn),
            BackendKind::EmbeddedDirectory { base_dir } => {
                let owned_name = name.to_string();
                let base_dir = base_dir.clone();
                let session = tokio::task::spawn_blocking(move || {
                    CsvDirectorySession::open(&owned_name, &base_dir)
                })
                .await
                .map_err(|e| GatewayError::internal(format!("CSV session task failed: {e}")))??;
                Ok(Arc::new(session))
            }
            BackendKind::ToolProvider => {
                let client = self.provider.as_ref().ok_or_else(|| {
                    GatewayError::unavailable(PROVIDER_NAME, "tool provider is not configured")
                })?;
                let session = client.get().await?;
                Ok(Arc::new(ToolProviderBackend::new(
                    name,
                    session,
                    &self.query_tool,
                )))
            }
        }
    }
}

/// Hands out backend handles by name.
///
/// Cached kinds are built once per name, on first acquisition; concurrent
/// first acquisitions share one build. Directory backends are rebuilt on
/// every acquisition.
pub struct BackendConnector {
    descriptors: BTreeMap<String, BackendDescriptor>,
    factory: Arc<dyn BackendFactory>,
    cells: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn Backend>>>>>,
    builds: AtomicUsize,
}

impl BackendConnector {
    pub fn new(descriptors: Vec<BackendDescriptor>, factory: Arc<dyn BackendFactory>) -> Self {
        let descriptors = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self {
            descriptors,
            factory,
            cells: Mutex::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }

    /// Returns a handle for `name`.
    pub async fn acquire(&self, name: &str) -> Result<Arc<dyn Backend>> {
        let descriptor = self
            .descriptors
            .get(name)
            .ok_or_else(|| GatewayError::unavailable(name, "unknown backend"))?;

        if !descriptor.kind.is_cached() {
            return self.build(descriptor).await;
        }

        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(cells.entry(name.to_string()).or_default())
        };

        let backend = cell.get_or_try_init(|| self.build(descriptor)).await?;
        Ok(Arc::clone(backend))
    }

    async fn build(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn Backend>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Building {} backend '{}'",
            descriptor.kind.as_str(),
            descriptor.name
        );
        let backend = self.factory.open(descriptor).await?;
        info!("Backend '{}' ready", descriptor.name);
        Ok(backend)
    }

    /// Configured backends, sorted by name.
    pub fn backends(&self) -> Vec<BackendSummary> {
        self.descriptors.values().map(|d| d.summary()).collect()
    }

    /// Returns true if `name` is configured.
    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Number of handle builds started so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}
