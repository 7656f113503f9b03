//! External tool-provider process.
//!
//! The provider is a child process that exposes SQL tools over a JSON-RPC
//! stdio channel. At most one process is started per gateway: the first
//! caller launches it, concurrent callers wait on the same attempt, a
//! successful session is kept for the process lifetime and a failed attempt
//! is forgotten so the next caller can retry.

pub mod backend;
pub mod stdio;

pub use backend::ToolProviderBackend;
pub use stdio::StdioLauncher;

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Backend label used in errors raised by the provider client.
pub const PROVIDER_NAME: &str = "tool-provider";

/// A tool advertised by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Text returned by a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

/// An initialized session with the provider.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Lists the tools the provider exposes.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invokes a tool with JSON arguments.
    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolOutput>;
}

/// Starts the provider process and completes its handshake.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn ToolSession>>;
}

type SessionFuture = Shared<BoxFuture<'static, Result<Arc<dyn ToolSession>>>>;

enum Slot {
    Idle,
    Connecting { attempt: u64, future: SessionFuture },
    Ready(Arc<dyn ToolSession>),
}

/// Lazily created, single-flight handle to the provider session.
pub struct LazyProcessClient {
    launcher: Arc<dyn ProcessLauncher>,
    slot: Mutex<Slot>,
    next_attempt: AtomicU64,
    launches: AtomicUsize,
}

impl LazyProcessClient {
    /// Creates a client. Nothing is launched until [`get`](Self::get).
    pub fn new(launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            launcher,
            slot: Mutex::new(Slot::Idle),
            next_attempt: AtomicU64::new(0),
            launches: AtomicUsize::new(0),
        }
    }

    /// Returns the provider session, launching it on first use.
    ///
    /// Callers arriving while a launch is in flight share its outcome. Any
    /// failure is reported as `BackendUnavailable` for the tool provider.
    pub async fn get(&self) -> Result<Arc<dyn ToolSession>> {
        let (attempt, future) = {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Ready(session) => return Ok(Arc::clone(session)),
                Slot::Connecting { attempt, future } => (*attempt, future.clone()),
                Slot::Idle => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
                    self.launches.fetch_add(1, Ordering::SeqCst);
                    info!("Launching tool provider (attempt {})", attempt + 1);

                    let launcher = Arc::clone(&self.launcher);
                    let future = async move { launcher.launch().await }.boxed().shared();
                    *slot = Slot::Connecting {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let outcome = future.await;

        {
            let mut slot = self.lock_slot();
            let settles_this_attempt =
                matches!(&*slot, Slot::Connecting { attempt: current, .. } if *current == attempt);
            if settles_this_attempt {
                *slot = match &outcome {
                    Ok(session) => Slot::Ready(Arc::clone(session)),
                    Err(e) => {
                        warn!("Tool provider launch failed: {}", e);
                        Slot::Idle
                    }
                };
            }
        }

        outcome.map_err(|e| match e {
            GatewayError::BackendUnavailable { .. } => e,
            other => GatewayError::unavailable(PROVIDER_NAME, other),
        })
    }

    /// Returns true once a session has been established.
    pub fn is_ready(&self) -> bool {
        matches!(&*self.lock_slot(), Slot::Ready(_))
    }

    /// Number of launch attempts started so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Tools discovered from the provider, attached at most once.
pub struct ToolCatalog {
    client: Arc<LazyProcessClient>,
    tools: OnceCell<Vec<ToolDescriptor>>,
}

impl ToolCatalog {
    pub fn new(client: Arc<LazyProcessClient>) -> Self {
        Self {
            client,
            tools: OnceCell::new(),
        }
    }

    /// Discovers the provider's tools on first call; later calls return the
    /// same list without contacting the provider.
    pub async fn attach(&self) -> Result<&[ToolDescriptor]> {
        let tools = self
            .tools
            .get_or_try_init(|| async {
                let session = self.client.get().await?;
                let tools = session.list_tools().await?;
                info!("Attached {} provider tools", tools.len());
                Ok::<_, GatewayError>(tools)
            })
            .await?;
        debug!("Tool catalog holds {} tools", tools.len());
        Ok(tools.as_slice())
    }

    pub fn is_attached(&self) -> bool {
        self.tools.initialized()
    }

    /// Tool names, empty until attached.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools
            .get()
            .map(|tools| tools.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn client(&self) -> &Arc<LazyProcessClient> {
        &self.client
    }
}
