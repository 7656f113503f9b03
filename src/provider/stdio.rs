//! Stdio transport for the tool provider.
//!
//! Spawns the provider through the `uvx` launcher and speaks newline-delimited
//! JSON-RPC 2.0 over its stdin/stdout.

use super::{ProcessLauncher, ToolDescriptor, ToolOutput, ToolSession, PROVIDER_NAME};
use crate::config::ToolProviderConfig;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, trace};

/// Executable that runs the provider package.
const LAUNCHER: &str = "uvx";

/// Protocol revision sent during the handshake.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Python version pinned for the launched provider.
const PROVIDER_PYTHON: &str = "3.12";

/// JSON-RPC 2.0 request or notification.
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Transport {
    reader: Reader,
    writer: Writer,
    next_id: u64,
}

impl Transport {
    async fn send(&mut self, id: Option<u64>, method: &str, params: Option<Value>) -> Result<()> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| GatewayError::internal(format!("Failed to encode request: {e}")))?;
        line.push('\n');
        trace!("-> {}", method);

        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| GatewayError::unavailable(PROVIDER_NAME, format!("write failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| GatewayError::unavailable(PROVIDER_NAME, format!("write failed: {e}")))?;
        Ok(())
    }

    /// Reads lines until the response for `id` arrives. Notifications, other
    /// ids and non-JSON log lines are skipped.
    async fn receive(&mut self, id: u64) -> Result<JsonRpcResponse> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| GatewayError::unavailable(PROVIDER_NAME, format!("read failed: {e}")))?;
            if read == 0 {
                return Err(GatewayError::unavailable(
                    PROVIDER_NAME,
                    "provider closed its output",
                ));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) else {
                debug!("Ignoring non-protocol provider output: {}", trimmed);
                continue;
            };
            if response.id.as_ref().and_then(Value::as_u64) == Some(id) {
                return Ok(response);
            }
            trace!("Skipping provider message without matching id");
        }
    }
}

/// An initialized JSON-RPC session over a byte stream pair.
pub struct StdioSession {
    transport: tokio::sync::Mutex<Transport>,
    child: Mutex<Option<Child>>,
}

impl StdioSession {
    /// Performs the `initialize` handshake over the given streams.
    pub async fn connect<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let session = Self {
            transport: tokio::sync::Mutex::new(Transport {
                reader: BufReader::new(reader),
                writer: Box::new(writer),
                next_id: 1,
            }),
            child: Mutex::new(None),
        };

        let init = session
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "querygate",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;
        let server = init
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!("Tool provider '{}' initialized", server);

        session
            .transport
            .lock()
            .await
            .send(None, "notifications/initialized", None)
            .await?;

        Ok(session)
    }

    fn attach_child(self, child: Child) -> Self {
        *self.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
        self
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut transport = self.transport.lock().await;
        let id = transport.next_id;
        transport.next_id += 1;

        transport.send(Some(id), method, Some(params)).await?;
        let response = transport.receive(id).await?;

        if let Some(error) = response.error {
            return Err(GatewayError::execution(
                PROVIDER_NAME,
                format!("{method} failed ({}): {}", error.code, error.message),
            ));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ToolSession for StdioSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let mut result = self.request("tools/list", params).await?;

            let tools_value = result
                .get_mut("tools")
                .map(Value::take)
                .unwrap_or_else(|| json!([]));
            let page: Vec<ToolDescriptor> = serde_json::from_value(tools_value)
                .map_err(|e| GatewayError::execution(PROVIDER_NAME, format!("bad tools/list reply: {e}")))?;
            tools.extend(page);

            cursor = result
                .get("nextCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
        }

        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;

        let text = result
            .get("content")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|item| item.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(ToolOutput { text, is_error })
    }
}

/// Launches the provider as a child process.
#[derive(Debug, Clone)]
pub struct StdioLauncher {
    config: ToolProviderConfig,
}

impl StdioLauncher {
    pub fn new(config: ToolProviderConfig) -> Self {
        Self { config }
    }

    /// Locates the launcher: the configured path, then `PATH`, then the usual
    /// user install directories.
    pub fn find_launcher(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config.launcher {
            if path.is_file() {
                return Some(path.clone());
            }
            debug!("Configured launcher {} does not exist", path.display());
        }

        if let Ok(path) = which::which(LAUNCHER) {
            return Some(path);
        }

        launcher_candidates(dirs::home_dir())
            .into_iter()
            .find(|path| path.is_file())
    }

    /// Arguments passed to the launcher.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.config.quiet {
            args.push("--quiet".to_string());
        }
        args.push(self.config.server_package.clone());
        args.push("--url".to_string());
        args.push(self.config.url.clone());
        if let Some(token) = self.config.token.as_deref().filter(|t| !t.is_empty()) {
            args.push("--token".to_string());
            args.push(token.to_string());
        }
        args
    }

    async fn spawn_and_connect(&self, launcher: PathBuf) -> Result<StdioSession> {
        let mut command = Command::new(&launcher);
        command
            .args(self.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(python) = default_python(std::env::var_os("UV_PYTHON")) {
            command.env("UV_PYTHON", python);
        }
        if let Some(path) = extended_path(&launcher) {
            command.env("PATH", path);
        }

        let mut child = command
            .spawn()
            .map_err(|e| GatewayError::unavailable(PROVIDER_NAME, format!("spawn failed: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::unavailable(PROVIDER_NAME, "no stdin pipe"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::unavailable(PROVIDER_NAME, "no stdout pipe"))?;

        let session = StdioSession::connect(stdout, stdin).await?;
        Ok(session.attach_child(child))
    }
}

#[async_trait]
impl ProcessLauncher for StdioLauncher {
    async fn launch(&self) -> Result<Arc<dyn ToolSession>> {
        self.config.validate()?;

        let launcher = self.find_launcher().ok_or_else(|| {
            GatewayError::unavailable(
                PROVIDER_NAME,
                format!("{LAUNCHER} not found; install uv or set UVX_PATH"),
            )
        })?;
        info!(
            "Starting tool provider via {} (url {})",
            launcher.display(),
            self.config.url
        );

        let timeout = self.config.connect_timeout();
        let session = tokio::time::timeout(timeout, self.spawn_and_connect(launcher))
            .await
            .map_err(|_| {
                GatewayError::unavailable(
                    PROVIDER_NAME,
                    format!("handshake timed out after {}s", timeout.as_secs()),
                )
            })??;

        Ok(Arc::new(session))
    }
}

/// Well-known install locations for the launcher.
fn launcher_candidates(home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = home {
        candidates.push(home.join(".local").join("bin").join(LAUNCHER));
    }
    candidates.push(PathBuf::from("/opt/render/.local/bin").join(LAUNCHER));
    candidates
}

/// The interpreter to pin for the launcher, unless the caller already chose one.
fn default_python(existing: Option<std::ffi::OsString>) -> Option<&'static str> {
    existing.is_none().then_some(PROVIDER_PYTHON)
}

/// `PATH` with the launcher's directory prepended, so the packages it
/// installs can find their sibling executables.
fn extended_path(launcher: &std::path::Path) -> Option<std::ffi::OsString> {
    let dir = launcher.parent()?.to_path_buf();
    let existing = std::env::var_os("PATH").unwrap_or_default();
    let mut paths = vec![dir];
    paths.extend(std::env::split_paths(&existing));
    std::env::join_paths(paths).ok()
}
