//! The external worker that produces run directories.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Which conversation entry point the worker should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// One-shot run from a full prompt.
    Full,
    /// Start of a conversational run.
    Kickoff,
    /// Follow-up message in a conversational run.
    Chat,
}

impl WorkerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Kickoff => "kickoff",
            Self::Chat => "chat",
        }
    }
}

/// A single worker turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub mode: WorkerMode,
    pub message: String,
    /// Names of the provider tools available to the worker.
    pub tools: Vec<String>,
}

/// Runs one worker turn and returns its reply.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, request: &WorkerRequest) -> Result<String>;
}

/// Runs the worker as a command: `<command> <args..> <mode> <message>`.
///
/// The reply is the command's stdout. The output directory and tool names
/// are passed as `QUERYGATE_OUTPUTS_DIR` and `QUERYGATE_TOOLS`.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: String,
    args: Vec<String>,
    outputs_dir: PathBuf,
}

impl CommandWorker {
    pub fn new(command: impl Into<String>, args: Vec<String>, outputs_dir: PathBuf) -> Self {
        Self {
            command: command.into(),
            args,
            outputs_dir,
        }
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn invoke(&self, request: &WorkerRequest) -> Result<String> {
        info!("Invoking worker ({})", request.mode.as_str());

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(request.mode.as_str())
            .arg(&request.message)
            .env("QUERYGATE_OUTPUTS_DIR", &self.outputs_dir)
            .env("QUERYGATE_TOOLS", request.tools.join(","))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GatewayError::worker(format!("failed to start {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::worker(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let reply = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        debug!("Worker replied with {} bytes", reply.len());
        Ok(reply)
    }
}

/// Placeholder used when no worker command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredWorker;

#[async_trait]
impl Worker for UnconfiguredWorker {
    async fn invoke(&self, _request: &WorkerRequest) -> Result<String> {
        Err(GatewayError::worker(
            "no worker command configured (set WORKER_COMMAND)",
        ))
    }
}
