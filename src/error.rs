//! Error types for querygate.
//!
//! Defines the main error enum used throughout the gateway. Every component
//! converts its failures into one of these variants at its own boundary, so the
//! HTTP layer only ever sees typed values.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for gateway operations.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The statement contains a denylisted write keyword.
    #[error("Write statements are not allowed (read-only policy): found {keyword}")]
    WriteStatementRejected { keyword: String },

    /// The backend could not be reached or configured.
    #[error("Backend '{backend}' is unavailable: {cause}")]
    BackendUnavailable { backend: String, cause: String },

    /// The backend reported a failure while executing the statement.
    #[error("Query on '{backend}' failed: {message}")]
    QueryExecutionFailed { backend: String, message: String },

    /// A directory-backed backend found no files to expose as tables.
    #[error("No tables registered: no eligible files under {}", .0.display())]
    NoTablesRegistered(PathBuf),

    /// No run directory could be resolved.
    #[error("No active run")]
    NoActiveRun,

    /// The requested file does not exist inside the active run.
    #[error("File not found: {0}")]
    NotFound(String),

    /// The requested path would escape the active run directory.
    #[error("Invalid path: {0}")]
    PathTraversalRejected(String),

    /// The request body could not be read as the expected JSON shape.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors (invalid config file, missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external worker failed or could not be started.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Internal errors (I/O failures, unexpected states, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Creates a write-rejection error for the given keyword.
    pub fn write_rejected(keyword: impl Into<String>) -> Self {
        Self::WriteStatementRejected {
            keyword: keyword.into(),
        }
    }

    /// Creates a backend-unavailable error.
    pub fn unavailable(backend: impl Into<String>, cause: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            cause: cause.to_string(),
        }
    }

    /// Creates a query-execution error.
    pub fn execution(backend: impl Into<String>, message: impl ToString) -> Self {
        Self::QueryExecutionFailed {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Creates an invalid-request error with the given message.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a worker error with the given message.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::WriteStatementRejected { .. } => "Write Statement Rejected",
            Self::BackendUnavailable { .. } => "Backend Unavailable",
            Self::QueryExecutionFailed { .. } => "Query Execution Failed",
            Self::NoTablesRegistered(_) => "No Tables Registered",
            Self::NoActiveRun => "No Active Run",
            Self::NotFound(_) => "Not Found",
            Self::PathTraversalRejected(_) => "Path Traversal Rejected",
            Self::InvalidRequest(_) => "Invalid Request",
            Self::Config(_) => "Configuration Error",
            Self::Worker(_) => "Worker Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns true for empty-result conditions that callers should treat as
    /// negative answers rather than failures.
    pub fn is_empty_result(&self) -> bool {
        matches!(
            self,
            Self::NoTablesRegistered(_) | Self::NoActiveRun | Self::NotFound(_)
        )
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Result type alias using GatewayError.
pub type Result<T> = std::result::Result<T, GatewayError>;
