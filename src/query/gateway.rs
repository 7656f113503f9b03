//! The query gateway: policy check, statement preparation, dispatch.

use crate::connection::BackendConnector;
use crate::db::{Backend, LimitStrategy, QueryResult, TableListing};
use crate::error::{GatewayError, Result};
use crate::query::format::to_delimited;
use crate::safety::SqlSafetyFilter;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result shape requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Ordered column-to-value records.
    #[default]
    #[serde(alias = "json")]
    Records,
    /// Header line plus one delimited line per row.
    #[serde(alias = "delimited")]
    Csv,
}

/// A query submitted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryRequest {
    pub backend: String,
    pub sql: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub format: OutputFormat,
}

impl QueryRequest {
    pub fn new(backend: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            sql: sql.into(),
            limit: None,
            format: OutputFormat::Records,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Normalized query output.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Records(QueryResult),
    Csv(String),
}

/// Read-only entry point for every query.
pub struct QueryGateway {
    connector: Arc<BackendConnector>,
    filter: SqlSafetyFilter,
}

impl QueryGateway {
    pub fn new(connector: Arc<BackendConnector>) -> Self {
        Self {
            connector,
            filter: SqlSafetyFilter::new(),
        }
    }

    /// Checks, prepares and runs a statement.
    ///
    /// Rejected statements never reach the connector, so no backend handle
    /// is created for them.
    pub async fn run(&self, request: &QueryRequest) -> Result<QueryOutput> {
        if let Err(e) = self.filter.check(&request.sql) {
            warn!(
                "Rejected statement for backend '{}': {}",
                request.backend, e
            );
            return Err(e);
        }

        let backend = self.connector.acquire(&request.backend).await?;
        let start = Instant::now();
        let result = self
            .execute(backend.as_ref(), request)
            .await
            .map_err(|e| as_execution_error(&request.backend, e))?;

        info!(
            "Query on '{}' returned {} rows in {:?}",
            request.backend,
            result.row_count(),
            start.elapsed()
        );

        match request.format {
            OutputFormat::Records => Ok(QueryOutput::Records(result)),
            OutputFormat::Csv => Ok(QueryOutput::Csv(to_delimited(&result)?)),
        }
    }

    async fn execute(&self, backend: &dyn Backend, request: &QueryRequest) -> Result<QueryResult> {
        let limit = request.limit.filter(|n| *n > 0);

        match (limit, backend.limit_strategy()) {
            (Some(n), LimitStrategy::Cap) => {
                let body = statement_body(&request.sql);
                debug!("Running on '{}' capped at {} rows: {}", request.backend, n, body);
                backend.execute_capped(body, n).await
            }
            (Some(_), LimitStrategy::Wrap) => {
                let statement = prepare_statement(&request.sql, limit);
                debug!("Prepared statement for '{}': {}", request.backend, statement);
                let mut result = backend.execute_query(&statement).await?;
                restore_labels(backend, statement_body(&request.sql), &mut result).await;
                Ok(result)
            }
            (None, _) => {
                let statement = prepare_statement(&request.sql, None);
                debug!("Prepared statement for '{}': {}", request.backend, statement);
                backend.execute_query(&statement).await
            }
        }
    }

    /// Lists the tables a backend exposes.
    pub async fn list_tables(&self, backend: &str) -> Result<TableListing> {
        let handle = self.connector.acquire(backend).await?;
        handle.list_tables().await
    }

    pub fn connector(&self) -> &Arc<BackendConnector> {
        &self.connector
    }
}

/// Strips trailing terminators and, for a positive limit, wraps the
/// statement as a subquery with an outer `LIMIT`.
pub fn prepare_statement(sql: &str, limit: Option<u64>) -> String {
    let body = statement_body(sql);

    match limit {
        Some(n) if n > 0 => format!("SELECT * FROM (\n{body}\n) AS _q LIMIT {n}"),
        _ => body.to_string(),
    }
}

/// The statement without trailing whitespace, `;` terminators or `--`
/// comments after the last clause.
pub fn statement_body(sql: &str) -> &str {
    let mut body = sql.trim();
    loop {
        let next = strip_trailing_comment(
            body.trim_end_matches(|c: char| c == ';' || c.is_whitespace()),
        );
        if next.len() == body.len() {
            return body;
        }
        body = next;
    }
}

/// Cuts a `--` comment off the last line, ignoring dashes inside quotes.
fn strip_trailing_comment(sql: &str) -> &str {
    let line_start = sql.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut quote: Option<char> = None;
    let mut chars = sql[line_start..].char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '-') if matches!(chars.peek(), Some((_, '-'))) => {
                return &sql[..line_start + i];
            }
            _ => {}
        }
    }
    sql
}

/// Puts back labels the `LIMIT` wrapper may have changed.
///
/// Some engines rename duplicate columns of a subquery (`a`, `a:1`), so the
/// labels of the unwrapped statement win when the backend can report them.
async fn restore_labels(backend: &dyn Backend, body: &str, result: &mut QueryResult) {
    match backend.column_labels(body).await {
        Ok(Some(labels)) if labels.len() == result.columns.len() => {
            if labels != result.columns {
                debug!("Restoring column labels {:?} over {:?}", labels, result.columns);
                result.columns = labels;
            }
        }
        Ok(_) => {}
        Err(e) => debug!("Could not read column labels: {}", e),
    }
}

fn as_execution_error(backend: &str, error: GatewayError) -> GatewayError {
    match error {
        GatewayError::QueryExecutionFailed { .. } | GatewayError::BackendUnavailable { .. } => {
            error
        }
        other => GatewayError::execution(backend, other),
    }
}
