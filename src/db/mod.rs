//! Backend abstraction layer for querygate.
//!
//! Provides a trait-based interface for read-only query execution, with one
//! implementation per backend variant: relational databases over a DSN
//! (sqlx, or tiberius for SQL Server), the embedded analytic engine over a
//! DSN or a CSV directory (DuckDB), and the external tool provider.

mod csv_dir;
mod embedded;
mod mock;
mod mssql;
mod relational;
mod types;

pub use csv_dir::{CsvDirectorySession, CSV_EXTENSION};
pub use embedded::DuckDbBackend;
pub use mock::{FailingBackend, MockBackend};
pub use mssql::MsSqlBackend;
pub use relational::RelationalBackend;
pub use types::{QueryResult, Records, Row, Value};

use crate::config::{redact_dsn, BackendConfig};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// The closed set of backend variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    /// A relational database or embedded engine addressed by a DSN.
    RelationalDsn { dsn: String },
    /// A directory of CSV files exposed as virtual tables.
    EmbeddedDirectory { base_dir: PathBuf },
    /// Tables served by the external tool-provider process.
    ToolProvider,
}

impl BackendKind {
    /// Returns the kind as a string for API output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelationalDsn { .. } => "relational-dsn",
            Self::EmbeddedDirectory { .. } => "embedded-directory",
            Self::ToolProvider => "tool-provider",
        }
    }

    /// Returns true if handles for this kind are cached across requests.
    ///
    /// Directory handles are rebuilt on every acquisition so they always see
    /// the current directory contents.
    pub fn is_cached(&self) -> bool {
        !matches!(self, Self::EmbeddedDirectory { .. })
    }
}

/// Immutable description of a named, read-only backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub name: String,
    pub kind: BackendKind,
    read_only: bool,
}

impl BackendDescriptor {
    /// Creates a descriptor. Backends are always read-only.
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            read_only: true,
        }
    }

    /// Builds a descriptor from a configuration entry.
    pub fn from_config(name: &str, config: &BackendConfig) -> Self {
        let kind = match config {
            BackendConfig::Dsn { dsn } => BackendKind::RelationalDsn { dsn: dsn.clone() },
            BackendConfig::Directory { path } => BackendKind::EmbeddedDirectory {
                base_dir: path.clone(),
            },
            BackendConfig::ToolProvider => BackendKind::ToolProvider,
        };
        Self::new(name, kind)
    }

    /// Always true.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Returns a summary safe to show to API callers (passwords redacted).
    pub fn summary(&self) -> BackendSummary {
        let target = match &self.kind {
            BackendKind::RelationalDsn { dsn } => Some(redact_dsn(dsn)),
            BackendKind::EmbeddedDirectory { base_dir } => Some(base_dir.display().to_string()),
            BackendKind::ToolProvider => None,
        };
        BackendSummary {
            name: self.name.clone(),
            kind: self.kind.as_str(),
            target,
            read_only: self.read_only,
        }
    }
}

/// Public view of a backend descriptor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackendSummary {
    pub name: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub read_only: bool,
}

/// Database drivers reachable through a DSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Postgres,
    MySql,
    Sqlite,
    DuckDb,
    MsSql,
}

impl Driver {
    /// Returns the driver as a string for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::DuckDb => "duckdb",
            Self::MsSql => "mssql",
        }
    }

    /// Detects the driver from a DSN and returns it with the DSN normalized
    /// for that driver.
    ///
    /// SQLAlchemy-style `scheme+driver://` prefixes are accepted and the
    /// `+driver` part is dropped.
    pub fn from_dsn(dsn: &str) -> Result<(Self, String)> {
        let dsn = dsn.trim();
        let (scheme, rest) = dsn
            .split_once(':')
            .ok_or_else(|| GatewayError::config(format!("DSN has no scheme: {}", redact_dsn(dsn))))?;
        let base_scheme = scheme
            .split_once('+')
            .map(|(base, _)| base)
            .unwrap_or(scheme)
            .to_lowercase();

        let driver = match base_scheme.as_str() {
            "postgres" | "postgresql" => Self::Postgres,
            "mysql" | "mariadb" => Self::MySql,
            "sqlite" => Self::Sqlite,
            "duckdb" | "md" => Self::DuckDb,
            "mssql" | "sqlserver" => Self::MsSql,
            other => {
                return Err(GatewayError::config(format!(
                    "Unsupported DSN scheme '{other}'. Expected postgres, mysql, sqlite, mssql, duckdb or md"
                )))
            }
        };

        let normalized = match (driver, base_scheme.as_str()) {
            (Self::MySql, "mariadb") => format!("mysql:{rest}"),
            (Self::MsSql, _) => format!("mssql:{rest}"),
            (Self::DuckDb, "md") => dsn.to_string(),
            _ => format!("{base_scheme}:{rest}"),
        };

        Ok((driver, normalized))
    }
}

/// Tables exposed by a backend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TableListing {
    /// Schema name to table names.
    Schemas(BTreeMap<String, Vec<String>>),
    /// Virtual table name to the file it was registered from.
    Files(BTreeMap<String, String>),
}

impl TableListing {
    /// Groups a two-column (schema, table) result into a listing.
    pub fn from_schema_rows(result: &QueryResult) -> Self {
        let mut schemas: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in &result.rows {
            let (Some(schema), Some(table)) = (row.first(), row.get(1)) else {
                continue;
            };
            let schema = match schema {
                Value::Null => "default".to_string(),
                other => other.to_field(),
            };
            schemas.entry(schema).or_default().push(table.to_field());
        }
        Self::Schemas(schemas)
    }
}

/// How a row limit reaches a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStrategy {
    /// The statement is wrapped in a subquery with an outer `LIMIT n`.
    Wrap,
    /// The statement runs unchanged and the backend stops reading after
    /// `n` rows. For dialects without a trailing `LIMIT` (T-SQL).
    Cap,
}

/// Trait defining the interface for query backends.
///
/// All operations are async and return Results with GatewayError.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the logical backend name.
    fn name(&self) -> &str;

    /// Executes a SQL statement and returns the normalized results.
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;

    /// Lists the tables this backend exposes.
    async fn list_tables(&self) -> Result<TableListing>;

    /// How row limits are applied on this backend.
    fn limit_strategy(&self) -> LimitStrategy {
        LimitStrategy::Wrap
    }

    /// Executes `sql` and keeps at most `max_rows` rows.
    async fn execute_capped(&self, sql: &str, max_rows: u64) -> Result<QueryResult> {
        let mut result = self.execute_query(sql).await?;
        result
            .rows
            .truncate(usize::try_from(max_rows).unwrap_or(usize::MAX));
        Ok(result)
    }

    /// Result column labels of `sql` as the backend would report them,
    /// without fetching rows. `None` when the backend cannot tell.
    async fn column_labels(&self, _sql: &str) -> Result<Option<Vec<String>>> {
        Ok(None)
    }
}

/// Opens a DSN-addressed backend without executing anything.
///
/// Connections are established on first use, so an unreachable server only
/// shows up when a query runs.
pub fn open_dsn(name: &str, dsn: &str) -> Result<Arc<dyn Backend>> {
    let (driver, dsn) =
        Driver::from_dsn(dsn).map_err(|e| GatewayError::unavailable(name, e))?;

    match driver {
        Driver::DuckDb => Ok(Arc::new(DuckDbBackend::new(name, &dsn))),
        Driver::MsSql => Ok(Arc::new(MsSqlBackend::from_dsn(name, &dsn)?)),
        _ => Ok(Arc::new(RelationalBackend::connect_lazy(name, driver, &dsn)?)),
    }
}
