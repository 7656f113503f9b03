//! Embedded analytic engine backend using DuckDB.
//!
//! Covers `duckdb:` DSNs (a database file or `:memory:`) and hosted `md:`
//! databases. The engine is synchronous, so every call runs on the blocking
//! thread pool with the connection behind a mutex.

use crate::config::redact_dsn;
use crate::db::{Backend, QueryResult, Row, TableListing, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::{AccessMode, Config, Connection};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

const TABLES_SQL: &str = r#"
    SELECT table_schema, table_name
    FROM information_schema.tables
    WHERE table_schema NOT IN ('information_schema', 'pg_catalog')
    ORDER BY table_schema, table_name
"#;

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Where a DuckDB DSN points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
    Hosted(String),
}

impl Target {
    fn parse(dsn: &str) -> Self {
        let dsn = dsn.trim();
        if dsn.starts_with("md:") {
            return Self::Hosted(dsn.to_string());
        }

        let rest = dsn.strip_prefix("duckdb:").unwrap_or(dsn);
        // duckdb:///abs/path and duckdb://rel/path
        let rest = rest.strip_prefix("//").unwrap_or(rest);

        match rest {
            "" | ":memory:" => Self::Memory,
            path => Self::File(PathBuf::from(path)),
        }
    }

    fn open(&self) -> duckdb::Result<Connection> {
        match self {
            Self::Memory => Connection::open_in_memory(),
            Self::File(path) => {
                let config = Config::default().access_mode(AccessMode::ReadOnly)?;
                Connection::open_with_flags(path, config)
            }
            Self::Hosted(url) => Connection::open(url),
        }
    }

    /// Printable form with hosted credentials masked.
    fn redacted(&self) -> String {
        match self {
            Self::Memory => ":memory:".to_string(),
            Self::File(path) => path.display().to_string(),
            Self::Hosted(url) => redact_dsn(url),
        }
    }
}

/// DuckDB-backed query backend.
///
/// The connection is opened on first use and kept for later queries.
pub struct DuckDbBackend {
    name: String,
    target: Target,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl DuckDbBackend {
    /// Creates a backend for a DuckDB DSN without opening it.
    pub fn new(name: &str, dsn: &str) -> Self {
        Self {
            name: name.to_string(),
            target: Target::parse(dsn),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs `sql` on the blocking pool, opening the connection if needed.
    async fn run(&self, sql: &str) -> Result<QueryResult> {
        let name = self.name.clone();
        let target = self.target.clone();
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_none() {
                let opened = target
                    .open()
                    .map_err(|e| GatewayError::unavailable(&name, redact_dsn(&e.to_string())))?;
                info!("Opened DuckDB backend '{}'", name);
                *guard = Some(opened);
            }
            let Some(conn) = guard.as_ref() else {
                return Err(GatewayError::internal("DuckDB connection missing after open"));
            };
            run_duckdb_query(conn, &sql).map_err(|e| GatewayError::execution(&name, e))
        })
        .await
        .map_err(|e| GatewayError::internal(format!("DuckDB task failed: {e}")))?
    }
}

impl std::fmt::Debug for DuckDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbBackend")
            .field("name", &self.name)
            .field("target", &self.target.redacted())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Backend for DuckDbBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        let result = self.run(sql).await?;
        debug!(
            "Backend '{}' returned {} rows in {:?}",
            self.name,
            result.row_count(),
            start.elapsed()
        );
        Ok(result)
    }

    async fn list_tables(&self) -> Result<TableListing> {
        let result = self.run(TABLES_SQL).await?;
        Ok(TableListing::from_schema_rows(&result))
    }

    async fn column_labels(&self, sql: &str) -> Result<Option<Vec<String>>> {
        let described = self.run(&format!("DESCRIBE {sql}")).await?;
        Ok(labels_from_describe(&described))
    }
}

/// Executes a statement on a DuckDB connection and collects every row.
pub(crate) fn run_duckdb_query(conn: &Connection, sql: &str) -> duckdb::Result<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows_iter = stmt.query([])?;

    let columns: Vec<String> = match rows_iter.as_ref() {
        Some(stmt_ref) => (0..stmt_ref.column_count())
            .map(|i| {
                stmt_ref
                    .column_name(i)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| format!("col{i}"))
            })
            .collect(),
        None => return Ok(QueryResult::new()),
    };

    let mut rows = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut values: Row = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            values.push(convert_value(row.get_ref(i)?, i));
        }
        rows.push(values);
    }

    Ok(QueryResult::with_data(columns, rows))
}

/// Column labels from a `DESCRIBE` result, whose first column is the name.
pub(crate) fn labels_from_describe(result: &QueryResult) -> Option<Vec<String>> {
    let labels: Vec<String> = result
        .rows
        .iter()
        .filter_map(|row| row.first())
        .map(Value::to_field)
        .collect();
    (!labels.is_empty()).then_some(labels)
}

/// `None` when the value does not fit in microseconds.
fn to_micros(unit: TimeUnit, v: i64) -> Option<i64> {
    match unit {
        TimeUnit::Second => v.checked_mul(1_000_000),
        TimeUnit::Millisecond => v.checked_mul(1_000),
        TimeUnit::Microsecond => Some(v),
        TimeUnit::Nanosecond => Some(v / 1_000),
    }
}

fn convert_value(value: ValueRef<'_>, index: usize) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(v) => Value::Bool(v),
        ValueRef::TinyInt(v) => Value::Int(v as i64),
        ValueRef::SmallInt(v) => Value::Int(v as i64),
        ValueRef::Int(v) => Value::Int(v as i64),
        ValueRef::BigInt(v) => Value::Int(v),
        ValueRef::HugeInt(v) => match i64::try_from(v) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::String(v.to_string()),
        },
        ValueRef::UTinyInt(v) => Value::Int(v as i64),
        ValueRef::USmallInt(v) => Value::Int(v as i64),
        ValueRef::UInt(v) => Value::Int(v as i64),
        ValueRef::UBigInt(v) => match i64::try_from(v) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::String(v.to_string()),
        },
        ValueRef::Float(v) => Value::Float(v as f64),
        ValueRef::Double(v) => Value::Float(v),
        ValueRef::Decimal(v) => Value::String(v.to_string()),
        ValueRef::Text(v) => Value::String(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
        ValueRef::Timestamp(unit, v) => {
            let Some(micros) = to_micros(unit, v) else {
                warn!("Timestamp at column {} is out of range", index);
                return Value::String(v.to_string());
            };
            let secs = micros.div_euclid(1_000_000);
            let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
            match chrono::DateTime::from_timestamp(secs, nanos) {
                Some(dt) => Value::String(dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
                None => Value::Int(micros),
            }
        }
        ValueRef::Date32(days) => {
            match chrono::NaiveDate::from_num_days_from_ce_opt(UNIX_EPOCH_DAYS_FROM_CE + days) {
                Some(date) => Value::String(date.format("%Y-%m-%d").to_string()),
                None => Value::Int(days as i64),
            }
        }
        ValueRef::Time64(unit, v) => {
            let Some(micros) = to_micros(unit, v) else {
                warn!("Time at column {} is out of range", index);
                return Value::String(v.to_string());
            };
            let secs = (micros / 1_000_000) as u32;
            let nanos = ((micros % 1_000_000) * 1_000) as u32;
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos) {
                Some(time) => Value::String(time.format("%H:%M:%S%.f").to_string()),
                None => Value::Int(micros),
            }
        }
        ValueRef::Interval {
            months,
            days,
            nanos,
        } => Value::String(format!("P{months}M{days}DT{nanos}N")),
        other => {
            warn!(
                "DuckDB type {:?} at column {} mapped to debug string",
                std::mem::discriminant(&other),
                index
            );
            Value::String(format!("{other:?}"))
        }
    }
}
