//! Relational database backends using sqlx.
//!
//! Provides the `RelationalBackend` struct that implements the `Backend` trait
//! for PostgreSQL, MySQL and SQLite. Pools are created lazily: no connection is
//! opened and no statement runs until the first query.

use crate::db::{Backend, Driver, QueryResult, Row, TableListing, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column as SqlxColumn, Executor, Row as SqlxRow, TypeInfo};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

/// Maximum pooled connections per backend.
const MAX_CONNECTIONS: u32 = 5;

/// How long a query waits for a pooled connection.
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

const POSTGRES_TABLES_SQL: &str = r#"
    SELECT table_schema::text, table_name::text
    FROM information_schema.tables
    WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
    ORDER BY table_schema, table_name
"#;

const MYSQL_TABLES_SQL: &str = r#"
    SELECT table_schema, table_name
    FROM information_schema.tables
    WHERE table_schema NOT IN ('mysql', 'information_schema', 'performance_schema', 'sys')
    ORDER BY table_schema, table_name
"#;

const SQLITE_TABLES_SQL: &str = r#"
    SELECT 'main', name
    FROM sqlite_master
    WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
    ORDER BY name
"#;

/// Driver-specific pool.
#[derive(Debug, Clone)]
enum SqlPool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

/// Relational database backend.
#[derive(Debug)]
pub struct RelationalBackend {
    name: String,
    pool: SqlPool,
}

impl RelationalBackend {
    /// Builds a lazy pool for the given driver.
    ///
    /// Only the DSN is parsed here. Every physical connection is switched to
    /// read-only mode when the pool opens it.
    pub fn connect_lazy(name: &str, driver: Driver, dsn: &str) -> Result<Self> {
        let invalid = |e: sqlx::Error| GatewayError::unavailable(name, format!("invalid DSN: {e}"));

        let pool = match driver {
            Driver::Postgres => {
                let options = PgConnectOptions::from_str(dsn).map_err(invalid)?;
                SqlPool::Postgres(
                    PgPoolOptions::new()
                        .max_connections(MAX_CONNECTIONS)
                        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
                        .after_connect(|conn, _meta| {
                            Box::pin(async move {
                                conn.execute("SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
                                    .await?;
                                Ok(())
                            })
                        })
                        .connect_lazy_with(options),
                )
            }
            Driver::MySql => {
                let options = MySqlConnectOptions::from_str(dsn).map_err(invalid)?;
                SqlPool::MySql(
                    MySqlPoolOptions::new()
                        .max_connections(MAX_CONNECTIONS)
                        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
                        .after_connect(|conn, _meta| {
                            Box::pin(async move {
                                conn.execute("SET SESSION TRANSACTION READ ONLY").await?;
                                Ok(())
                            })
                        })
                        .connect_lazy_with(options),
                )
            }
            Driver::Sqlite => {
                let options = SqliteConnectOptions::from_str(dsn)
                    .map_err(invalid)?
                    .read_only(true);
                SqlPool::Sqlite(
                    SqlitePoolOptions::new()
                        .max_connections(MAX_CONNECTIONS)
                        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
                        .connect_lazy_with(options),
                )
            }
            Driver::DuckDb | Driver::MsSql => {
                return Err(GatewayError::unavailable(
                    name,
                    format!("{} DSNs are served by a dedicated backend", driver.as_str()),
                ))
            }
        };

        debug!("Created lazy {} pool for backend '{}'", driver.as_str(), name);

        Ok(Self {
            name: name.to_string(),
            pool,
        })
    }

    /// Returns the driver behind this backend.
    pub fn driver(&self) -> Driver {
        match self.pool {
            SqlPool::Postgres(_) => Driver::Postgres,
            SqlPool::MySql(_) => Driver::MySql,
            SqlPool::Sqlite(_) => Driver::Sqlite,
        }
    }

    /// Closes the pool.
    pub async fn close(&self) {
        match &self.pool {
            SqlPool::Postgres(pool) => pool.close().await,
            SqlPool::MySql(pool) => pool.close().await,
            SqlPool::Sqlite(pool) => pool.close().await,
        }
    }

    fn failed(&self, error: sqlx::Error) -> GatewayError {
        GatewayError::execution(&self.name, format_query_error(error))
    }
}

#[async_trait]
impl Backend for RelationalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();

        let result = match &self.pool {
            SqlPool::Postgres(pool) => {
                let rows = sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| self.failed(e))?;
                let columns = match rows.first() {
                    Some(row) => column_names(row.columns()),
                    None => describe_columns(pool, sql).await,
                };
                QueryResult::with_data(columns, rows.iter().map(convert_pg_row).collect())
            }
            SqlPool::MySql(pool) => {
                let rows = sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| self.failed(e))?;
                let columns = match rows.first() {
                    Some(row) => column_names(row.columns()),
                    None => describe_columns(pool, sql).await,
                };
                QueryResult::with_data(columns, rows.iter().map(convert_mysql_row).collect())
            }
            SqlPool::Sqlite(pool) => {
                let rows = sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .map_err(|e| self.failed(e))?;
                let columns = match rows.first() {
                    Some(row) => column_names(row.columns()),
                    None => describe_columns(pool, sql).await,
                };
                QueryResult::with_data(columns, rows.iter().map(convert_sqlite_row).collect())
            }
        };

        debug!(
            "Backend '{}' returned {} rows in {:?}",
            self.name,
            result.row_count(),
            start.elapsed()
        );

        Ok(result)
    }

    async fn list_tables(&self) -> Result<TableListing> {
        let sql = match self.driver() {
            Driver::Postgres => POSTGRES_TABLES_SQL,
            Driver::MySql => MYSQL_TABLES_SQL,
            _ => SQLITE_TABLES_SQL,
        };
        let result = self.execute_query(sql).await?;
        Ok(TableListing::from_schema_rows(&result))
    }

    async fn column_labels(&self, sql: &str) -> Result<Option<Vec<String>>> {
        let labels = match &self.pool {
            SqlPool::Postgres(pool) => describe_columns(pool, sql).await,
            SqlPool::MySql(pool) => describe_columns(pool, sql).await,
            SqlPool::Sqlite(pool) => describe_columns(pool, sql).await,
        };
        Ok((!labels.is_empty()).then_some(labels))
    }
}

fn column_names<C: SqlxColumn>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|col| col.name().to_string()).collect()
}

/// Column names for a query that returned no rows, taken from the prepared
/// statement. Best effort: an empty list if the driver cannot describe it.
async fn describe_columns<'e, E>(executor: E, sql: &'e str) -> Vec<String>
where
    E: Executor<'e>,
{
    match executor.describe(sql).await {
        Ok(describe) => column_names(describe.columns()),
        Err(e) => {
            debug!("Could not describe empty result columns: {e}");
            Vec::new()
        }
    }
}

/// Tries each Rust type in turn and returns the first successful decode.
///
/// `try_get` rejects incompatible column types, and accepts NULL for any of
/// them, so the first match also maps native NULLs to `Value::Null`.
macro_rules! decode_first {
    ($row:expr, $idx:expr, $( $ty:ty => $conv:expr ),+ $(,)?) => {
        $(
            if let Ok(value) = $row.try_get::<Option<$ty>, _>($idx) {
                return value.map($conv).unwrap_or(Value::Null);
            }
        )+
    };
}

/// Defines a row converter for one sqlx row type.
///
/// Driver-specific decoders are tried after the integer types and before
/// the portable ones.
macro_rules! row_converter {
    ($convert_row:ident, $convert_value:ident, $row_ty:ty $(, $ty:ty => $conv:expr)*) => {
        fn $convert_row(row: &$row_ty) -> Row {
            (0..row.columns().len())
                .map(|i| $convert_value(row, i))
                .collect()
        }

        fn $convert_value(row: &$row_ty, index: usize) -> Value {
            decode_first!(row, index,
                i64 => Value::Int,
                i32 => |v| Value::Int(v as i64),
                i16 => |v| Value::Int(v as i64),
                $( $ty => $conv, )*
                f64 => Value::Float,
                f32 => |v| Value::Float(v as f64),
                bool => Value::Bool,
                String => Value::String,
                NaiveDateTime => |v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
                DateTime<Utc> => |v| Value::String(v.to_rfc3339()),
                NaiveDate => |v| Value::String(v.to_string()),
                NaiveTime => |v| Value::String(v.to_string()),
                serde_json::Value => |v| Value::String(v.to_string()),
                Vec<u8> => Value::Bytes,
            );
            unsupported_value(row.columns()[index].type_info().name())
        }
    };
}

row_converter!(convert_pg_row, convert_pg_value, PgRow,
    Decimal => decimal_value,
    Uuid => |v| Value::String(v.to_string())
);
row_converter!(convert_mysql_row, convert_mysql_value, MySqlRow,
    u64 => unsigned_value,
    Decimal => decimal_value
);
row_converter!(convert_sqlite_row, convert_sqlite_value, SqliteRow);

/// Exact decimals keep every digit, scale included, as a string.
fn decimal_value(v: Decimal) -> Value {
    Value::String(v.to_string())
}

/// Unsigned integers past `i64::MAX` are returned as strings.
fn unsigned_value(v: u64) -> Value {
    match i64::try_from(v) {
        Ok(v) => Value::Int(v),
        Err(_) => Value::String(v.to_string()),
    }
}

/// Placeholder for column types with no decoder (e.g. PostGIS geometry).
fn unsupported_value(type_name: &str) -> Value {
    debug!("No decoder for column type {type_name}");
    Value::String(format!("<{}>", type_name.to_lowercase()))
}

/// Formats a query error, keeping the database's own message when there is one.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }
        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}
