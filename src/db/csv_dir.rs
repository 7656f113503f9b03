//! CSV directory backend.
//!
//! Every `*.csv` file directly inside a directory becomes a view in a fresh
//! in-memory DuckDB session. Sessions are built per acquisition so they always
//! reflect the files currently on disk.

use crate::db::embedded::{labels_from_describe, run_duckdb_query};
use crate::db::{Backend, QueryResult, TableListing};
use crate::error::{GatewayError, Result};
use crate::safety::sanitize_identifier;
use async_trait::async_trait;
use duckdb::Connection;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extension of files registered as tables (matched case-insensitively).
pub const CSV_EXTENSION: &str = "csv";

/// An in-memory DuckDB session with one view per CSV file.
pub struct CsvDirectorySession {
    name: String,
    base_dir: PathBuf,
    tables: BTreeMap<String, String>,
    conn: Arc<Mutex<Connection>>,
}

impl CsvDirectorySession {
    /// Builds a session over `base_dir`.
    ///
    /// Blocking: call from `spawn_blocking`. Files are registered in
    /// lexicographic order, so when two file names sanitize to the same
    /// table name the later file wins.
    pub fn open(name: &str, base_dir: &Path) -> Result<Self> {
        if !base_dir.is_dir() {
            return Err(GatewayError::unavailable(name, "directory not found"));
        }

        let files = csv_files(base_dir);
        if files.is_empty() {
            return Err(GatewayError::NoTablesRegistered(base_dir.to_path_buf()));
        }

        let conn = Connection::open_in_memory().map_err(|e| GatewayError::unavailable(name, e))?;
        let mut tables: BTreeMap<String, String> = BTreeMap::new();

        for path in files {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let table = sanitize_identifier(&stem);
            let file_name = path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            let sql = format!(
                "CREATE OR REPLACE VIEW \"{}\" AS SELECT * FROM read_csv_auto('{}', header=true)",
                table,
                path.display().to_string().replace('\'', "''")
            );
            conn.execute_batch(&sql)
                .map_err(|e| GatewayError::unavailable(name, format!("cannot register {file_name}: {e}")))?;

            if let Some(previous) = tables.insert(table.clone(), file_name.clone()) {
                warn!(
                    "Table '{}' from {} replaces the view registered from {}",
                    table, file_name, previous
                );
            }
            debug!("Registered {} as '{}'", file_name, table);
        }

        info!(
            "Opened CSV session '{}' with {} tables from {}",
            name,
            tables.len(),
            base_dir.display()
        );

        Ok(Self {
            name: name.to_string(),
            base_dir: base_dir.to_path_buf(),
            tables,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Returns the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Table name to source file name.
    pub fn tables(&self) -> &BTreeMap<String, String> {
        &self.tables
    }
}

/// CSV files directly inside `dir`, sorted by file name.
fn csv_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(CSV_EXTENSION))
                .unwrap_or(false)
        })
        .collect()
}

#[async_trait]
impl Backend for CsvDirectorySession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let name = self.name.clone();
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            run_duckdb_query(&conn, &sql).map_err(|e| GatewayError::execution(&name, e))
        })
        .await
        .map_err(|e| GatewayError::internal(format!("CSV query task failed: {e}")))?
    }

    async fn list_tables(&self) -> Result<TableListing> {
        Ok(TableListing::Files(self.tables.clone()))
    }

    async fn column_labels(&self, sql: &str) -> Result<Option<Vec<String>>> {
        let described = self.execute_query(&format!("DESCRIBE {sql}")).await?;
        Ok(labels_from_describe(&described))
    }
}
