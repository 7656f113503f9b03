//! Gateway integration tests against a SQLite file.

use pretty_assertions::assert_eq;
use querygate::connection::{BackendConnector, DriverFactory};
use querygate::db::{BackendDescriptor, BackendKind, TableListing, Value};
use querygate::error::GatewayError;
use querygate::query::{OutputFormat, QueryGateway, QueryOutput, QueryRequest};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

/// Creates `people` with 100 rows in a fresh SQLite file.
async fn seed_database(path: &Path) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    sqlx::query("CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL)")
        .execute(&pool)
        .await
        .unwrap();
    for i in 1..=100i64 {
        sqlx::query("INSERT INTO people (id, name, score) VALUES (?, ?, ?)")
            .bind(i)
            .bind(format!("person-{i}"))
            .bind(i as f64 / 2.0)
            .execute(&pool)
            .await
            .unwrap();
    }
    pool.close().await;
}

async fn sqlite_gateway() -> (QueryGateway, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.db");
    seed_database(&path).await;

    let descriptor = BackendDescriptor::new(
        "local",
        BackendKind::RelationalDsn {
            dsn: format!("sqlite://{}", path.display()),
        },
    );
    let connector = BackendConnector::new(vec![descriptor], Arc::new(DriverFactory::new(None, "query")));
    (QueryGateway::new(Arc::new(connector)), dir)
}

fn records(output: QueryOutput) -> querygate::db::QueryResult {
    match output {
        QueryOutput::Records(result) => result,
        QueryOutput::Csv(csv) => panic!("expected records, got csv: {csv}"),
    }
}

#[tokio::test]
async fn test_limit_caps_rows_and_keeps_columns() {
    let (gateway, _dir) = sqlite_gateway().await;

    let request = QueryRequest::new("local", "SELECT id, name FROM people ORDER BY id;").with_limit(5);
    let result = records(assert_ok!(gateway.run(&request).await));

    assert_eq!(result.columns, vec!["id".to_string(), "name".to_string()]);
    assert_eq!(result.row_count(), 5);
    assert_eq!(result.rows[0][0], Value::Int(1));
    assert_eq!(result.rows[4][1], Value::String("person-5".to_string()));
}

#[tokio::test]
async fn test_limit_keeps_duplicate_column_labels() {
    let (gateway, _dir) = sqlite_gateway().await;

    let request =
        QueryRequest::new("local", "SELECT id AS a, name AS a FROM people ORDER BY id").with_limit(2);
    let result = records(assert_ok!(gateway.run(&request).await));

    assert_eq!(result.columns, vec!["a", "a"]);
    assert_eq!(result.row_count(), 2);
    assert_eq!(result.rows[1], vec![Value::Int(2), Value::from("person-2")]);
}

#[tokio::test]
async fn test_limit_with_trailing_comment() {
    let (gateway, _dir) = sqlite_gateway().await;

    let request = QueryRequest::new("local", "SELECT id FROM people ORDER BY id; -- first rows")
        .with_limit(3);
    let result = records(assert_ok!(gateway.run(&request).await));
    assert_eq!(result.row_count(), 3);
}

#[tokio::test]
async fn test_no_limit_returns_everything() {
    let (gateway, _dir) = sqlite_gateway().await;

    let request = QueryRequest::new("local", "SELECT * FROM people");
    let result = records(gateway.run(&request).await.unwrap());

    assert_eq!(result.row_count(), 100);
    assert_eq!(result.columns, vec!["id", "name", "score"]);
}

#[tokio::test]
async fn test_csv_output() {
    let (gateway, _dir) = sqlite_gateway().await;

    let request = QueryRequest::new("local", "SELECT id, name FROM people WHERE id <= 2 ORDER BY id")
        .with_format(OutputFormat::Csv);
    let output = gateway.run(&request).await.unwrap();

    match output {
        QueryOutput::Csv(csv) => assert_eq!(csv, "id,name\n1,person-1\n2,person-2\n"),
        QueryOutput::Records(_) => panic!("expected csv"),
    }
}

#[tokio::test]
async fn test_write_rejected_before_connecting() {
    let (gateway, _dir) = sqlite_gateway().await;

    let request = QueryRequest::new("local", "DROP TABLE people");
    let err = assert_err!(gateway.run(&request).await);

    assert!(matches!(
        err,
        GatewayError::WriteStatementRejected { ref keyword } if keyword == "DROP"
    ));
    assert_eq!(gateway.connector().builds(), 0);

    // The table is untouched.
    let count = records(
        gateway
            .run(&QueryRequest::new("local", "SELECT COUNT(*) AS n FROM people"))
            .await
            .unwrap(),
    );
    assert_eq!(count.rows[0][0], Value::Int(100));
}

#[tokio::test]
async fn test_handle_is_reused() {
    let (gateway, _dir) = sqlite_gateway().await;

    for _ in 0..3 {
        gateway
            .run(&QueryRequest::new("local", "SELECT 1"))
            .await
            .unwrap();
    }
    assert_eq!(gateway.connector().builds(), 1);
}

#[tokio::test]
async fn test_execution_error_names_backend() {
    let (gateway, _dir) = sqlite_gateway().await;

    let err = gateway
        .run(&QueryRequest::new("local", "SELECT nope FROM people"))
        .await
        .unwrap_err();

    match err {
        GatewayError::QueryExecutionFailed { backend, .. } => assert_eq!(backend, "local"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_backend() {
    let (gateway, _dir) = sqlite_gateway().await;

    let err = gateway
        .run(&QueryRequest::new("warehouse", "SELECT 1"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "Backend Unavailable");
}

#[tokio::test]
async fn test_list_tables() {
    let (gateway, _dir) = sqlite_gateway().await;

    let listing = gateway.list_tables("local").await.unwrap();
    match listing {
        TableListing::Schemas(schemas) => {
            let tables: Vec<&String> = schemas.values().flatten().collect();
            assert_eq!(tables, vec!["people"]);
        }
        TableListing::Files(_) => panic!("expected schemas"),
    }
}
