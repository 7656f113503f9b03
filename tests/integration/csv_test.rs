//! CSV directory backends queried through the gateway.

use pretty_assertions::assert_eq;
use querygate::connection::{BackendConnector, DriverFactory};
use querygate::db::{BackendDescriptor, BackendKind, TableListing, Value};
use querygate::error::GatewayError;
use querygate::query::{QueryGateway, QueryOutput, QueryRequest};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn gateway_for(dir: &Path) -> QueryGateway {
    let descriptor = BackendDescriptor::new(
        "csv",
        BackendKind::EmbeddedDirectory {
            base_dir: dir.to_path_buf(),
        },
    );
    let connector = BackendConnector::new(vec![descriptor], Arc::new(DriverFactory::new(None, "query")));
    QueryGateway::new(Arc::new(connector))
}

#[tokio::test]
async fn test_query_csv_files_as_tables() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("Sales 2024.csv"),
        "region,amount\nnorth,10\nsouth,32\nnorth,5\n",
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "not a table").unwrap();

    let gateway = gateway_for(dir.path());

    let listing = gateway.list_tables("csv").await.unwrap();
    match listing {
        TableListing::Files(files) => {
            assert_eq!(files.len(), 1);
            assert_eq!(files.get("sales_2024").map(String::as_str), Some("Sales 2024.csv"));
        }
        TableListing::Schemas(_) => panic!("expected file listing"),
    }

    let request = QueryRequest::new(
        "csv",
        "SELECT region, SUM(amount) AS total FROM sales_2024 GROUP BY region ORDER BY region",
    );
    let result = match gateway.run(&request).await.unwrap() {
        QueryOutput::Records(result) => result,
        QueryOutput::Csv(_) => panic!("expected records"),
    };

    assert_eq!(result.columns, vec!["region", "total"]);
    assert_eq!(result.rows[0][0], Value::String("north".to_string()));
    assert_eq!(result.rows[1][0], Value::String("south".to_string()));
}

#[tokio::test]
async fn test_new_files_are_picked_up() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("first.csv"), "x\n1\n").unwrap();
    let gateway = gateway_for(dir.path());

    gateway
        .run(&QueryRequest::new("csv", "SELECT * FROM first"))
        .await
        .unwrap();

    fs::write(dir.path().join("second.csv"), "y\n2\n").unwrap();
    let result = gateway
        .run(&QueryRequest::new("csv", "SELECT y FROM second"))
        .await;
    assert!(result.is_ok());
    assert_eq!(gateway.connector().builds(), 2);
}

#[tokio::test]
async fn test_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway_for(dir.path());

    let err = gateway
        .run(&QueryRequest::new("csv", "SELECT 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NoTablesRegistered(_)));
    assert!(err.is_empty_result());
}
