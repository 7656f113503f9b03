//! MySQL tests.
//!
//! These need a running server. Set MYSQL_DATABASE_URL to run them.

use querygate::connection::{BackendConnector, DriverFactory};
use querygate::db::{BackendDescriptor, BackendKind, Value};
use querygate::query::{QueryGateway, QueryOutput, QueryRequest};
use std::sync::Arc;

fn get_test_database_url() -> Option<String> {
    std::env::var("MYSQL_DATABASE_URL").ok()
}

fn gateway(dsn: &str) -> QueryGateway {
    let connector = BackendConnector::new(
        vec![BackendDescriptor::new(
            "mysql",
            BackendKind::RelationalDsn {
                dsn: dsn.to_string(),
            },
        )],
        Arc::new(DriverFactory::new(None, "query")),
    );
    QueryGateway::new(Arc::new(connector))
}

#[tokio::test]
async fn test_unsigned_and_decimal_values() {
    let Some(url) = get_test_database_url() else {
        eprintln!("Skipping test: MYSQL_DATABASE_URL not set");
        return;
    };

    let output = gateway(&url)
        .run(&QueryRequest::new(
            "mysql",
            "SELECT CAST(18446744073709551615 AS UNSIGNED) AS big, \
             CAST(7 AS UNSIGNED) AS small, \
             CAST(12.5 AS DECIMAL(10,2)) AS amount",
        ))
        .await
        .unwrap();

    let QueryOutput::Records(result) = output else {
        panic!("expected records");
    };
    assert_eq!(
        result.rows,
        vec![vec![
            Value::from("18446744073709551615"),
            Value::Int(7),
            Value::from("12.50"),
        ]]
    );
}
