//! Mock backends for testing.
//!
//! Provides in-memory backend implementations for headless testing of the
//! gateway and HTTP layer.

use super::{Backend, LimitStrategy, QueryResult, TableListing, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A mock backend that records statements and returns a predefined result.
pub struct MockBackend {
    name: String,
    result: QueryResult,
    labels: Option<Vec<String>>,
    limit_strategy: LimitStrategy,
    executed: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Creates a mock backend that answers every SELECT with a one-row result.
    pub fn new(name: &str) -> Self {
        Self::with_result(
            name,
            QueryResult::with_data(vec!["result".to_string()], vec![vec![Value::Int(1)]]),
        )
    }

    /// Creates a mock backend that answers every statement with `result`.
    pub fn with_result(name: &str, result: QueryResult) -> Self {
        Self {
            name: name.to_string(),
            result,
            labels: None,
            limit_strategy: LimitStrategy::Wrap,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Reports `labels` as the column labels of any statement.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_limit_strategy(mut self, strategy: LimitStrategy) -> Self {
        self.limit_strategy = strategy;
        self
    }

    /// Statements received so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sql.to_string());
        Ok(self.result.clone())
    }

    async fn list_tables(&self) -> Result<TableListing> {
        let mut schemas = BTreeMap::new();
        schemas.insert("main".to_string(), vec!["mock".to_string()]);
        Ok(TableListing::Schemas(schemas))
    }

    fn limit_strategy(&self) -> LimitStrategy {
        self.limit_strategy
    }

    async fn column_labels(&self, _sql: &str) -> Result<Option<Vec<String>>> {
        Ok(self.labels.clone())
    }
}

/// A backend whose queries always fail.
pub struct FailingBackend {
    name: String,
    message: String,
}

impl FailingBackend {
    /// Creates a backend that fails every query with `message`.
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Backend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_query(&self, _sql: &str) -> Result<QueryResult> {
        Err(GatewayError::execution(&self.name, &self.message))
    }

    async fn list_tables(&self) -> Result<TableListing> {
        Err(GatewayError::execution(&self.name, &self.message))
    }
}
