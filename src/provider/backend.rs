//! Query backend served by the tool provider.

use super::ToolSession;
use crate::db::{Backend, QueryResult, TableListing, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

const TABLES_SQL: &str = "SELECT table_schema, table_name FROM information_schema.tables \
     WHERE table_schema NOT IN ('information_schema', 'pg_catalog') \
     ORDER BY table_schema, table_name";

/// Column used when the provider answers with free text.
const TEXT_COLUMN: &str = "result";

/// Runs statements through the provider's query tool.
pub struct ToolProviderBackend {
    name: String,
    session: Arc<dyn ToolSession>,
    query_tool: String,
}

impl ToolProviderBackend {
    pub fn new(name: &str, session: Arc<dyn ToolSession>, query_tool: &str) -> Self {
        Self {
            name: name.to_string(),
            session,
            query_tool: query_tool.to_string(),
        }
    }
}

#[async_trait]
impl Backend for ToolProviderBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let output = self
            .session
            .call_tool(&self.query_tool, json!({ "query": sql }))
            .await
            .map_err(|e| GatewayError::execution(&self.name, e))?;

        if output.is_error {
            return Err(GatewayError::execution(&self.name, output.text));
        }

        let result = parse_tool_text(&output.text);
        debug!(
            "Provider backend '{}' returned {} rows",
            self.name,
            result.row_count()
        );
        Ok(result)
    }

    async fn list_tables(&self) -> Result<TableListing> {
        let result = self.execute_query(TABLES_SQL).await?;
        Ok(TableListing::from_schema_rows(&result))
    }
}

/// Turns tool output into rows.
///
/// A JSON array of objects becomes one row per object, with columns in
/// first-seen key order. Anything else is returned as a single text cell.
fn parse_tool_text(text: &str) -> QueryResult {
    let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(text) else {
        return text_result(text);
    };
    if !items.iter().all(serde_json::Value::is_object) {
        return text_result(text);
    }

    let mut columns: Vec<String> = Vec::new();
    for item in &items {
        if let Some(object) = item.as_object() {
            for key in object.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }

    let rows = items
        .into_iter()
        .map(|mut item| {
            columns
                .iter()
                .map(|col| {
                    item.get_mut(col)
                        .map(serde_json::Value::take)
                        .map(Value::from)
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect();

    QueryResult::with_data(columns, rows)
}

fn text_result(text: &str) -> QueryResult {
    QueryResult::with_data(
        vec![TEXT_COLUMN.to_string()],
        vec![vec![Value::from(text)]],
    )
}
