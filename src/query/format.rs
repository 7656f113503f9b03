//! Delimited-text rendering of query results.

use crate::db::QueryResult;
use crate::error::{GatewayError, Result};

/// Renders a result as CSV: a header line, then one line per row.
///
/// Quoting follows RFC 4180. NULL becomes an empty field and binary values
/// are base64-encoded.
pub fn to_delimited(result: &QueryResult) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(&result.columns)
        .map_err(|e| GatewayError::internal(format!("CSV encoding failed: {e}")))?;
    for row in &result.rows {
        writer
            .write_record(row.iter().map(|value| value.to_field()))
            .map_err(|e| GatewayError::internal(format!("CSV encoding failed: {e}")))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| GatewayError::internal(format!("CSV encoding failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| GatewayError::internal(format!("CSV encoding failed: {e}")))
}
