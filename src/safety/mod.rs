//! Read-only safety filter for ad-hoc SQL.
//!
//! Scans statement text for write keywords and rejects anything that looks like
//! a mutation before a connection is ever opened.
//!
//! This is a token heuristic, not a parser. It does not understand comments,
//! string literals or dialect-specific statement forms, so it can over-reject
//! (`SELECT 'drop table' AS note`) and under-reject (a write hidden behind a
//! dialect form that uses none of the listed keywords). Callers are told so in
//! the API documentation.

pub mod identifier;

pub use identifier::sanitize_identifier;

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{GatewayError, Result};

/// Keywords that mark a statement as a write.
pub const DENYLIST: [&str; 11] = [
    "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "ALTER", "DROP", "TRUNCATE", "REPLACE",
    "GRANT", "REVOKE",
];

fn denylist_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let alternation = DENYLIST.join("|");
        // `\b` treats `_` as a word character, so `created_at` is one token.
        Regex::new(&format!(r"(?i)\b({alternation})\b")).expect("denylist pattern is valid")
    })
}

/// Classifies statements as read-only or rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlSafetyFilter;

impl SqlSafetyFilter {
    /// Creates a new filter.
    pub fn new() -> Self {
        Self
    }

    /// Returns `Ok(())` for read-only statements and `WriteStatementRejected`
    /// naming the first denylisted keyword otherwise.
    pub fn check(&self, sql: &str) -> Result<()> {
        match self.offending_keyword(sql) {
            Some(keyword) => Err(GatewayError::write_rejected(keyword)),
            None => Ok(()),
        }
    }

    /// Returns the first denylisted keyword in the statement, upper-cased.
    pub fn offending_keyword(&self, sql: &str) -> Option<String> {
        denylist_pattern()
            .find(sql)
            .map(|m| m.as_str().to_ascii_uppercase())
    }
}

/// Convenience function to check SQL without creating a filter instance.
pub fn check_sql(sql: &str) -> Result<()> {
    SqlSafetyFilter::new().check(sql)
}
