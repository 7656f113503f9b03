//! Integration tests for querygate.
//!
//! Server-backed tests are skipped unless their URL is set: DATABASE_URL
//! (PostgreSQL), MYSQL_DATABASE_URL and MSSQL_DATABASE_URL.

pub mod csv_test;
pub mod gateway_test;
pub mod mssql_test;
pub mod mysql_test;
pub mod postgres_test;
pub mod runs_test;
pub mod server_test;
