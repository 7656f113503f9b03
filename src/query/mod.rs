//! Query dispatch for querygate.
//!
//! Isolates the read-only policy, statement preparation and result shaping
//! from the HTTP layer.

pub mod format;
pub mod gateway;

pub use format::to_delimited;
pub use gateway::{prepare_statement, OutputFormat, QueryGateway, QueryOutput, QueryRequest};
