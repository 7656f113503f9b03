//! querygate - A read-only multi-backend SQL gateway with active-run file access.
//!
//! This library exposes the core modules for the binary and for integration tests.

pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod logging;
pub mod provider;
pub mod query;
pub mod runs;
pub mod safety;
pub mod server;
