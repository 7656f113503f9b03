//! Backend handle management for querygate.
//!
//! Centralizes handle creation and caching for the configured backends.

pub mod connector;

pub use connector::{BackendConnector, BackendFactory, DriverFactory};
