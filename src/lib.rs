//! Library modules for the betwatch match monitor.
//!
//! The `betwatch` binary wires these together; tests use them directly.

pub mod config;
pub mod engine;
pub mod fingerprint;
pub mod metrics;
pub mod notify;
pub mod odds;
pub mod producer;
pub mod retry;
pub mod scrape;
pub mod source;
pub mod store;
